// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, Mac};
use mixscribe_domain::{Candidate, Recognizer, Segment, SegmentClip};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use sha1::Sha1;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::error::{invalid_response, transport, RecognizerError, Result};
use crate::rate_limiter::RateLimiter;
use crate::upload::{score_from_value, string_field, AudioUpload};
use crate::USER_AGENT;

pub const ACRCLOUD_ID: &str = "acrcloud";

const IDENTIFY_PATH: &str = "/v1/identify";
const DATA_TYPE: &str = "audio";
const SIGNATURE_VERSION: &str = "1";

/// ACRCloud status code for "no result".
const STATUS_NO_RESULT: i64 = 1001;

pub const DEFAULT_REGIONS: [&str; 4] = ["us-west-2", "eu-west-1", "ap-southeast-1", "us-east-1"];

type HmacSha1 = Hmac<Sha1>;

/// ACRCloud identification client.
///
/// Requests are signed with HMAC-SHA1 and sent to each configured regional
/// host in turn; a 404 or transport failure moves on to the next host.
#[derive(Debug, Clone)]
pub struct AcrCloudClient {
    client: Client,
    endpoints: Vec<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    rate_limiter: RateLimiter,
}

impl AcrCloudClient {
    pub fn new(access_key: Option<String>, secret_key: Option<String>) -> Result<Self> {
        Self::builder(access_key, secret_key).build()
    }

    pub fn builder(access_key: Option<String>, secret_key: Option<String>) -> AcrCloudClientBuilder {
        AcrCloudClientBuilder::new(access_key, secret_key)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        let access = self.access_key.as_deref().filter(|k| !k.is_empty())?;
        let secret = self.secret_key.as_deref().filter(|k| !k.is_empty())?;
        Some((access, secret))
    }

    #[instrument(skip(self), fields(clip = %path.display()))]
    pub async fn identify(&self, path: &Path) -> Result<Option<Candidate>> {
        let (access_key, secret_key) = self.credentials().ok_or(RecognizerError::NotConfigured)?;

        let upload = AudioUpload::read(path).await?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            .to_string();
        let signature = sign(secret_key, &string_to_sign(access_key, &timestamp))?;

        self.rate_limiter.acquire().await;

        let mut last_error = None;
        for endpoint in &self.endpoints {
            let url = format!("{}{}", endpoint, IDENTIFY_PATH);
            let form = build_form(
                upload.part()?,
                access_key,
                &signature,
                upload.len(),
                &timestamp,
            );

            debug!(target: "recognition", recognizer = ACRCLOUD_ID, %url, "submitting clip");

            let response = match self.client.post(&url).multipart(form).send().await {
                Ok(response) => response,
                Err(error) => {
                    warn!(target: "recognition", recognizer = ACRCLOUD_ID, %url, error = %error, "endpoint unreachable, trying next");
                    last_error = Some(transport(error));
                    continue;
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(transport)?;
            trace!(target: "recognition", recognizer = ACRCLOUD_ID, %status, "response: {}", body);

            if status == StatusCode::NOT_FOUND {
                warn!(target: "recognition", recognizer = ACRCLOUD_ID, %url, "endpoint returned 404, trying next");
                last_error = Some(RecognizerError::HttpStatus {
                    status: status.as_u16(),
                    body,
                });
                continue;
            }

            return parse_acrcloud_body(status, &body);
        }

        Err(last_error
            .unwrap_or_else(|| RecognizerError::Api("no ACRCloud endpoints configured".to_string())))
    }
}

#[async_trait::async_trait]
impl Recognizer for AcrCloudClient {
    fn id(&self) -> &str {
        ACRCLOUD_ID
    }

    fn is_available(&self) -> bool {
        self.credentials().is_some()
    }

    async fn recognize(
        &self,
        clip: &SegmentClip,
        _segment: &Segment,
    ) -> Result<Option<Candidate>> {
        self.identify(clip.path()).await
    }
}

fn string_to_sign(access_key: &str, timestamp: &str) -> String {
    format!(
        "POST\n{}\n{}\n{}\n{}\n{}",
        IDENTIFY_PATH, access_key, DATA_TYPE, SIGNATURE_VERSION, timestamp
    )
}

fn sign(secret_key: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| RecognizerError::Api(format!("invalid secret key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn build_form(
    sample: Part,
    access_key: &str,
    signature: &str,
    sample_bytes: usize,
    timestamp: &str,
) -> Form {
    Form::new()
        .part("sample", sample)
        .text("access_key", access_key.to_string())
        .text("data_type", DATA_TYPE)
        .text("signature_version", SIGNATURE_VERSION)
        .text("signature", signature.to_string())
        .text("sample_bytes", sample_bytes.to_string())
        .text("timestamp", timestamp.to_string())
}

fn parse_acrcloud_body(status: StatusCode, body: &str) -> Result<Option<Candidate>> {
    if !status.is_success() {
        return Err(RecognizerError::HttpStatus {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    let value: serde_json::Value = serde_json::from_str(body).map_err(invalid_response)?;

    let code = value
        .pointer("/status/code")
        .and_then(|c| c.as_i64())
        .ok_or_else(|| RecognizerError::InvalidResponse("missing status.code".to_string()))?;

    match code {
        0 => {}
        STATUS_NO_RESULT => return Ok(None),
        other => {
            let message = value
                .pointer("/status/msg")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            return Err(RecognizerError::Api(format!("{} (code {})", message, other)));
        }
    }

    let Some(track) = value
        .pointer("/metadata/music/0")
        .filter(|track| track.is_object())
        .cloned()
    else {
        return Ok(None);
    };

    let artist = track
        .pointer("/artists/0/name")
        .and_then(|name| name.as_str())
        .map(str::to_string);
    let confidence = score_from_value(track.get("score"))
        .map(|score| score / 100.0)
        .unwrap_or(0.0);

    Ok(Some(
        Candidate::new(ACRCLOUD_ID, artist, string_field(&track, "title"), confidence)
            .with_raw(track),
    ))
}

/// Builder for the ACRCloud client.
#[derive(Debug)]
pub struct AcrCloudClientBuilder {
    access_key: Option<String>,
    secret_key: Option<String>,
    endpoints: Vec<String>,
    timeout: Duration,
    min_interval: Duration,
}

impl AcrCloudClientBuilder {
    pub fn new(access_key: Option<String>, secret_key: Option<String>) -> Self {
        Self {
            access_key,
            secret_key,
            endpoints: DEFAULT_REGIONS.iter().map(|r| region_endpoint(r)).collect(),
            timeout: Duration::from_secs(30),
            min_interval: Duration::ZERO,
        }
    }

    /// Use the identify hosts of the given regions, in order.
    pub fn regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.endpoints = regions
            .into_iter()
            .map(|r| region_endpoint(r.as_ref()))
            .collect();
        self
    }

    /// Use explicit base URLs instead of regional hosts (useful for testing).
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn build(self) -> Result<AcrCloudClient> {
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for endpoint in self.endpoints {
            Url::parse(&endpoint)
                .map_err(|e| RecognizerError::Api(format!("Invalid base URL {}: {}", endpoint, e)))?;
            endpoints.push(endpoint.trim_end_matches('/').to_string());
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(transport)?;

        Ok(AcrCloudClient {
            client,
            endpoints,
            access_key: self.access_key,
            secret_key: self.secret_key,
            rate_limiter: RateLimiter::new(self.min_interval),
        })
    }
}

fn region_endpoint(region: &str) -> String {
    format!("https://identify-{}.acrcloud.com", region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn clip_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .expect("temp file");
        file.write_all(b"RIFF....WAVE").expect("write");
        file
    }

    fn match_response() -> serde_json::Value {
        serde_json::json!({
            "status": { "code": 0, "msg": "Success" },
            "metadata": {
                "music": [{
                    "title": "Gravity",
                    "artists": [{ "name": "X" }, { "name": "Y" }],
                    "score": 82
                }]
            }
        })
    }

    fn client(endpoints: Vec<String>) -> AcrCloudClient {
        AcrCloudClient::builder(Some("access".into()), Some("secret".into()))
            .endpoints(endpoints)
            .build()
            .unwrap()
    }

    #[test]
    fn test_signature_is_base64_hmac_sha1() {
        let payload = string_to_sign("access", "1700000000");
        assert_eq!(payload, "POST\n/v1/identify\naccess\naudio\n1\n1700000000");

        let signature = sign("secret", &payload).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&signature)
            .unwrap();
        assert_eq!(decoded.len(), 20);
        assert_eq!(signature, sign("secret", &payload).unwrap());
        assert_ne!(signature, sign("other", &payload).unwrap());
    }

    #[test]
    fn test_default_endpoints_follow_region_order() {
        let client = AcrCloudClient::new(None, None).unwrap();
        assert_eq!(client.endpoints()[0], "https://identify-us-west-2.acrcloud.com");
        assert_eq!(client.endpoints().len(), 4);
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_acrcloud_identify_match() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/identify"))
            .and(body_string_contains("access_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(match_response()))
            .expect(1)
            .mount(&server)
            .await;

        let file = clip_file();
        let candidate = client(vec![server.uri()])
            .identify(file.path())
            .await
            .unwrap()
            .expect("candidate");

        assert_eq!(candidate.artist.as_deref(), Some("X"));
        assert_eq!(candidate.title.as_deref(), Some("Gravity"));
        assert!((candidate.confidence() - 0.82).abs() < 0.001);
        assert_eq!(candidate.source, "acrcloud");
    }

    #[tokio::test]
    async fn test_acrcloud_no_result_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": { "code": 1001, "msg": "No result" }
            })))
            .mount(&server)
            .await;

        let file = clip_file();
        let result = client(vec![server.uri()]).identify(file.path()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_acrcloud_error_code_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": { "code": 3001, "msg": "Missing/Invalid Access Key" }
            })))
            .mount(&server)
            .await;

        let file = clip_file();
        match client(vec![server.uri()]).identify(file.path()).await {
            Err(RecognizerError::Api(message)) => assert!(message.contains("3001")),
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_acrcloud_falls_back_to_next_region_on_404() {
        let missing = MockServer::start().await;
        let healthy = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such host"))
            .expect(1)
            .mount(&missing)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/identify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(match_response()))
            .expect(1)
            .mount(&healthy)
            .await;

        let file = clip_file();
        let candidate = client(vec![missing.uri(), healthy.uri()])
            .identify(file.path())
            .await
            .unwrap();
        assert!(candidate.is_some());
    }

    #[tokio::test]
    async fn test_acrcloud_server_error_does_not_try_next_region() {
        let failing = MockServer::start().await;
        let healthy = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&failing)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(match_response()))
            .expect(0)
            .mount(&healthy)
            .await;

        let file = clip_file();
        let result = client(vec![failing.uri(), healthy.uri()])
            .identify(file.path())
            .await;
        assert!(matches!(
            result,
            Err(RecognizerError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_acrcloud_all_regions_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let file = clip_file();
        let result = client(vec![server.uri(), server.uri()])
            .identify(file.path())
            .await;
        assert!(matches!(
            result,
            Err(RecognizerError::HttpStatus { status: 404, .. })
        ));
    }
}
