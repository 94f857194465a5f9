// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;
use std::time::Duration;

use mixscribe_domain::{Candidate, Recognizer, Segment, SegmentClip};
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::error::{invalid_response, transport, RecognizerError, Result};
use crate::rate_limiter::RateLimiter;
use crate::upload::{audio_part, score_from_value, string_field};
use crate::USER_AGENT;

const AUDD_API_BASE: &str = "https://api.audd.io";
pub const AUDD_ID: &str = "audd";

/// AudD recognition client.
#[derive(Debug, Clone)]
pub struct AuddClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    rate_limiter: RateLimiter,
}

impl AuddClient {
    pub fn new(api_token: Option<String>) -> Result<Self> {
        Self::builder(api_token).build()
    }

    pub fn builder(api_token: Option<String>) -> AuddClientBuilder {
        AuddClientBuilder::new(api_token)
    }

    /// Upload a clip and return the recognized track, if any.
    #[instrument(skip(self), fields(clip = %path.display()))]
    pub async fn identify(&self, path: &Path) -> Result<Option<Candidate>> {
        let api_token = self
            .api_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or(RecognizerError::NotConfigured)?;

        let (part, size) = audio_part(path).await?;
        let form = Form::new()
            .part("file", part)
            .text("api_token", api_token.to_string())
            .text("return", "spotify,apple_music,deezer");

        self.rate_limiter.acquire().await;

        let url = format!("{}/", self.base_url);
        debug!(target: "recognition", recognizer = AUDD_ID, size, "submitting clip");

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        trace!(target: "recognition", recognizer = AUDD_ID, %status, "response: {}", body);

        parse_audd_body(status, &body)
    }
}

#[async_trait::async_trait]
impl Recognizer for AuddClient {
    fn id(&self) -> &str {
        AUDD_ID
    }

    fn is_available(&self) -> bool {
        self.api_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    async fn recognize(
        &self,
        clip: &SegmentClip,
        _segment: &Segment,
    ) -> Result<Option<Candidate>> {
        self.identify(clip.path()).await
    }
}

#[derive(Debug, Deserialize)]
struct AuddResponse {
    status: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<AuddApiError>,
}

#[derive(Debug, Deserialize)]
struct AuddApiError {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

fn parse_audd_body(status: StatusCode, body: &str) -> Result<Option<Candidate>> {
    if !status.is_success() {
        return Err(RecognizerError::HttpStatus {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    let response: AuddResponse = serde_json::from_str(body).map_err(invalid_response)?;

    if !response.status.eq_ignore_ascii_case("success") {
        let message = response
            .error
            .map(|e| {
                format!(
                    "{} (code {})",
                    e.error_message.unwrap_or_else(|| "Unknown error".to_string()),
                    e.error_code.unwrap_or_default()
                )
            })
            .unwrap_or_else(|| format!("status {}", response.status));
        return Err(RecognizerError::Api(message));
    }

    let Some(result) = response.result.filter(|r| r.is_object()) else {
        return Ok(None);
    };

    // AudD omits the score on its standard endpoint; such matches carry no confidence.
    let confidence = score_from_value(result.get("score"))
        .map(|score| score / 100.0)
        .unwrap_or(0.0);

    let candidate = Candidate::new(
        AUDD_ID,
        string_field(&result, "artist"),
        string_field(&result, "title"),
        confidence,
    )
    .with_raw(result);

    Ok(Some(candidate))
}

/// Builder for the AudD client.
#[derive(Debug)]
pub struct AuddClientBuilder {
    api_token: Option<String>,
    base_url: String,
    timeout: Duration,
    min_interval: Duration,
}

impl AuddClientBuilder {
    pub fn new(api_token: Option<String>) -> Self {
        Self {
            api_token,
            base_url: AUDD_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
            min_interval: Duration::ZERO,
        }
    }

    /// Set a custom base URL (useful for testing).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
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

    pub fn build(self) -> Result<AuddClient> {
        Url::parse(&self.base_url)
            .map_err(|e| RecognizerError::Api(format!("Invalid base URL: {}", e)))?;

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(transport)?;

        Ok(AuddClient {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_token: self.api_token,
            rate_limiter: RateLimiter::new(self.min_interval),
        })
    }
}
