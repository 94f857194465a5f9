// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;
use std::time::Duration;

use mixscribe_domain::{Candidate, Recognizer, Segment, SegmentClip};
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::error::{invalid_response, transport, RecognizerError, Result};
use crate::rate_limiter::RateLimiter;
use crate::upload::{audio_part, string_field};
use crate::USER_AGENT;

const SHAZAM_API_BASE: &str = "https://shazam.p.rapidapi.com";
const RAPIDAPI_HOST: &str = "shazam.p.rapidapi.com";
pub const SHAZAM_ID: &str = "shazam";

/// Shazam does not report a score; any match is taken at this confidence.
pub const SHAZAM_MATCH_CONFIDENCE: f32 = 0.85;

/// Shazam client via the RapidAPI gateway.
#[derive(Debug, Clone)]
pub struct ShazamClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter,
}

impl ShazamClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::builder(api_key).build()
    }

    pub fn builder(api_key: Option<String>) -> ShazamClientBuilder {
        ShazamClientBuilder::new(api_key)
    }

    #[instrument(skip(self), fields(clip = %path.display()))]
    pub async fn identify(&self, path: &Path) -> Result<Option<Candidate>> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(RecognizerError::NotConfigured)?;

        let (part, size) = audio_part(path).await?;
        let form = Form::new().part("upload_file", part);

        self.rate_limiter.acquire().await;

        let url = format!("{}/songs/detect", self.base_url);
        debug!(target: "recognition", recognizer = SHAZAM_ID, size, "submitting clip");

        let response = self
            .client
            .post(url)
            .header("X-RapidAPI-Key", api_key)
            .header("X-RapidAPI-Host", RAPIDAPI_HOST)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        trace!(target: "recognition", recognizer = SHAZAM_ID, %status, "response: {}", body);

        parse_shazam_body(status, &body)
    }
}

#[async_trait::async_trait]
impl Recognizer for ShazamClient {
    fn id(&self) -> &str {
        SHAZAM_ID
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn recognize(
        &self,
        clip: &SegmentClip,
        _segment: &Segment,
    ) -> Result<Option<Candidate>> {
        self.identify(clip.path()).await
    }
}

fn parse_shazam_body(status: StatusCode, body: &str) -> Result<Option<Candidate>> {
    if !status.is_success() {
        return Err(RecognizerError::HttpStatus {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    let value: Value = serde_json::from_str(body).map_err(invalid_response)?;

    if let Some(track) = value.get("track").filter(|t| t.is_object()) {
        let artist = string_field(track, "subtitle")
            .filter(|subtitle| !subtitle.trim().is_empty())
            .or_else(|| {
                track
                    .pointer("/artists/0/name")
                    .and_then(|name| name.as_str())
                    .map(str::to_string)
            });
        let candidate = Candidate::new(
            SHAZAM_ID,
            artist,
            string_field(track, "title"),
            SHAZAM_MATCH_CONFIDENCE,
        )
        .with_raw(track.clone());
        return Ok(Some(candidate));
    }

    // Older responses only carry a list of matches with nested metadata.
    let Some(metadata) = value
        .pointer("/matches/0/metadata")
        .filter(|m| m.is_object())
    else {
        return Ok(None);
    };

    let artist = metadata
        .pointer("/artist/name")
        .or_else(|| metadata.pointer("/artists/0/name"))
        .and_then(|name| name.as_str())
        .map(str::to_string);

    Ok(Some(
        Candidate::new(
            SHAZAM_ID,
            artist,
            string_field(metadata, "title"),
            SHAZAM_MATCH_CONFIDENCE,
        )
        .with_raw(metadata.clone()),
    ))
}

/// Builder for the Shazam client.
#[derive(Debug)]
pub struct ShazamClientBuilder {
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    min_interval: Duration,
}

impl ShazamClientBuilder {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: SHAZAM_API_BASE.to_string(),
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

    pub fn build(self) -> Result<ShazamClient> {
        Url::parse(&self.base_url)
            .map_err(|e| RecognizerError::Api(format!("Invalid base URL: {}", e)))?;

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(transport)?;

        Ok(ShazamClient {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key,
            rate_limiter: RateLimiter::new(self.min_interval),
        })
    }
}
