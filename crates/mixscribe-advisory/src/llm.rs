// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

use mixscribe_domain::{
    format_timestamp, Advisor, ArbitrationContext, Candidate, Track, TrackKey, UNKNOWN_ARTIST,
    UNKNOWN_TITLE,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::error::{invalid_response, transport, AdvisoryError, Result};

pub const LLM_ADVISOR_NAME: &str = "llm";

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 300;

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct LlmProvider {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmProvider {
    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

/// Advisor backed by chat-completion models.
///
/// Providers are tried in order; the first one whose reply contains a
/// parseable JSON array answers the request.
#[derive(Debug, Clone)]
pub struct LlmAdvisor {
    client: Client,
    providers: Vec<LlmProvider>,
    timeout: Duration,
}

impl LlmAdvisor {
    pub fn new(providers: Vec<LlmProvider>, timeout: Duration) -> Result<Self> {
        for provider in &providers {
            Url::parse(&provider.base_url).map_err(|e| {
                AdvisoryError::InvalidResponse(format!(
                    "invalid base URL for {}: {}",
                    provider.name, e
                ))
            })?;
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| transport(e, timeout))?;

        Ok(Self {
            client,
            providers,
            timeout,
        })
    }

    pub fn providers(&self) -> &[LlmProvider] {
        &self.providers
    }

    #[instrument(skip_all, fields(provider = %provider.name))]
    async fn complete(&self, provider: &LlmProvider, api_key: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &provider.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport(e, self.timeout))?;
        trace!(target: "advisory", %status, "response: {}", body);

        parse_chat_body(status, &body)
    }

    /// Ask each configured provider in turn until one returns a JSON array
    /// that deserializes into `T`.
    async fn ask<T>(&self, prompt: &str) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut last_error = AdvisoryError::Unavailable;

        for provider in &self.providers {
            let Some(api_key) = provider.api_key() else {
                continue;
            };

            let reply = match self.complete(provider, api_key, prompt).await {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(target: "advisory", provider = %provider.name, error = %error, "provider failed");
                    last_error = error;
                    continue;
                }
            };

            match parse_json_array::<T>(&reply) {
                Ok(items) => {
                    debug!(target: "advisory", provider = %provider.name, items = items.len(), "provider answered");
                    return Ok(items);
                }
                Err(error) => {
                    debug!(target: "advisory", provider = %provider.name, error = %error, "unusable reply");
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait::async_trait]
impl Advisor for LlmAdvisor {
    fn name(&self) -> &str {
        LLM_ADVISOR_NAME
    }

    fn is_available(&self) -> bool {
        self.providers.iter().any(|p| p.api_key().is_some())
    }

    async fn rank(
        &self,
        candidates: &[Candidate],
        context: &ArbitrationContext,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = rank_prompt(candidates, context)?;
        let verdicts: Vec<RankedEntry> = self.ask(&prompt).await?;
        Ok(map_ranked(candidates, &verdicts))
    }

    async fn merge_variants(&self, tracks: &[Track]) -> Result<Vec<Track>> {
        if tracks.len() <= 1 {
            return Ok(tracks.to_vec());
        }

        let prompt = merge_prompt(tracks)?;
        let unique: Vec<TrackRef> = self.ask(&prompt).await?;
        Ok(map_unique(tracks, &unique))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct RankedEntry {
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "default_valid")]
    is_valid: bool,
}

fn default_valid() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct TrackRef {
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl TrackRef {
    fn key(&self) -> TrackKey {
        TrackKey::new(
            self.artist.as_deref().unwrap_or(UNKNOWN_ARTIST),
            self.title.as_deref().unwrap_or(UNKNOWN_TITLE),
        )
    }
}

fn parse_chat_body(status: StatusCode, body: &str) -> Result<String> {
    if !status.is_success() {
        return Err(AdvisoryError::HttpStatus {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    let response: ChatResponse = serde_json::from_str(body).map_err(invalid_response)?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| AdvisoryError::InvalidResponse("no choices in reply".to_string()))
}

/// Locate the JSON array inside free-form model output.
fn json_array_slice(reply: &str) -> Option<&str> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    (start < end).then(|| &reply[start..=end])
}

fn parse_json_array<T>(reply: &str) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let slice = json_array_slice(reply)
        .ok_or_else(|| AdvisoryError::InvalidResponse("reply contains no JSON array".to_string()))?;
    serde_json::from_str(slice).map_err(invalid_response)
}

fn rank_prompt(candidates: &[Candidate], context: &ArbitrationContext) -> Result<String> {
    let results: Vec<serde_json::Value> = candidates
        .iter()
        .map(|c| {
            serde_json::json!({
                "artist": c.artist.as_deref().unwrap_or(UNKNOWN_ARTIST),
                "title": c.title.as_deref().unwrap_or(UNKNOWN_TITLE),
                "confidence": c.confidence(),
                "source": c.source,
            })
        })
        .collect();
    let context = serde_json::json!({
        "segment_start": format_timestamp(context.segment.start),
        "segment_end": format_timestamp(context.segment.end),
    });

    Ok(format!(
        "You are a music recognition expert. Several recognition services disagree about \
         the track playing in one window of a DJ mix.\n\nResults:\n{}\n\nContext:\n{}\n\n\
         Rank the results from most to least likely correct. Return ONLY a JSON array whose \
         entries have: artist, title, is_valid (true/false).",
        serde_json::to_string_pretty(&results).map_err(invalid_response)?,
        serde_json::to_string_pretty(&context).map_err(invalid_response)?,
    ))
}

fn merge_prompt(tracks: &[Track]) -> Result<String> {
    let listed: Vec<serde_json::Value> = tracks
        .iter()
        .map(|t| {
            serde_json::json!({
                "artist": t.artist,
                "title": t.title,
                "start_time": t.start,
            })
        })
        .collect();

    Ok(format!(
        "Analyze these music tracks and identify which are duplicates or variations of the \
         same song (remixes, edits, extended versions).\n\nTracks:\n{}\n\nReturn ONLY a JSON \
         array of the unique tracks, each with artist and title copied exactly from the input.",
        serde_json::to_string_pretty(&listed).map_err(invalid_response)?,
    ))
}

/// Reorder `candidates` following the valid verdicts; unknown names are ignored.
fn map_ranked(candidates: &[Candidate], verdicts: &[RankedEntry]) -> Vec<Candidate> {
    let mut used = vec![false; candidates.len()];
    let mut ranked = Vec::new();

    for verdict in verdicts.iter().filter(|v| v.is_valid) {
        let key = TrackKey::new(
            verdict.artist.as_deref().unwrap_or(UNKNOWN_ARTIST),
            verdict.title.as_deref().unwrap_or(UNKNOWN_TITLE),
        );
        if let Some(index) = candidates
            .iter()
            .enumerate()
            .position(|(i, c)| !used[i] && c.key() == key)
        {
            used[index] = true;
            ranked.push(candidates[index].clone());
        }
    }

    ranked
}

fn map_unique(tracks: &[Track], unique: &[TrackRef]) -> Vec<Track> {
    let mut used = vec![false; tracks.len()];
    let mut kept = Vec::new();

    for entry in unique {
        let key = entry.key();
        if let Some(index) = tracks
            .iter()
            .enumerate()
            .position(|(i, t)| !used[i] && t.key() == key)
        {
            used[index] = true;
            kept.push(tracks[index].clone());
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixscribe_domain::Segment;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(name: &str, base_url: String, key: Option<&str>) -> LlmProvider {
        LlmProvider {
            name: name.to_string(),
            base_url,
            api_key: key.map(str::to_string),
            model: "test-model".to_string(),
        }
    }

    fn reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("acrcloud", Some("X".into()), Some("Gravity".into()), 0.82),
            Candidate::new("audd", Some("X".into()), Some("Purple Noise".into()), 0.60),
        ]
    }

    fn context() -> ArbitrationContext {
        ArbitrationContext {
            segment: Segment::new(2, 60.0, 105.0),
        }
    }

    #[test]
    fn finds_array_inside_prose() {
        let text = "Sure! Here you go:\n[{\"artist\": \"X\"}]\nHope that helps.";
        assert_eq!(json_array_slice(text), Some("[{\"artist\": \"X\"}]"));
        assert_eq!(json_array_slice("no json here"), None);
        assert_eq!(json_array_slice("] backwards ["), None);
    }

    #[test]
    fn unavailable_without_keys() {
        let advisor = LlmAdvisor::new(
            vec![provider("together", "https://api.together.xyz/v1".into(), None)],
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!advisor.is_available());
    }

    #[tokio::test]
    async fn rank_follows_model_order_and_drops_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(
                r#"[{"artist":"x","title":"purple noise","is_valid":true},
                    {"artist":"X","title":"Gravity","is_valid":false}]"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let advisor = LlmAdvisor::new(
            vec![provider("together", server.uri(), Some("secret"))],
            Duration::from_secs(5),
        )
        .unwrap();

        let ranked = advisor.rank(&candidates(), &context()).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title.as_deref(), Some("Purple Noise"));
        assert_eq!(ranked[0].source, "audd");
    }

    #[tokio::test]
    async fn falls_through_to_next_provider() {
        let failing = MockServer::start().await;
        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&failing)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(
                r#"[{"artist":"X","title":"Gravity"}]"#,
            )))
            .expect(1)
            .mount(&healthy)
            .await;

        let advisor = LlmAdvisor::new(
            vec![
                provider("skipped", "https://unused.example".into(), None),
                provider("together", failing.uri(), Some("a")),
                provider("openai", healthy.uri(), Some("b")),
            ],
            Duration::from_secs(5),
        )
        .unwrap();

        let ranked = advisor.rank(&candidates(), &context()).await.unwrap();
        assert_eq!(ranked[0].title.as_deref(), Some("Gravity"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("I am not sure.")))
            .mount(&server)
            .await;

        let advisor = LlmAdvisor::new(
            vec![provider("together", server.uri(), Some("k"))],
            Duration::from_secs(5),
        )
        .unwrap();

        let result = advisor.rank(&candidates(), &context()).await;
        assert!(matches!(result, Err(AdvisoryError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn merge_variants_maps_back_to_input_tracks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(
                r#"[{"artist":"Bicep","title":"Glue"},{"artist":"Made Up","title":"Song"}]"#,
            )))
            .mount(&server)
            .await;

        let glue = Candidate::new("acrcloud", Some("Bicep".into()), Some("Glue".into()), 0.9);
        let remix = Candidate::new(
            "shazam",
            Some("Bicep".into()),
            Some("Glue (Extended Mix)".into()),
            0.85,
        );
        let tracks = vec![
            Track::from_candidate(&glue, &Segment::new(0, 0.0, 45.0)),
            Track::from_candidate(&remix, &Segment::new(1, 30.0, 75.0)),
        ];

        let advisor = LlmAdvisor::new(
            vec![provider("together", server.uri(), Some("k"))],
            Duration::from_secs(5),
        )
        .unwrap();
        let merged = advisor.merge_variants(&tracks).await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Glue");
        assert_eq!(merged[0].segment_index, 0);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("[]"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let advisor = LlmAdvisor::new(
            vec![provider("together", server.uri(), Some("k"))],
            Duration::from_millis(50),
        )
        .unwrap();
        let result = advisor.rank(&candidates(), &context()).await;
        assert!(matches!(result, Err(AdvisoryError::Timeout(_))));
    }
}
