// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use mixscribe_api::router;
use mixscribe_application::{AppState, Pipeline};
use mixscribe_config::AppConfig;
use mixscribe_domain::{
    AudioSource, Candidate, ExtractionError, Extractor, Recognizer, RecognizerError, Segment,
    SegmentClip,
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct FixedExtractor {
    duration: Option<f64>,
    resolved: Mutex<Vec<PathBuf>>,
}

impl FixedExtractor {
    fn resolved(&self) -> Vec<PathBuf> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Extractor for FixedExtractor {
    async fn resolve(&self, path: &Path) -> Result<AudioSource, ExtractionError> {
        assert!(path.exists(), "upload must exist while the run resolves it");
        self.resolved.lock().unwrap().push(path.to_path_buf());
        match self.duration {
            Some(duration) => Ok(AudioSource::new(path, duration)),
            None => Err(ExtractionError::Probe("not audio".into())),
        }
    }

    async fn extract(
        &self,
        source: &AudioSource,
        _start: f64,
        _duration: f64,
    ) -> Result<SegmentClip, ExtractionError> {
        Ok(SegmentClip::borrowed(source.path()))
    }
}

/// Names the segment's track after its index; fails when `broken`.
struct IndexRecognizer {
    broken: bool,
}

#[async_trait::async_trait]
impl Recognizer for IndexRecognizer {
    fn id(&self) -> &str {
        "acrcloud"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn recognize(
        &self,
        _clip: &SegmentClip,
        segment: &Segment,
    ) -> Result<Option<Candidate>, RecognizerError> {
        if self.broken {
            return Err(RecognizerError::Api("quota exceeded".into()));
        }
        Ok(Some(Candidate::new(
            "acrcloud",
            Some("Artist".into()),
            Some(format!("Track {}", segment.index / 2)),
            0.9,
        )))
    }
}

fn app_with_limit(
    duration: Option<f64>,
    broken: bool,
    upload_limit: usize,
) -> (axum::Router, Arc<FixedExtractor>) {
    let extractor = Arc::new(FixedExtractor {
        duration,
        resolved: Mutex::new(Vec::new()),
    });
    let pipeline = Pipeline::new(
        extractor.clone(),
        vec![Arc::new(IndexRecognizer { broken }) as Arc<dyn Recognizer>],
    );
    let mut config = AppConfig::default();
    config.advisory.enabled = false;
    config.http.max_upload_bytes = upload_limit;
    (router(AppState::new(config, pipeline)), extractor)
}

fn app_with(duration: Option<f64>, broken: bool) -> axum::Router {
    app_with_limit(duration, broken, 1024 * 1024).0
}

fn unconfigured_app() -> axum::Router {
    router(AppState::from_config(AppConfig::default()).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

const BOUNDARY: &str = "mixscribe-boundary-7MA4YWxk";

enum Part<'a> {
    File(&'a str, Vec<u8>),
    Text(&'a str, &'a str),
}

fn post_recognize(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/recognize")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn mix(file_name: &str) -> Part<'_> {
    Part::File(file_name, b"ID3 not really audio".to_vec())
}

#[tokio::test]
async fn health_reports_ok() {
    let response = unconfigured_app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn status_without_credentials_reports_no_apis() {
    let response = unconfigured_app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "no_apis");

    let ids: Vec<&str> = body["recognizers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["acrcloud", "shazam", "audd"]);
    assert!(body["recognizers"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["available"] == false));
    // The heuristic advisor needs no credentials.
    assert_eq!(body["advisory"]["available"], true);
}

#[tokio::test]
async fn status_with_recognizer_reports_ready() {
    let response = app_with(Some(60.0), false)
        .oneshot(
            Request::builder()
                .uri("/api/v1/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["advisory"]["enabled"], false);
    assert_eq!(body["advisory"]["available"], false);
}

#[tokio::test]
async fn recognize_returns_tracklist() {
    // 100s at 45/15 gives segments 0..4; pairs share a title.
    let (app, extractor) = app_with_limit(Some(100.0), false, 1024 * 1024);
    let response = app.oneshot(post_recognize(&[mix("mix.MP3")])).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);
    assert_eq!(body["tracks"][0]["title"], "Track 0");
    assert_eq!(body["tracks"][0]["start_time"], "00:00:00");
    assert_eq!(body["tracks"][1]["title"], "Track 1");
    assert_eq!(body["tracks"][1]["start_time"], "00:01:00");
    assert_eq!(body["diagnostics"]["segments_planned"], 4);
    assert_eq!(body["diagnostics"]["cancelled"], false);

    let resolved = extractor.resolved();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].extension().unwrap(), "mp3");
    assert!(!resolved[0].exists(), "upload was left behind");
}

#[tokio::test]
async fn recognize_renders_text_formats() {
    let response = app_with(Some(100.0), false)
        .oneshot(post_recognize(&[Part::Text("format", "markdown"), mix("mix.wav")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let text = body_text(response).await;
    assert!(text.starts_with("## Tracklist\n\n00:00:00 - "));
    assert!(text.contains("| Artist - Track 0 (confidence: 90%)"));
    assert!(text.contains("| Artist - Track 1 (confidence: 90%)"));

    let response = app_with(Some(100.0), false)
        .oneshot(post_recognize(&[mix("mix.flac"), Part::Text("format", "csv")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.starts_with("start_time,end_time,artist,title,confidence,source\r\n"));
    assert_eq!(text.matches("\r\n").count(), 3);
}

#[tokio::test]
async fn recognize_applies_form_overrides() {
    let response = app_with(Some(100.0), false)
        .oneshot(post_recognize(&[
            mix("mix.mp3"),
            Part::Text("max_segments", "1"),
            Part::Text("confidence_threshold", "0.5"),
        ]))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["diagnostics"]["truncated"], true);
    assert_eq!(body["diagnostics"]["errors"][0]["kind"], "truncation");
}

#[tokio::test]
async fn invalid_window_is_bad_request() {
    let response = app_with(Some(100.0), false)
        .oneshot(post_recognize(&[
            mix("mix.mp3"),
            Part::Text("segment_length", "30"),
            Part::Text("segment_overlap", "30"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn malformed_number_is_bad_request() {
    let response = app_with(Some(100.0), false)
        .oneshot(post_recognize(&[
            Part::Text("confidence_threshold", "high"),
            mix("mix.mp3"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid confidence_threshold: high");
}

#[tokio::test]
async fn missing_file_is_bad_request() {
    let response = app_with(Some(100.0), false)
        .oneshot(post_recognize(&[Part::Text("format", "json")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No file uploaded");
}

#[tokio::test]
async fn unsupported_file_type_is_bad_request() {
    let (app, extractor) = app_with_limit(Some(100.0), false, 1024 * 1024);
    let response = app
        .oneshot(post_recognize(&[mix("notes.txt")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid file type. Allowed: mp3, wav"));
    assert!(extractor.resolved().is_empty());
}

#[tokio::test]
async fn unknown_format_is_bad_request() {
    let response = app_with(Some(100.0), false)
        .oneshot(post_recognize(&[mix("mix.mp3"), Part::Text("format", "xml")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let (app, extractor) = app_with_limit(Some(100.0), false, 1024);
    let response = app
        .oneshot(post_recognize(&[Part::File("mix.mp3", vec![0u8; 8 * 1024])]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["success"], false);
    assert!(extractor.resolved().is_empty());
}

#[tokio::test]
async fn unreadable_upload_is_unprocessable() {
    let (app, extractor) = app_with_limit(None, false, 1024 * 1024);
    let response = app.oneshot(post_recognize(&[mix("mix.ogg")])).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not audio"));
    assert!(!extractor.resolved()[0].exists());
}

#[tokio::test]
async fn no_recognizer_is_service_unavailable() {
    let response = unconfigured_app()
        .oneshot(post_recognize(&[mix("mix.mp3")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn exhausted_recognizers_include_diagnostics() {
    let response = app_with(Some(100.0), true)
        .oneshot(post_recognize(&[mix("mix.mp3")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["diagnostics"]["recognizer_failures"], 4);
}

#[tokio::test]
async fn openapi_document_lists_endpoints() {
    let response = unconfigured_app()
        .oneshot(
            Request::builder()
                .uri("/api-doc/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/api/v1/recognize"]["post"]["requestBody"]["content"]
        ["multipart/form-data"]
        .is_object());
    assert!(body["paths"]["/api/v1/status"]["get"].is_object());
    assert!(body["paths"]["/health"]["get"].is_object());
}
