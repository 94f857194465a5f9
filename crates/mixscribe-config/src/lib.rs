// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, uploads included.
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5150,
            max_upload_bytes: 200 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Segmentation, cascade and merge settings for identification runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub segment_length_secs: f64,
    pub segment_overlap_secs: f64,
    pub confidence_threshold: f32,
    pub max_segments: Option<usize>,
    pub concurrency: usize,
    pub recognizer_priority: Vec<String>,
    pub recognizer_timeout_secs: u64,
    pub max_error_samples: usize,
    pub run_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_length_secs: 45.0,
            segment_overlap_secs: 15.0,
            confidence_threshold: 0.5,
            max_segments: None,
            concurrency: 4,
            recognizer_priority: vec![
                "acrcloud".to_string(),
                "shazam".to_string(),
                "audd".to_string(),
            ],
            recognizer_timeout_secs: 30,
            max_error_samples: 20,
            run_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcrCloudConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub regions: Vec<String>,
    /// Explicit identify hosts; when set, `regions` is ignored.
    pub base_urls: Vec<String>,
    pub min_interval_ms: u64,
}

impl Default for AcrCloudConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            regions: vec![
                "us-west-2".to_string(),
                "eu-west-1".to_string(),
                "ap-southeast-1".to_string(),
                "us-east-1".to_string(),
            ],
            base_urls: Vec::new(),
            min_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuddConfig {
    pub api_token: Option<String>,
    pub base_url: Option<String>,
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShazamConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecognizersConfig {
    pub acrcloud: AcrCloudConfig,
    pub audd: AuddConfig,
    pub shazam: ShazamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            sample_rate: 22050,
            channels: 1,
            timeout_secs: 30,
        }
    }
}

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub fuzzy_merge_min_tracks: usize,
    pub heuristic_fallback: bool,
    pub providers: Vec<LlmProviderConfig>,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 5,
            fuzzy_merge_min_tracks: 5,
            heuristic_fallback: true,
            providers: vec![
                LlmProviderConfig {
                    name: "together".to_string(),
                    base_url: "https://api.together.xyz/v1".to_string(),
                    api_key: None,
                    model: "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
                },
                LlmProviderConfig {
                    name: "openai".to_string(),
                    base_url: "https://api.openai.com/v1".to_string(),
                    api_key: None,
                    model: "gpt-3.5-turbo".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineConfig,
    pub recognizers: RecognizersConfig,
    pub extraction: ExtractionConfig,
    pub advisory: AdvisoryConfig,
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: MIXSCRIBE_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("MIXSCRIBE_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(target: "config", "configuration loaded");
    Ok(config)
}
