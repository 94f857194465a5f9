// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use mixscribe_config::AppConfig;

pub mod cascade;
pub mod config;
pub mod dedup;
pub mod error;
pub mod merger;
pub mod output;
pub mod pipeline;
pub mod segmenter;
pub mod services;

pub use cascade::{CascadeOutcome, CascadeState, RecognizerCascade};
pub use config::RunConfig;
pub use dedup::{DedupOutcome, Deduplicator};
pub use error::{PipelineError, Result};
pub use merger::{MergeOutcome, ResultMerger};
pub use output::{render, OutputFormat, UnknownFormat};
pub use pipeline::{Pipeline, RunReport};
pub use segmenter::{segment, SegmentPlan, Segments};

use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Build the pipeline's clients from `config`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let pipeline = services::build_pipeline(&config)?;
        Ok(Self::new(config, pipeline))
    }

    /// Per-run settings derived from the loaded configuration.
    pub fn run_config(&self) -> RunConfig {
        RunConfig::from(&self.config)
    }

    pub fn on_start(&self) {
        info!(
            target: "application",
            recognizers_available = self.pipeline.has_available_recognizer(),
            "application state initialized"
        );
    }
}
