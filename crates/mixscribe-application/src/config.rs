// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

use mixscribe_config::AppConfig;

use crate::error::{PipelineError, Result};

/// Settings for one identification run. Built once, then only read.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub segment_length: f64,
    pub segment_overlap: f64,
    pub confidence_threshold: f32,
    pub max_segments: Option<usize>,
    pub recognizer_priority: Vec<String>,
    pub advisory_enabled: bool,
    pub concurrency: usize,
    pub recognizer_timeout: Duration,
    pub advisory_timeout: Duration,
    pub fuzzy_merge_min_tracks: usize,
    pub max_error_samples: usize,
    pub run_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            segment_length: pipeline.segment_length_secs,
            segment_overlap: pipeline.segment_overlap_secs,
            confidence_threshold: pipeline.confidence_threshold,
            max_segments: pipeline.max_segments,
            recognizer_priority: pipeline.recognizer_priority.clone(),
            advisory_enabled: config.advisory.enabled,
            concurrency: pipeline.concurrency,
            recognizer_timeout: Duration::from_secs(pipeline.recognizer_timeout_secs),
            advisory_timeout: Duration::from_secs(config.advisory.timeout_secs),
            fuzzy_merge_min_tracks: config.advisory.fuzzy_merge_min_tracks,
            max_error_samples: pipeline.max_error_samples,
            run_timeout: pipeline.run_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.segment_length, self.segment_overlap)?;

        if !self.confidence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_segments == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "max segments must be at least 1 when set".to_string(),
            ));
        }
        if self.recognizer_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "recognizer timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Window length must be positive and the overlap strictly shorter than it.
pub(crate) fn validate_window(length: f64, overlap: f64) -> Result<()> {
    if !length.is_finite() || length <= 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "segment length must be a positive number of seconds, got {}",
            length
        )));
    }
    if !overlap.is_finite() || overlap < 0.0 || overlap >= length {
        return Err(PipelineError::InvalidConfig(format!(
            "segment overlap must be within [0, {}), got {}",
            length, overlap
        )));
    }
    Ok(())
}
