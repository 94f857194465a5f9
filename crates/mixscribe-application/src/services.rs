// SPDX-License-Identifier: GPL-3.0-or-later

//! Wiring of concrete clients from configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mixscribe_advisory::{AdvisorChain, LlmAdvisor, LlmProvider, VariantAdvisor};
use mixscribe_config::{AdvisoryConfig, AppConfig, ExtractionConfig, RecognizersConfig};
use mixscribe_domain::{Advisor, Recognizer};
use mixscribe_extraction::{ExtractorSettings, FfmpegExtractor};
use mixscribe_recognition::{AcrCloudClient, AuddClient, ShazamClient};
use tracing::info;

use crate::pipeline::Pipeline;

pub fn build_recognizers(
    config: &RecognizersConfig,
    timeout: Duration,
) -> Result<Vec<Arc<dyn Recognizer>>> {
    let acr = &config.acrcloud;
    let mut acrcloud =
        AcrCloudClient::builder(acr.access_key.clone(), acr.secret_key.clone())
            .timeout(timeout)
            .min_interval(Duration::from_millis(acr.min_interval_ms));
    acrcloud = if acr.base_urls.is_empty() {
        acrcloud.regions(&acr.regions)
    } else {
        acrcloud.endpoints(acr.base_urls.iter().cloned())
    };
    let acrcloud = acrcloud.build().context("failed to build ACRCloud client")?;

    let mut shazam = ShazamClient::builder(config.shazam.api_key.clone())
        .timeout(timeout)
        .min_interval(Duration::from_millis(config.shazam.min_interval_ms));
    if let Some(base_url) = &config.shazam.base_url {
        shazam = shazam.base_url(base_url.clone());
    }
    let shazam = shazam.build().context("failed to build Shazam client")?;

    let mut audd = AuddClient::builder(config.audd.api_token.clone())
        .timeout(timeout)
        .min_interval(Duration::from_millis(config.audd.min_interval_ms));
    if let Some(base_url) = &config.audd.base_url {
        audd = audd.base_url(base_url.clone());
    }
    let audd = audd.build().context("failed to build AudD client")?;

    let recognizers: Vec<Arc<dyn Recognizer>> =
        vec![Arc::new(acrcloud), Arc::new(shazam), Arc::new(audd)];

    for recognizer in &recognizers {
        info!(
            target: "application",
            recognizer = recognizer.id(),
            available = recognizer.is_available(),
            "recognizer registered"
        );
    }
    Ok(recognizers)
}

pub fn build_extractor(config: &ExtractionConfig) -> FfmpegExtractor {
    FfmpegExtractor::new(ExtractorSettings {
        ffmpeg_path: PathBuf::from(&config.ffmpeg_path),
        ffprobe_path: PathBuf::from(&config.ffprobe_path),
        sample_rate: config.sample_rate,
        channels: config.channels,
        timeout: Duration::from_secs(config.timeout_secs),
    })
}

/// LLM providers first, then the heuristic variant advisor when enabled.
pub fn build_advisor(config: &AdvisoryConfig) -> Result<Option<Arc<dyn Advisor>>> {
    if !config.enabled {
        return Ok(None);
    }

    let mut chain = AdvisorChain::default();

    let providers: Vec<LlmProvider> = config
        .providers
        .iter()
        .map(|p| LlmProvider {
            name: p.name.clone(),
            base_url: p.base_url.clone(),
            api_key: p.api_key.clone(),
            model: p.model.clone(),
        })
        .collect();
    if !providers.is_empty() {
        let llm = LlmAdvisor::new(providers, Duration::from_secs(config.timeout_secs))
            .context("failed to build LLM advisor")?;
        chain.push(Arc::new(llm));
    }

    if config.heuristic_fallback {
        chain.push(Arc::new(VariantAdvisor::default()));
    }

    if chain.is_empty() {
        return Ok(None);
    }

    info!(target: "application", advisors = ?chain, available = chain.is_available(), "advisory configured");
    Ok(Some(Arc::new(chain)))
}

pub fn build_pipeline(config: &AppConfig) -> Result<Pipeline> {
    let recognizers = build_recognizers(
        &config.recognizers,
        Duration::from_secs(config.pipeline.recognizer_timeout_secs),
    )?;
    let extractor = Arc::new(build_extractor(&config.extraction));

    let mut pipeline = Pipeline::new(extractor, recognizers);
    if let Some(advisor) = build_advisor(&config.advisory)? {
        pipeline = pipeline.with_advisor(advisor);
    }
    Ok(pipeline)
}
