// SPDX-License-Identifier: GPL-3.0-or-later

//! Identification run orchestration.
//!
//! A run resolves the source, plans the segments, and processes them through
//! a bounded pool of concurrent segment tasks. Each task owns one extracted
//! clip for the duration of its recognizer cascade. Results are reordered by
//! segment start before the deduplication pass, so completion order never
//! shows in the output.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use mixscribe_domain::{
    Advisor, AudioSource, DiagnosticEntry, DiagnosticKind, Diagnostics, Extractor, Recognizer,
    Segment, Track, Tracklist,
};
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::cascade::{CascadeOutcome, RecognizerCascade};
use crate::config::RunConfig;
use crate::dedup::Deduplicator;
use crate::error::{PipelineError, Result};
use crate::merger::ResultMerger;
use crate::segmenter::SegmentPlan;

/// The tracklist of one run and how it was obtained.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tracklist: Tracklist,
    pub diagnostics: Diagnostics,
}

/// What one segment task hands back to the run.
#[derive(Debug)]
struct SegmentOutcome {
    segment: Segment,
    track: Option<Track>,
    extraction_failure: Option<DiagnosticEntry>,
    cascade: Option<CascadeOutcome>,
    advisory_failure: Option<DiagnosticEntry>,
}

pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    recognizers: Vec<Arc<dyn Recognizer>>,
    advisor: Option<Arc<dyn Advisor>>,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn Extractor>, recognizers: Vec<Arc<dyn Recognizer>>) -> Self {
        Self {
            extractor,
            recognizers,
            advisor: None,
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn recognizers(&self) -> &[Arc<dyn Recognizer>] {
        &self.recognizers
    }

    pub fn advisor(&self) -> Option<&Arc<dyn Advisor>> {
        self.advisor.as_ref()
    }

    pub fn has_available_recognizer(&self) -> bool {
        self.recognizers.iter().any(|r| r.is_available())
    }

    /// Recognizers named in `priority` come first, in that order; the rest
    /// follow in registration order. Unavailable ones are dropped.
    fn ordered_recognizers(&self, priority: &[String]) -> Vec<Arc<dyn Recognizer>> {
        let rank = |r: &Arc<dyn Recognizer>| {
            priority
                .iter()
                .position(|id| id.eq_ignore_ascii_case(r.id()))
                .unwrap_or(priority.len())
        };

        let mut ordered: Vec<Arc<dyn Recognizer>> = self
            .recognizers
            .iter()
            .filter(|r| r.is_available())
            .cloned()
            .collect();
        ordered.sort_by_key(|r| rank(r));
        ordered
    }

    /// Identify the tracks in the recording at `path`.
    ///
    /// Cancelling `cancel` (or reaching the configured run timeout) stops the
    /// run early and returns what was gathered so far with
    /// `diagnostics.cancelled` set.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn run(
        &self,
        path: &Path,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        config.validate()?;

        let recognizers = self.ordered_recognizers(&config.recognizer_priority);
        if recognizers.is_empty() {
            return Err(PipelineError::NoRecognizerAvailable);
        }

        let source = self.extractor.resolve(path).await?;
        let mut diagnostics = Diagnostics::new(config.max_error_samples);

        let plan = SegmentPlan::new(
            source.duration_secs(),
            config.segment_length,
            config.segment_overlap,
        )?;
        let planned = plan.len();
        diagnostics.segments_planned = planned;

        let mut limit = planned;
        if let Some(max) = config.max_segments.filter(|max| planned > *max) {
            warn!(target: "pipeline", planned, max, "truncating segment plan");
            diagnostics.truncated = true;
            diagnostics.record(DiagnosticEntry::run(
                DiagnosticKind::Truncation,
                format!("processing {} of {} segments", max, planned),
            ));
            limit = max;
        }

        info!(
            target: "pipeline",
            duration_secs = source.duration_secs(),
            segments = limit,
            recognizers = ?recognizers.iter().map(|r| r.id()).collect::<Vec<_>>(),
            concurrency = config.concurrency,
            "starting run"
        );

        let advisor = self.advisor.clone().filter(|_| config.advisory_enabled);
        let worker = SegmentWorker {
            extractor: Arc::clone(&self.extractor),
            source,
            cascade: Arc::new(RecognizerCascade::new(
                recognizers,
                config.confidence_threshold,
                config.recognizer_timeout,
            )),
            merger: Arc::new(ResultMerger::new(advisor.clone(), config.advisory_timeout)),
            threshold: config.confidence_threshold,
        };

        let mut pending = plan.iter().take(limit);
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<task::Id, Segment> = HashMap::new();
        for segment in pending.by_ref().take(config.concurrency) {
            worker.spawn(&mut tasks, &mut in_flight, segment);
        }

        let deadline = async {
            match config.run_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut tracks = Vec::new();
        let cancelled = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break Some("run cancelled".to_string());
                }
                _ = &mut deadline => {
                    break Some(format!(
                        "run timed out after {:?}",
                        config.run_timeout.unwrap_or_default()
                    ));
                }
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((id, outcome))) => {
                        in_flight.remove(&id);
                        absorb(outcome, &mut tracks, &mut diagnostics);
                    }
                    Some(Err(error)) => {
                        let segment = in_flight.remove(&error.id());
                        absorb_abnormal(segment, error, &mut diagnostics);
                    }
                    None => break None,
                },
            }

            if let Some(segment) = pending.next() {
                worker.spawn(&mut tasks, &mut in_flight, segment);
            }
        };

        // Waits for aborted tasks to drop, so their clips are gone before
        // the run returns.
        tasks.shutdown().await;

        if let Some(reason) = &cancelled {
            warn!(target: "pipeline", completed = diagnostics.segments_attempted, "{}", reason);
            diagnostics.cancelled = true;
            diagnostics.record(DiagnosticEntry::run(DiagnosticKind::Cancellation, reason.clone()));
        }

        if !diagnostics.cancelled
            && diagnostics.recognizer_calls > 0
            && diagnostics.recognizer_failures == diagnostics.recognizer_calls
        {
            warn!(target: "pipeline", calls = diagnostics.recognizer_calls, "every recognizer call failed");
            return Err(PipelineError::RecognizersExhausted {
                diagnostics: Box::new(diagnostics),
            });
        }

        tracks.sort_by(|a: &Track, b: &Track| {
            a.offset_secs
                .total_cmp(&b.offset_secs)
                .then(a.segment_index.cmp(&b.segment_index))
        });

        // A cancelled run returns promptly, so the advisory pass is skipped.
        let allow_advanced = config.advisory_enabled && !diagnostics.cancelled;
        let deduplicator = Deduplicator::new(
            advisor,
            config.fuzzy_merge_min_tracks,
            config.advisory_timeout,
        );
        let dedup = deduplicator.deduplicate(tracks, allow_advanced).await;
        if let Some(entry) = dedup.advisory_failure {
            diagnostics.record(entry);
        }

        info!(
            target: "pipeline",
            tracks = dedup.tracklist.len(),
            attempted = diagnostics.segments_attempted,
            succeeded = diagnostics.segments_succeeded,
            failed = diagnostics.segments_failed,
            errors = diagnostics.error_count,
            cancelled = diagnostics.cancelled,
            "run complete"
        );

        Ok(RunReport {
            tracklist: dedup.tracklist,
            diagnostics,
        })
    }
}

/// Owned inputs of one segment task.
#[derive(Clone)]
struct SegmentWorker {
    extractor: Arc<dyn Extractor>,
    source: AudioSource,
    cascade: Arc<RecognizerCascade>,
    merger: Arc<ResultMerger>,
    threshold: f32,
}

impl SegmentWorker {
    fn spawn(
        &self,
        tasks: &mut JoinSet<SegmentOutcome>,
        in_flight: &mut HashMap<task::Id, Segment>,
        segment: Segment,
    ) {
        let worker = self.clone();
        let handle = tasks.spawn(worker.process(segment).in_current_span());
        in_flight.insert(handle.id(), segment);
    }

    async fn process(self, segment: Segment) -> SegmentOutcome {
        let clip = match self
            .extractor
            .extract(&self.source, segment.start, segment.duration())
            .await
        {
            Ok(clip) => clip,
            Err(error) => {
                warn!(target: "pipeline", segment = segment.index, error = %error, "segment extraction failed");
                return SegmentOutcome {
                    segment,
                    track: None,
                    extraction_failure: Some(DiagnosticEntry::extraction(
                        segment.index,
                        error.to_string(),
                    )),
                    cascade: None,
                    advisory_failure: None,
                };
            }
        };

        let mut outcome = self.cascade.identify(&clip, &segment).await;
        drop(clip);

        let candidates = std::mem::take(&mut outcome.candidates);
        let merged = self
            .merger
            .merge(candidates, &segment, self.threshold)
            .await;

        debug!(
            target: "pipeline",
            segment = segment.index,
            calls = outcome.attempted,
            identified = merged.track.is_some(),
            "segment complete"
        );

        SegmentOutcome {
            segment,
            track: merged.track,
            extraction_failure: None,
            cascade: Some(outcome),
            advisory_failure: merged.advisory_failure,
        }
    }
}

fn absorb(outcome: SegmentOutcome, tracks: &mut Vec<Track>, diagnostics: &mut Diagnostics) {
    diagnostics.segments_attempted += 1;

    if let Some(entry) = outcome.extraction_failure {
        diagnostics.segments_failed += 1;
        diagnostics.record(entry);
        return;
    }

    if let Some(cascade) = outcome.cascade {
        diagnostics.recognizer_calls += cascade.attempted;
        diagnostics.recognizer_failures += cascade.failed;
        if cascade.all_failed() {
            diagnostics.segments_failed += 1;
        }
        for entry in cascade.failures {
            diagnostics.record(entry);
        }
    }

    if let Some(entry) = outcome.advisory_failure {
        diagnostics.record(entry);
    }

    if let Some(track) = outcome.track {
        debug!(target: "pipeline", segment = outcome.segment.index, artist = %track.artist, title = %track.title, "identified");
        diagnostics.segments_succeeded += 1;
        tracks.push(track);
    }
}

/// A task that panicked still counts as an attempted, failed segment.
fn absorb_abnormal(segment: Option<Segment>, failure: JoinError, diagnostics: &mut Diagnostics) {
    let message = if failure.is_panic() {
        format!("segment task panicked: {}", panic_message(failure))
    } else {
        format!("segment task stopped: {}", failure)
    };

    diagnostics.segments_attempted += 1;
    diagnostics.segments_failed += 1;
    match segment {
        Some(segment) => {
            error!(target: "pipeline", segment = segment.index, "{}", message);
            diagnostics.record(DiagnosticEntry::internal(segment.index, message));
        }
        None => {
            error!(target: "pipeline", "{}", message);
            diagnostics.record(DiagnosticEntry::run(DiagnosticKind::Internal, message));
        }
    }
}

fn panic_message(failure: JoinError) -> String {
    let payload = failure.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
