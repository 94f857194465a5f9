// SPDX-License-Identifier: GPL-3.0-or-later

//! Cross-segment deduplication.
//!
//! The exact pass always runs and keeps the first occurrence of each
//! normalized `(artist, title)` key. The optional variant pass asks the
//! advisor to collapse remixes and edits, and is only accepted when it maps
//! back onto the exact result and actually shrinks it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mixscribe_domain::{Advisor, DiagnosticEntry, Track, TrackKey, Tracklist};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub tracklist: Tracklist,
    pub advisory_failure: Option<DiagnosticEntry>,
}

#[derive(Clone)]
pub struct Deduplicator {
    advisor: Option<Arc<dyn Advisor>>,
    min_tracks: usize,
    advisory_timeout: Duration,
}

impl Deduplicator {
    pub fn new(
        advisor: Option<Arc<dyn Advisor>>,
        min_tracks: usize,
        advisory_timeout: Duration,
    ) -> Self {
        Self {
            advisor,
            min_tracks,
            advisory_timeout,
        }
    }

    pub fn exact_only() -> Self {
        Self::new(None, usize::MAX, Duration::ZERO)
    }

    pub async fn deduplicate(&self, tracks: Vec<Track>, allow_advanced_merge: bool) -> DedupOutcome {
        let exact = Tracklist::from_tracks(tracks);
        debug!(target: "dedup", tracks = exact.len(), "exact pass complete");

        if !allow_advanced_merge || exact.len() < self.min_tracks {
            return DedupOutcome {
                tracklist: exact,
                advisory_failure: None,
            };
        }

        let Some(advisor) = self.advisor.as_ref().filter(|a| a.is_available()) else {
            return DedupOutcome {
                tracklist: exact,
                advisory_failure: None,
            };
        };

        let merged = match tokio::time::timeout(
            self.advisory_timeout,
            advisor.merge_variants(exact.as_slice()),
        )
        .await
        {
            Ok(Ok(merged)) => merged,
            Ok(Err(error)) => return fallback(exact, format!("variant merge failed: {}", error)),
            Err(_) => {
                return fallback(
                    exact,
                    format!("variant merge timed out after {:?}", self.advisory_timeout),
                )
            }
        };

        let keep: HashSet<TrackKey> = merged.iter().map(Track::key).collect();
        let survivors: Vec<Track> = exact
            .iter()
            .filter(|t| keep.contains(&t.key()))
            .cloned()
            .collect();

        if survivors.is_empty() || survivors.len() >= exact.len() {
            debug!(target: "dedup", returned = merged.len(), matched = survivors.len(), "variant merge changed nothing usable");
            return DedupOutcome {
                tracklist: exact,
                advisory_failure: None,
            };
        }

        info!(
            target: "dedup",
            advisor = advisor.name(),
            before = exact.len(),
            after = survivors.len(),
            "collapsed track variants"
        );
        DedupOutcome {
            tracklist: Tracklist::from_tracks(survivors),
            advisory_failure: None,
        }
    }
}

fn fallback(exact: Tracklist, message: String) -> DedupOutcome {
    warn!(target: "dedup", "{}", message);
    DedupOutcome {
        tracklist: exact,
        advisory_failure: Some(DiagnosticEntry::advisory(None, message)),
    }
}
