// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-segment reduction of candidates to at most one track.

use std::sync::Arc;
use std::time::Duration;

use mixscribe_domain::{
    Advisor, ArbitrationContext, Candidate, DiagnosticEntry, Segment, Track,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub track: Option<Track>,
    /// Set when arbitration was attempted and could not be used.
    pub advisory_failure: Option<DiagnosticEntry>,
}

#[derive(Clone)]
pub struct ResultMerger {
    advisor: Option<Arc<dyn Advisor>>,
    advisory_timeout: Duration,
}

impl ResultMerger {
    pub fn new(advisor: Option<Arc<dyn Advisor>>, advisory_timeout: Duration) -> Self {
        Self {
            advisor,
            advisory_timeout,
        }
    }

    pub fn without_advisor() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub async fn merge(
        &self,
        candidates: Vec<Candidate>,
        segment: &Segment,
        threshold: f32,
    ) -> MergeOutcome {
        let qualifying: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.confidence() >= threshold)
            .collect();

        let Some(first) = qualifying.first() else {
            return MergeOutcome::default();
        };

        let first_key = first.key();
        let agree = qualifying.iter().all(|c| c.key() == first_key);

        let mut advisory_failure = None;
        let winner = if agree {
            best_of(&qualifying)
        } else {
            match self.arbitrate(&qualifying, segment).await {
                Ok(winner) => Some(winner),
                Err(reason) => {
                    debug!(target: "merger", segment = segment.index, reason = %reason, "falling back to highest confidence");
                    advisory_failure = reason.into_entry(segment.index);
                    best_of(&qualifying)
                }
            }
        };

        MergeOutcome {
            track: winner.map(|c| Track::from_candidate(c, segment)),
            advisory_failure,
        }
    }

    async fn arbitrate<'a>(
        &self,
        qualifying: &'a [Candidate],
        segment: &Segment,
    ) -> Result<&'a Candidate, Fallback> {
        let advisor = self
            .advisor
            .as_ref()
            .filter(|a| a.is_available())
            .ok_or(Fallback::NoAdvisor)?;

        let context = ArbitrationContext { segment: *segment };
        let ranked = tokio::time::timeout(self.advisory_timeout, advisor.rank(qualifying, &context))
            .await
            .map_err(|_| Fallback::Failed(format!("timed out after {:?}", self.advisory_timeout)))?
            .map_err(|e| Fallback::Failed(e.to_string()))?;

        // Only the advisor's ordering is used; the winning values come from
        // the original candidate.
        ranked
            .iter()
            .find_map(|r| {
                let key = r.key();
                qualifying
                    .iter()
                    .find(|c| c.source == r.source && c.key() == key)
            })
            .map(|winner| {
                debug!(target: "merger", segment = segment.index, source = %winner.source, advisor = advisor.name(), "arbitrated conflict");
                winner
            })
            .ok_or(Fallback::Unusable)
    }
}

enum Fallback {
    NoAdvisor,
    Failed(String),
    Unusable,
}

impl std::fmt::Display for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fallback::NoAdvisor => write!(f, "no advisor available"),
            Fallback::Failed(message) => write!(f, "arbitration failed: {}", message),
            Fallback::Unusable => write!(f, "arbitration returned no known candidate"),
        }
    }
}

impl Fallback {
    fn into_entry(self, segment_index: usize) -> Option<DiagnosticEntry> {
        match self {
            Fallback::NoAdvisor => None,
            other => {
                warn!(target: "merger", segment = segment_index, "{}", other);
                Some(DiagnosticEntry::advisory(Some(segment_index), other.to_string()))
            }
        }
    }
}

/// Highest confidence; the earliest candidate wins ties.
fn best_of(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().fold(None, |best: Option<&Candidate>, c| match best {
        Some(b) if b.confidence() >= c.confidence() => Some(b),
        _ => Some(c),
    })
}
