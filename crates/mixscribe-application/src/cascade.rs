// SPDX-License-Identifier: GPL-3.0-or-later

//! Priority-ordered recognizer fallback for a single segment.
//!
//! Recognizers are called one at a time until the best answer so far clears
//! the confidence threshold. Failures never stop the cascade; they are
//! returned as diagnostic entries alongside whatever candidates were found.

use std::sync::Arc;
use std::time::Duration;

use mixscribe_domain::{
    Candidate, DiagnosticEntry, Recognizer, RecognizerError, Segment, SegmentClip,
};
use tracing::{debug, warn};

/// Progress of one segment's cascade. Indexes point into the collected
/// candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    NoCandidate,
    HasCandidate(usize),
    Confident(usize),
}

impl CascadeState {
    /// Fold the candidate at `index` into the state. The earlier candidate
    /// stays best on equal confidence.
    fn observe(self, candidates: &[Candidate], index: usize, threshold: f32) -> Self {
        let best = match self {
            CascadeState::NoCandidate => index,
            CascadeState::HasCandidate(current) | CascadeState::Confident(current) => {
                if candidates[index].confidence() > candidates[current].confidence() {
                    index
                } else {
                    current
                }
            }
        };

        if candidates[best].confidence() >= threshold {
            CascadeState::Confident(best)
        } else {
            CascadeState::HasCandidate(best)
        }
    }

    pub fn is_confident(self) -> bool {
        matches!(self, CascadeState::Confident(_))
    }

    pub fn best(self) -> Option<usize> {
        match self {
            CascadeState::NoCandidate => None,
            CascadeState::HasCandidate(index) | CascadeState::Confident(index) => Some(index),
        }
    }
}

/// Everything one cascade produced.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    /// Candidates in call order.
    pub candidates: Vec<Candidate>,
    pub failures: Vec<DiagnosticEntry>,
    pub attempted: usize,
    pub failed: usize,
    pub state: CascadeState,
}

impl CascadeOutcome {
    pub fn best(&self) -> Option<&Candidate> {
        self.state.best().map(|index| &self.candidates[index])
    }

    /// True when calls were made and every one of them failed.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed == self.attempted
    }
}

pub struct RecognizerCascade {
    recognizers: Vec<Arc<dyn Recognizer>>,
    threshold: f32,
    timeout: Duration,
}

impl RecognizerCascade {
    /// `recognizers` must already be in priority order.
    pub fn new(recognizers: Vec<Arc<dyn Recognizer>>, threshold: f32, timeout: Duration) -> Self {
        Self {
            recognizers,
            threshold,
            timeout,
        }
    }

    pub fn recognizer_ids(&self) -> Vec<&str> {
        self.recognizers.iter().map(|r| r.id()).collect()
    }

    pub async fn identify(&self, clip: &SegmentClip, segment: &Segment) -> CascadeOutcome {
        let mut outcome = CascadeOutcome {
            candidates: Vec::new(),
            failures: Vec::new(),
            attempted: 0,
            failed: 0,
            state: CascadeState::NoCandidate,
        };

        for recognizer in &self.recognizers {
            if outcome.state.is_confident() {
                break;
            }
            if !recognizer.is_available() {
                debug!(target: "cascade", segment = segment.index, recognizer = recognizer.id(), "skipping unavailable recognizer");
                continue;
            }

            outcome.attempted += 1;
            let result = tokio::time::timeout(self.timeout, recognizer.recognize(clip, segment))
                .await
                .unwrap_or(Err(RecognizerError::Timeout(self.timeout)));

            match result {
                Ok(Some(candidate)) => {
                    debug!(
                        target: "cascade",
                        segment = segment.index,
                        recognizer = recognizer.id(),
                        confidence = candidate.confidence(),
                        "candidate"
                    );
                    outcome.candidates.push(candidate);
                    let index = outcome.candidates.len() - 1;
                    outcome.state = outcome.state.observe(&outcome.candidates, index, self.threshold);
                }
                Ok(None) => {
                    debug!(target: "cascade", segment = segment.index, recognizer = recognizer.id(), "no match");
                }
                Err(error) => {
                    warn!(target: "cascade", segment = segment.index, recognizer = recognizer.id(), error = %error, "recognizer failed");
                    outcome.failed += 1;
                    outcome.failures.push(DiagnosticEntry::recognizer(
                        segment.index,
                        recognizer.id(),
                        error.to_string(),
                    ));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Match(&'static str, f32),
        NoMatch,
        Fail,
        Hang,
    }

    struct Scripted {
        id: &'static str,
        available: bool,
        reply: Reply,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(id: &'static str, reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                id,
                available: true,
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn offline(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                available: false,
                reply: Reply::NoMatch,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Recognizer for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn recognize(
            &self,
            _clip: &SegmentClip,
            _segment: &Segment,
        ) -> Result<Option<Candidate>, RecognizerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Match(title, confidence) => Ok(Some(Candidate::new(
                    self.id,
                    Some("X".into()),
                    Some(title.into()),
                    confidence,
                ))),
                Reply::NoMatch => Ok(None),
                Reply::Fail => Err(RecognizerError::Transport("connection refused".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(None)
                }
            }
        }
    }

    fn cascade(recognizers: Vec<Arc<Scripted>>) -> RecognizerCascade {
        let recognizers = recognizers
            .into_iter()
            .map(|r| r as Arc<dyn Recognizer>)
            .collect();
        RecognizerCascade::new(recognizers, 0.5, Duration::from_millis(100))
    }

    fn clip() -> SegmentClip {
        SegmentClip::borrowed("/tmp/segment_test.wav")
    }

    fn segment() -> Segment {
        Segment::new(0, 0.0, 45.0)
    }

    #[tokio::test]
    async fn stops_at_first_confident_answer() {
        let first = Scripted::new("acrcloud", Reply::Match("Gravity", 0.82));
        let second = Scripted::new("shazam", Reply::Match("Gravity", 0.85));
        let outcome = cascade(vec![first.clone(), second.clone()])
            .identify(&clip(), &segment())
            .await;

        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.state, CascadeState::Confident(0));
        assert_eq!(outcome.best().unwrap().source, "acrcloud");
    }

    #[tokio::test]
    async fn continues_past_weak_answers_and_failures() {
        let weak = Scripted::new("acrcloud", Reply::Match("Purple Noise", 0.3));
        let broken = Scripted::new("shazam", Reply::Fail);
        let strong = Scripted::new("audd", Reply::Match("Gravity", 0.9));
        let outcome = cascade(vec![weak, broken, strong])
            .identify(&clip(), &segment())
            .await;

        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.state, CascadeState::Confident(1));
        assert_eq!(outcome.failures[0].recognizer.as_deref(), Some("shazam"));
    }

    #[tokio::test]
    async fn unavailable_recognizers_are_skipped_silently() {
        let offline = Scripted::offline("acrcloud");
        let online = Scripted::new("audd", Reply::NoMatch);
        let outcome = cascade(vec![offline.clone(), online])
            .identify(&clip(), &segment())
            .await;

        assert_eq!(offline.calls(), 0);
        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.state, CascadeState::NoCandidate);
    }

    #[tokio::test]
    async fn slow_recognizer_times_out() {
        let slow = Scripted::new("acrcloud", Reply::Hang);
        let fallback = Scripted::new("audd", Reply::Match("Gravity", 0.7));
        let outcome = cascade(vec![slow, fallback])
            .identify(&clip(), &segment())
            .await;

        assert_eq!(outcome.failed, 1);
        assert!(outcome.failures[0].message.contains("timed out"));
        assert_eq!(outcome.best().unwrap().source, "audd");
    }

    #[tokio::test]
    async fn weak_answers_keep_earliest_best() {
        let a = Scripted::new("acrcloud", Reply::Match("A", 0.3));
        let b = Scripted::new("shazam", Reply::Match("B", 0.3));
        let outcome = cascade(vec![a, b]).identify(&clip(), &segment()).await;
        assert_eq!(outcome.state, CascadeState::HasCandidate(0));
    }

    #[tokio::test]
    async fn all_failed_only_when_every_call_failed() {
        let outcome = cascade(vec![
            Scripted::new("acrcloud", Reply::Fail),
            Scripted::new("audd", Reply::Fail),
        ])
        .identify(&clip(), &segment())
        .await;
        assert!(outcome.all_failed());

        let empty = cascade(vec![]).identify(&clip(), &segment()).await;
        assert!(!empty.all_failed());
    }
}
