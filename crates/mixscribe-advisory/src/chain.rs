// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use mixscribe_domain::{Advisor, AdvisoryError, ArbitrationContext, Candidate, Track};
use tracing::debug;

use crate::error::Result;

/// Tries advisors in order; the first successful, non-empty answer wins.
#[derive(Clone, Default)]
pub struct AdvisorChain {
    advisors: Vec<Arc<dyn Advisor>>,
}

impl std::fmt::Debug for AdvisorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.advisors.iter().map(|a| a.name()))
            .finish()
    }
}

impl AdvisorChain {
    pub fn new(advisors: Vec<Arc<dyn Advisor>>) -> Self {
        Self { advisors }
    }

    pub fn push(&mut self, advisor: Arc<dyn Advisor>) {
        self.advisors.push(advisor);
    }

    pub fn len(&self) -> usize {
        self.advisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.is_empty()
    }

    fn available(&self) -> impl Iterator<Item = &Arc<dyn Advisor>> {
        self.advisors.iter().filter(|a| a.is_available())
    }
}

#[async_trait::async_trait]
impl Advisor for AdvisorChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn is_available(&self) -> bool {
        self.available().next().is_some()
    }

    async fn rank(
        &self,
        candidates: &[Candidate],
        context: &ArbitrationContext,
    ) -> Result<Vec<Candidate>> {
        let mut last_error = AdvisoryError::Unavailable;
        for advisor in self.available() {
            match advisor.rank(candidates, context).await {
                Ok(ranked) if !ranked.is_empty() => return Ok(ranked),
                Ok(_) => {
                    debug!(target: "advisory", advisor = advisor.name(), "empty ranking");
                }
                Err(error) => {
                    debug!(target: "advisory", advisor = advisor.name(), error = %error, "ranking failed");
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    async fn merge_variants(&self, tracks: &[Track]) -> Result<Vec<Track>> {
        let mut last_error = AdvisoryError::Unavailable;
        for advisor in self.available() {
            match advisor.merge_variants(tracks).await {
                Ok(merged) if !merged.is_empty() => return Ok(merged),
                Ok(_) => {
                    debug!(target: "advisory", advisor = advisor.name(), "empty merge");
                }
                Err(error) => {
                    debug!(target: "advisory", advisor = advisor.name(), error = %error, "merge failed");
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}
