// SPDX-License-Identifier: GPL-3.0-or-later

//! Best-effort arbitration and variant merging.
//!
//! Every advisor here is optional: callers fall back to deterministic rules
//! whenever an advisor is unavailable, fails or answers with nothing usable.

pub mod chain;
pub mod error;
pub mod llm;
pub mod variant;

pub use chain::AdvisorChain;
pub use error::{AdvisoryError, Result};
pub use llm::{LlmAdvisor, LlmProvider};
pub use variant::{base_title, VariantAdvisor};
