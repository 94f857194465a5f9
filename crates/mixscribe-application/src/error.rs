// SPDX-License-Identifier: GPL-3.0-or-later

use mixscribe_domain::{Diagnostics, ExtractionError};
use thiserror::Error;

/// Failures that abort an identification run.
///
/// Everything else (a segment that cannot be cut, a recognizer that times
/// out, an advisor that is offline) is recorded in [`Diagnostics`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No recognizer is available; configure at least one API credential")]
    NoRecognizerAvailable,

    #[error("Cannot read source: {0}")]
    Source(#[from] ExtractionError),

    #[error("All {} recognizer calls failed", .diagnostics.recognizer_calls)]
    RecognizersExhausted { diagnostics: Box<Diagnostics> },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
