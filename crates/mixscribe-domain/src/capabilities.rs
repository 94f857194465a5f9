// SPDX-License-Identifier: GPL-3.0-or-later

//! Capability contracts implemented outside the core pipeline.
//!
//! - [`Recognizer`]: a fingerprint-recognition service queried per segment
//! - [`Extractor`]: resolves a source recording and cuts segment clips
//! - [`Advisor`]: optional, best-effort arbitration and variant merging

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempPath;
use thiserror::Error;

use crate::{AudioSource, Candidate, Segment, Track};

// ============================================================================
// Errors
// ============================================================================

/// A single recognizer call failed. Never fatal to a run.
#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("Recognizer not configured")]
    NotConfigured,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to read segment audio: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Audio file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Could not determine duration: {0}")]
    Probe(String),

    #[error("FFmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction produced an empty clip")]
    EmptyOutput,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("Advisory capability unavailable")]
    Unavailable,

    #[error("Advisory request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Invalid advisory response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Scoped Resources
// ============================================================================

/// Audio clip for one segment.
///
/// A clip created from a temporary file deletes that file when dropped, so a
/// clip never outlives the task that owns it.
#[derive(Debug)]
pub struct SegmentClip {
    path: PathBuf,
    _temp: Option<TempPath>,
}

impl SegmentClip {
    /// Take ownership of a temporary file; it is removed on drop.
    pub fn temporary(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            _temp: Some(temp),
        }
    }

    /// Refer to a file this clip does not own.
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Context offered to the arbitration capability alongside the candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbitrationContext {
    pub segment: Segment,
}

// ============================================================================
// Capability Traits
// ============================================================================

#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Stable identifier used in priority lists and as `Candidate::source`.
    fn id(&self) -> &str;

    /// Whether credentials are configured. Unavailable recognizers are skipped.
    fn is_available(&self) -> bool;

    /// Identify the audio in `clip`. `Ok(None)` means "no match".
    async fn recognize(
        &self,
        clip: &SegmentClip,
        segment: &Segment,
    ) -> Result<Option<Candidate>, RecognizerError>;
}

#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    /// Validate the recording and determine its duration.
    async fn resolve(&self, path: &Path) -> Result<AudioSource, ExtractionError>;

    /// Cut `duration` seconds starting at `start` into a standalone clip.
    async fn extract(
        &self,
        source: &AudioSource,
        start: f64,
        duration: f64,
    ) -> Result<SegmentClip, ExtractionError>;
}

#[async_trait::async_trait]
pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Return the candidates reordered (and possibly filtered), best first.
    async fn rank(
        &self,
        candidates: &[Candidate],
        context: &ArbitrationContext,
    ) -> Result<Vec<Candidate>, AdvisoryError>;

    /// Return the tracks with remix/edit variants of the same song collapsed.
    async fn merge_variants(&self, tracks: &[Track]) -> Result<Vec<Track>, AdvisoryError>;
}
