// SPDX-License-Identifier: GPL-3.0-or-later
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

pub mod capabilities;

pub use capabilities::{
    Advisor, AdvisoryError, ArbitrationContext, ExtractionError, Extractor, Recognizer,
    RecognizerError, SegmentClip,
};

/// Placeholder used when a recognizer reports no artist.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
/// Placeholder used when a recognizer reports no title.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

// ============================================================================
// Value Objects
// ============================================================================

/// A resolved audio recording: where it lives and how long it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSource {
    path: PathBuf,
    duration_secs: f64,
}

impl AudioSource {
    pub fn new(path: impl Into<PathBuf>, duration_secs: f64) -> Self {
        Self {
            path: path.into(),
            duration_secs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }
}

/// A time window of the source recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(index: usize, start: f64, end: f64) -> Self {
        Self { index, start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} [{}-{}]",
            self.index,
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

/// Normalized `(artist, title)` identity of a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub artist: String,
    pub title: String,
}

impl TrackKey {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            artist: normalize_component(artist),
            title: normalize_component(title),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artist.is_empty() && self.title.is_empty()
    }
}

/// Case-fold and trim a single artist or title value.
pub fn normalize_component(value: &str) -> String {
    value.nfkc().collect::<String>().trim().to_lowercase()
}

/// Format seconds as `HH:MM:SS`, truncating fractions.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Recognition Results
// ============================================================================

/// One recognizer's proposed identification for a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub artist: Option<String>,
    pub title: Option<String>,
    confidence: f32,
    pub source: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Candidate {
    /// Confidence is clamped into `[0, 1]`; NaN becomes `0`.
    pub fn new(
        source: impl Into<String>,
        artist: Option<String>,
        title: Option<String>,
        confidence: f32,
    ) -> Self {
        Self {
            artist: non_blank(artist),
            title: non_blank(title),
            confidence: clamp_confidence(confidence),
            source: source.into(),
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Same key the resulting [`Track`] will have: missing fields count as
    /// the placeholders.
    pub fn key(&self) -> TrackKey {
        TrackKey::new(
            self.artist.as_deref().unwrap_or(UNKNOWN_ARTIST),
            self.title.as_deref().unwrap_or(UNKNOWN_TITLE),
        )
    }
}

/// An identified track placed on the timeline of the source recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    #[serde(rename = "start_time")]
    pub start: String,
    #[serde(rename = "end_time")]
    pub end: String,
    pub artist: String,
    pub title: String,
    pub confidence: f32,
    pub source: String,
    #[serde(skip)]
    pub offset_secs: f64,
    #[serde(skip)]
    pub segment_index: usize,
}

impl Track {
    pub fn from_candidate(candidate: &Candidate, segment: &Segment) -> Self {
        Self {
            start: format_timestamp(segment.start),
            end: format_timestamp(segment.end),
            artist: candidate
                .artist
                .clone()
                .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            title: candidate
                .title
                .clone()
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            confidence: candidate.confidence(),
            source: candidate.source.clone(),
            offset_secs: segment.start,
            segment_index: segment.index,
        }
    }

    pub fn key(&self) -> TrackKey {
        TrackKey::new(&self.artist, &self.title)
    }
}

/// Ordered tracks, unique by normalized `(artist, title)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Tracklist {
    tracks: Vec<Track>,
}

impl Tracklist {
    /// Keep the first occurrence of every key in input order and drop
    /// entries whose key is the empty pair.
    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut seen = HashSet::new();
        let tracks = tracks
            .into_iter()
            .filter(|track| {
                let key = track.key();
                !key.is_empty() && seen.insert(key)
            })
            .collect();
        Self { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub fn as_slice(&self) -> &[Track] {
        &self.tracks
    }

    pub fn into_vec(self) -> Vec<Track> {
        self.tracks
    }
}

impl<'a> IntoIterator for &'a Tracklist {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Extraction,
    Recognizer,
    Advisory,
    Truncation,
    Cancellation,
    /// A segment task ended abnormally.
    Internal,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extraction => write!(f, "extraction"),
            Self::Recognizer => write!(f, "recognizer"),
            Self::Advisory => write!(f, "advisory"),
            Self::Truncation => write!(f, "truncation"),
            Self::Cancellation => write!(f, "cancellation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub segment_index: Option<usize>,
    pub recognizer: Option<String>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl DiagnosticEntry {
    pub fn extraction(segment_index: usize, message: impl Into<String>) -> Self {
        Self {
            segment_index: Some(segment_index),
            recognizer: None,
            kind: DiagnosticKind::Extraction,
            message: message.into(),
        }
    }

    pub fn recognizer(
        segment_index: usize,
        recognizer: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            segment_index: Some(segment_index),
            recognizer: Some(recognizer.into()),
            kind: DiagnosticKind::Recognizer,
            message: message.into(),
        }
    }

    pub fn advisory(segment_index: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            segment_index,
            recognizer: None,
            kind: DiagnosticKind::Advisory,
            message: message.into(),
        }
    }

    pub fn internal(segment_index: usize, message: impl Into<String>) -> Self {
        Self {
            segment_index: Some(segment_index),
            recognizer: None,
            kind: DiagnosticKind::Internal,
            message: message.into(),
        }
    }

    pub fn run(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            segment_index: None,
            recognizer: None,
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(index) = self.segment_index {
            write!(f, " segment {}", index)?;
        }
        if let Some(recognizer) = &self.recognizer {
            write!(f, " ({})", recognizer)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Counters and a bounded sample of non-fatal failures for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub segments_planned: usize,
    pub segments_attempted: usize,
    pub segments_succeeded: usize,
    pub segments_failed: usize,
    pub recognizer_calls: usize,
    pub recognizer_failures: usize,
    pub truncated: bool,
    pub cancelled: bool,
    pub error_count: usize,
    entries: Vec<DiagnosticEntry>,
    #[serde(skip)]
    sample_limit: usize,
}

impl Diagnostics {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            segments_planned: 0,
            segments_attempted: 0,
            segments_succeeded: 0,
            segments_failed: 0,
            recognizer_calls: 0,
            recognizer_failures: 0,
            truncated: false,
            cancelled: false,
            error_count: 0,
            entries: Vec::new(),
            sample_limit,
        }
    }

    /// Count the entry; keep it only while the sample has room.
    pub fn record(&mut self, entry: DiagnosticEntry) {
        self.error_count += 1;
        if self.entries.len() < self.sample_limit {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[DiagnosticEntry] {
        &self.entries
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(artist: &str, title: &str) -> Track {
        let candidate = Candidate::new("acrcloud", Some(artist.into()), Some(title.into()), 0.9);
        Track::from_candidate(&candidate, &Segment::new(0, 0.0, 45.0))
    }

    #[test]
    fn format_timestamp_truncates_to_seconds() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp(59.9), "00:00:59");
        assert_eq!(format_timestamp(3725.0), "01:02:05");
        assert_eq!(format_timestamp(-3.0), "00:00:00");
        assert_eq!(format_timestamp(f64::NAN), "00:00:00");
    }

    #[test]
    fn candidate_confidence_is_clamped() {
        assert_eq!(Candidate::new("a", None, None, 1.7).confidence(), 1.0);
        assert_eq!(Candidate::new("a", None, None, -0.2).confidence(), 0.0);
        assert_eq!(Candidate::new("a", None, None, f32::NAN).confidence(), 0.0);
        assert_eq!(Candidate::new("a", None, None, 0.42).confidence(), 0.42);
    }

    #[test]
    fn blank_candidate_fields_become_placeholders() {
        let candidate = Candidate::new("audd", Some("   ".into()), None, 0.8);
        assert!(candidate.artist.is_none());

        let track = Track::from_candidate(&candidate, &Segment::new(3, 90.0, 100.0));
        assert_eq!(track.artist, UNKNOWN_ARTIST);
        assert_eq!(track.title, UNKNOWN_TITLE);
        assert_eq!(track.start, "00:01:30");
        assert_eq!(track.end, "00:01:40");
        assert_eq!(track.segment_index, 3);
    }

    #[test]
    fn candidate_key_matches_track_key_when_fields_are_missing() {
        let anonymous = Candidate::new("shazam", None, Some("Gravity".into()), 0.8);
        let named = Candidate::new("audd", Some("unknown artist".into()), Some("Gravity".into()), 0.9);
        let track = Track::from_candidate(&anonymous, &Segment::new(0, 0.0, 45.0));

        assert_eq!(anonymous.key(), track.key());
        assert_eq!(anonymous.key(), named.key());
    }

    #[test]
    fn track_key_ignores_case_and_surrounding_whitespace() {
        assert_eq!(
            TrackKey::new("Artist A", "Title X"),
            TrackKey::new("artist a", " title x ")
        );
        assert_ne!(TrackKey::new("A", "X"), TrackKey::new("A", "Y"));
        assert!(TrackKey::new("  ", "").is_empty());
    }

    #[test]
    fn tracklist_keeps_first_occurrence() {
        let list = Tracklist::from_tracks(vec![
            track("Artist A", "Title X"),
            track("artist a", " title x "),
            track("B", "Y"),
        ]);

        let pairs: Vec<_> = list
            .iter()
            .map(|t| (t.artist.as_str(), t.title.as_str()))
            .collect();
        assert_eq!(pairs, vec![("Artist A", "Title X"), ("B", "Y")]);
    }

    #[test]
    fn tracklist_drops_empty_keys() {
        let mut empty = track("x", "y");
        empty.artist = " ".into();
        empty.title = String::new();

        let list = Tracklist::from_tracks(vec![empty, track("B", "Y")]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.as_slice()[0].artist, "B");
    }

    #[test]
    fn diagnostics_sample_is_bounded_but_count_is_exact() {
        let mut diagnostics = Diagnostics::new(2);
        for i in 0..5 {
            diagnostics.record(DiagnosticEntry::extraction(i, "unreadable"));
        }
        assert_eq!(diagnostics.error_count, 5);
        assert_eq!(diagnostics.entries().len(), 2);
        assert_eq!(diagnostics.entries()[1].segment_index, Some(1));
    }

    #[test]
    fn diagnostic_entry_display() {
        let entry = DiagnosticEntry::recognizer(4, "audd", "HTTP 500");
        assert_eq!(entry.to_string(), "[recognizer] segment 4 (audd): HTTP 500");
    }
}
