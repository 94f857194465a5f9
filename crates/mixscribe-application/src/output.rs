// SPDX-License-Identifier: GPL-3.0-or-later

//! Tracklist renderers shared by the command line and the HTTP API.

use std::fmt;
use std::str::FromStr;

use mixscribe_domain::{Track, Tracklist};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
    Csv,
}

impl OutputFormat {
    /// MIME type of the rendered document.
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Markdown | OutputFormat::Csv => "text/plain; charset=utf-8",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown output format `{0}`, expected json, markdown or csv")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

const CSV_HEADER: [&str; 6] = [
    "start_time",
    "end_time",
    "artist",
    "title",
    "confidence",
    "source",
];

pub fn render(tracklist: &Tracklist, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => render_json(tracklist),
        OutputFormat::Markdown => Ok(render_markdown(tracklist)),
        OutputFormat::Csv => Ok(render_csv(tracklist)),
    }
}

fn render_json(tracklist: &Tracklist) -> serde_json::Result<String> {
    let document = serde_json::json!({ "tracks": tracklist.as_slice() });
    serde_json::to_string_pretty(&document)
}

fn render_markdown(tracklist: &Tracklist) -> String {
    let mut lines = vec!["## Tracklist".to_string(), String::new()];
    lines.extend(tracklist.iter().map(|t| {
        format!(
            "{} - {} | {} - {} (confidence: {}%)",
            t.start,
            t.end,
            t.artist,
            t.title,
            confidence_percent(t.confidence)
        )
    }));
    lines.join("\n")
}

/// RFC 4180: CRLF line endings, fields quoted only when they need it.
fn render_csv(tracklist: &Tracklist) -> String {
    if tracklist.is_empty() {
        return String::new();
    }

    let mut out = csv_row(CSV_HEADER.iter().map(|s| s.to_string()));
    for track in tracklist.iter() {
        out.push_str(&csv_row(track_fields(track)));
    }
    out
}

fn track_fields(track: &Track) -> impl Iterator<Item = String> {
    [
        track.start.clone(),
        track.end.clone(),
        track.artist.clone(),
        track.title.clone(),
        track.confidence.to_string(),
        track.source.clone(),
    ]
    .into_iter()
}

fn csv_row(fields: impl Iterator<Item = String>) -> String {
    let mut row = fields.map(|f| csv_field(&f)).collect::<Vec<_>>().join(",");
    row.push_str("\r\n");
    row
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Truncated, not rounded: 0.829 shows as 82%.
fn confidence_percent(confidence: f32) -> u32 {
    (f64::from(confidence) * 100.0 + 1e-4).floor().clamp(0.0, 100.0) as u32
}
