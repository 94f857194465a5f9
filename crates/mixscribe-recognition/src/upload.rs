// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use reqwest::multipart::Part;

use crate::error::{transport, Result};

/// Clip bytes read once and turned into as many multipart parts as needed.
#[derive(Debug, Clone)]
pub(crate) struct AudioUpload {
    bytes: Vec<u8>,
    file_name: String,
    mime: &'static str,
}

impl AudioUpload {
    pub(crate) async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("segment.wav")
            .to_string();

        Ok(Self {
            bytes,
            file_name,
            mime: mime_for(path),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn part(&self) -> Result<Part> {
        Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(self.mime)
            .map_err(transport)
    }
}

/// Read a clip from disk into a multipart file part.
pub(crate) async fn audio_part(path: &Path) -> Result<(Part, usize)> {
    let upload = AudioUpload::read(path).await?;
    Ok((upload.part()?, upload.len()))
}

fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        Some("m4a") | Some("aac") => "audio/aac",
        _ => "application/octet-stream",
    }
}

/// Interpret a provider score that may arrive as a number or a numeric string.
pub(crate) fn score_from_value(value: Option<&serde_json::Value>) -> Option<f32> {
    match value? {
        serde_json::Value::Number(number) => number.as_f64().map(|n| n as f32),
        serde_json::Value::String(text) => text.trim().parse::<f32>().ok(),
        _ => None,
    }
}

pub(crate) fn string_field(value: &serde_json::Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
