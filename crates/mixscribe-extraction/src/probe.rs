// SPDX-License-Identifier: GPL-3.0-or-later

//! Duration probing for source recordings.

use std::path::Path;

use mixscribe_domain::ExtractionError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Read the container header and compute `n_frames / sample_rate`.
///
/// Blocking; call from `spawn_blocking`. Streams that do not advertise a
/// frame count (VBR MP3 without a Xing header, for instance) return
/// [`ExtractionError::Probe`] so the caller can fall back to ffprobe.
pub(crate) fn symphonia_duration(path: &Path) -> Result<f64, ExtractionError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ExtractionError::Probe(format!("failed to probe stream: {}", e)))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| ExtractionError::Probe("no audio tracks found".to_string()))?;

    match (track.codec_params.n_frames, track.codec_params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => Ok(frames as f64 / rate as f64),
        _ => Err(ExtractionError::Probe(
            "stream does not report its length".to_string(),
        )),
    }
}

/// Parse the output of `ffprobe -show_entries format=duration -of csv=p=0`.
pub(crate) fn parse_ffprobe_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs > 0.0)
}
