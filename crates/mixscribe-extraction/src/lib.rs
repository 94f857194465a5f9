// SPDX-License-Identifier: GPL-3.0-or-later

//! Source resolution and per-segment clip extraction backed by ffmpeg.
//!
//! Durations come from symphonia's container probe when the stream reports
//! a frame count, and from `ffprobe` otherwise. Clips are mono WAV files cut
//! by `ffmpeg` into temporary files owned by the returned [`SegmentClip`].

mod probe;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use mixscribe_domain::{AudioSource, ExtractionError, Extractor, SegmentClip};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

pub type Result<T> = std::result::Result<T, ExtractionError>;

pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["mp3", "wav", "flac", "m4a", "ogg", "aac"];

/// Size of a canonical WAV header; anything this small holds no audio.
const WAV_HEADER_LEN: u64 = 44;

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u8,
    pub timeout: Duration,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            sample_rate: 22050,
            channels: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegExtractor {
    settings: ExtractorSettings,
}

impl FfmpegExtractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let owned = path.to_path_buf();
        let probed = tokio::task::spawn_blocking(move || probe::symphonia_duration(&owned))
            .await
            .map_err(|e| ExtractionError::Probe(e.to_string()))?;

        match probed {
            Ok(duration) => Ok(duration),
            Err(error) => {
                debug!(target: "extraction", error = %error, "container probe failed, falling back to ffprobe");
                self.ffprobe_duration(path).await
            }
        }
    }

    async fn ffprobe_duration(&self, path: &Path) -> Result<f64> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "csv=p=0".into(),
            path.as_os_str().to_owned(),
        ];

        let output = run_tool(&self.settings.ffprobe_path, &args, self.settings.timeout)
            .await
            .map_err(|e| match e {
                ExtractionError::Timeout(t) => ExtractionError::Timeout(t),
                other => ExtractionError::Probe(other.to_string()),
            })?;

        if !output.status.success() {
            return Err(ExtractionError::Probe(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        probe::parse_ffprobe_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ExtractionError::Probe("ffprobe reported no usable duration".to_string())
        })
    }
}

#[async_trait::async_trait]
impl Extractor for FfmpegExtractor {
    #[instrument(skip_all, fields(path = %path.display()))]
    async fn resolve(&self, path: &Path) -> Result<AudioSource> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ExtractionError::NotFound(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ExtractionError::UnsupportedFormat(if extension.is_empty() {
                path.display().to_string()
            } else {
                extension
            }));
        }

        let duration = self.probe_duration(path).await?;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(ExtractionError::Probe(format!(
                "invalid duration {}",
                duration
            )));
        }

        debug!(target: "extraction", duration_secs = duration, "resolved source");
        Ok(AudioSource::new(path, duration))
    }

    #[instrument(skip(self, source), fields(path = %source.path().display()))]
    async fn extract(&self, source: &AudioSource, start: f64, duration: f64) -> Result<SegmentClip> {
        let temp = tempfile::Builder::new()
            .prefix("segment_")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();
        // Owning the path from here on removes the file on every early return.
        let clip = SegmentClip::temporary(temp);

        let args = segment_args(
            source.path(),
            start,
            duration,
            clip.path(),
            self.settings.sample_rate,
            self.settings.channels,
        );

        let output = run_tool(&self.settings.ffmpeg_path, &args, self.settings.timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(target: "extraction", start, duration, "ffmpeg failed: {}", stderr);
            return Err(ExtractionError::Ffmpeg(stderr));
        }

        let written = tokio::fs::metadata(clip.path()).await?.len();
        if written <= WAV_HEADER_LEN {
            return Err(ExtractionError::EmptyOutput);
        }

        debug!(target: "extraction", start, duration, bytes = written, "extracted clip");
        Ok(clip)
    }
}

fn segment_args(
    source: &Path,
    start: f64,
    duration: f64,
    out: &Path,
    sample_rate: u32,
    channels: u8,
) -> Vec<OsString> {
    vec![
        "-v".into(),
        "error".into(),
        "-ss".into(),
        format!("{:.3}", start).into(),
        "-t".into(),
        format!("{:.3}", duration).into(),
        "-i".into(),
        source.as_os_str().to_owned(),
        "-ar".into(),
        sample_rate.to_string().into(),
        "-ac".into(),
        channels.to_string().into(),
        "-y".into(),
        out.as_os_str().to_owned(),
    ]
}

/// Run an external tool; the child is killed if the timeout fires or the
/// calling task is dropped.
async fn run_tool(program: &Path, args: &[OsString], timeout: Duration) -> Result<Output> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(target: "extraction", ?command, "spawning");

    match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => Err(ExtractionError::Timeout(timeout)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(ExtractionError::Ffmpeg(
            format!("{} not found", program.display()),
        )),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(output)) => Ok(output),
    }
}
