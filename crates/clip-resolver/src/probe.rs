//! Media probing via ffprobe.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use mvgen_common::{MvgenError, MvgenResult};
use mvgen_project_model::MediaInfo;

/// Measures duration and geometry of media files.
#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    /// Probe a video file.
    async fn probe(&self, path: &Path) -> MvgenResult<MediaInfo>;

    /// Duration of any media file, audio-only included.
    async fn probe_duration(&self, path: &Path) -> MvgenResult<f64>;
}

/// [`MediaProber`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

impl FfprobeProber {
    /// Use the configured binary, or find `ffprobe` on `PATH`.
    pub fn locate(configured: Option<&Path>) -> MvgenResult<Self> {
        let binary = match configured {
            Some(path) => path.to_path_buf(),
            None => which::which("ffprobe")
                .map_err(|_| MvgenError::config("ffprobe not found on PATH"))?,
        };
        Ok(Self { binary })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn run(&self, path: &Path) -> MvgenResult<Vec<u8>> {
        if !path.exists() {
            return Err(MvgenError::probe(path, "file does not exist"));
        }

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MvgenError::probe(path, format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(MvgenError::probe(
                path,
                format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait::async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> MvgenResult<MediaInfo> {
        let stdout = self.run(path).await?;
        parse_ffprobe_json(&stdout).map_err(|msg| MvgenError::probe(path, msg))
    }

    async fn probe_duration(&self, path: &Path) -> MvgenResult<f64> {
        let stdout = self.run(path).await?;
        parse_duration_json(&stdout).map_err(|msg| MvgenError::probe(path, msg))
    }
}

/// Extract [`MediaInfo`] from `ffprobe -print_format json` output.
pub fn parse_ffprobe_json(bytes: &[u8]) -> Result<MediaInfo, String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(bytes).map_err(|e| format!("unreadable ffprobe output: {e}"))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| "no video stream found".to_string())?;
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration_secs,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps,
        has_audio,
        codec: video.codec_name.clone().unwrap_or_default(),
    })
}

/// Container or first-stream duration from ffprobe JSON.
pub fn parse_duration_json(bytes: &[u8]) -> Result<f64, String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(bytes).map_err(|e| format!("unreadable ffprobe output: {e}"))?;
    probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| probe.streams.iter().find_map(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| "no duration reported".to_string())
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (rate > 0.0).then_some(rate)
}
