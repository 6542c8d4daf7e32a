//! Clip handles produced by resolution and reconciliation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Properties measured from a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Native duration in seconds.
    pub duration_secs: f64,

    /// Native frame size in pixels.
    pub width: u32,
    pub height: u32,

    /// Native frame rate; 0.0 when unknown.
    #[serde(default)]
    pub fps: f64,

    /// Whether the file carries an audio stream.
    #[serde(default)]
    pub has_audio: bool,

    /// Video codec name as reported by the prober.
    #[serde(default)]
    pub codec: String,
}

/// Resolution status of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    Pending,
    Ready,
    Failed,
}

/// How the concrete media file was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipOrigin {
    /// Referenced by the manifest.
    File,
    /// Produced by the generation backend during this run.
    Generated,
    /// Reused from a previous run.
    Cached,
}

/// A scene bound to a concrete media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedClip {
    pub scene_id: String,
    pub status: ClipStatus,
    pub path: PathBuf,
    pub origin: ClipOrigin,
    pub media: Option<MediaInfo>,
    pub error: Option<String>,
}

impl ResolvedClip {
    pub fn ready(
        scene_id: impl Into<String>,
        path: impl Into<PathBuf>,
        origin: ClipOrigin,
        media: MediaInfo,
    ) -> Self {
        Self {
            scene_id: scene_id.into(),
            status: ClipStatus::Ready,
            path: path.into(),
            origin,
            media: Some(media),
            error: None,
        }
    }

    /// Mark the clip failed, keeping whatever was known about it.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = ClipStatus::Failed;
        self.error = Some(error.into());
        self
    }

    pub fn is_ready(&self) -> bool {
        self.status == ClipStatus::Ready && self.media.is_some()
    }

    pub fn native_duration_secs(&self) -> Option<f64> {
        self.media.as_ref().map(|m| m.duration_secs)
    }
}

/// How a clip is cut, looped or retimed to its target duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcilePlan {
    /// Native duration already matches the target.
    Passthrough { duration_secs: f64 },

    /// Keep `[start_secs, start_secs + duration_secs)` of the source.
    Trim { start_secs: f64, duration_secs: f64 },

    /// Play the first `source_secs` of the source `iterations` times, then
    /// cut at `duration_secs`.
    Loop {
        iterations: u32,
        source_secs: f64,
        duration_secs: f64,
    },

    /// Play the whole source at `1 / factor` speed; output lasts
    /// `duration_secs`.
    Retime { factor: f64, duration_secs: f64 },
}

impl ReconcilePlan {
    /// Output duration of the plan.
    pub fn duration_secs(&self) -> f64 {
        match self {
            Self::Passthrough { duration_secs }
            | Self::Trim { duration_secs, .. }
            | Self::Loop { duration_secs, .. }
            | Self::Retime { duration_secs, .. } => *duration_secs,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Passthrough { .. } => "passthrough",
            Self::Trim { .. } => "trim",
            Self::Loop { .. } => "loop",
            Self::Retime { .. } => "retime",
        }
    }
}

/// A clip forced to its scene's duration. Read-only input to the compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledClip {
    pub scene_id: String,
    pub path: PathBuf,
    pub media: MediaInfo,

    /// Declared scene duration.
    pub target_secs: f64,

    pub plan: ReconcilePlan,
}

impl ReconciledClip {
    pub fn duration_secs(&self) -> f64 {
        self.plan.duration_secs()
    }
}
