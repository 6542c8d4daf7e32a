//! Error types shared across mvgen crates.

use std::path::PathBuf;

/// Top-level error type for mvgen operations.
///
/// Scene-local variants carry the scene id so the orchestrator can record the
/// failure against that scene and keep going with the rest of the manifest.
#[derive(Debug, thiserror::Error)]
pub enum MvgenError {
    #[error("Validation error in `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("Scene `{scene_id}`: missing asset {path}")]
    MissingAsset { scene_id: String, path: PathBuf },

    #[error("Scene `{scene_id}`: generation timed out after {waited_secs:.1}s")]
    GenerationTimeout { scene_id: String, waited_secs: f64 },

    #[error("Scene `{scene_id}`: generation failed: {reason}")]
    GenerationFailed { scene_id: String, reason: String },

    #[error("Scene `{scene_id}`: reconciliation failed: {message}")]
    Reconciliation { scene_id: String, message: String },

    #[error(
        "Scene `{scene_id}`: transition needs {overlap_secs:.3}s of overlap but only {available_secs:.3}s is available"
    )]
    TransitionOverlap {
        scene_id: String,
        overlap_secs: f64,
        available_secs: f64,
    },

    #[error("Audio sync error: {message}")]
    AudioSync { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Probe error for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Scene `{scene_id}`: cancelled")]
    Cancelled { scene_id: String },

    #[error("Run state error: {message}")]
    State { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MvgenError.
pub type MvgenResult<T> = Result<T, MvgenError>;

impl MvgenError {
    pub fn validation(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: msg.into(),
        }
    }

    pub fn missing_asset(scene_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingAsset {
            scene_id: scene_id.into(),
            path: path.into(),
        }
    }

    pub fn generation_failed(scene_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GenerationFailed {
            scene_id: scene_id.into(),
            reason: reason.into(),
        }
    }

    pub fn reconciliation(scene_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Reconciliation {
            scene_id: scene_id.into(),
            message: msg.into(),
        }
    }

    pub fn audio_sync(msg: impl Into<String>) -> Self {
        Self::AudioSync {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn cancelled(scene_id: impl Into<String>) -> Self {
        Self::Cancelled {
            scene_id: scene_id.into(),
        }
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Scene the error is attributed to, if any.
    pub fn scene_id(&self) -> Option<&str> {
        match self {
            Self::MissingAsset { scene_id, .. }
            | Self::GenerationTimeout { scene_id, .. }
            | Self::GenerationFailed { scene_id, .. }
            | Self::Reconciliation { scene_id, .. }
            | Self::TransitionOverlap { scene_id, .. }
            | Self::Cancelled { scene_id } => Some(scene_id),
            _ => None,
        }
    }

    /// Errors that fail a single scene without affecting its siblings.
    pub fn is_scene_local(&self) -> bool {
        matches!(
            self,
            Self::MissingAsset { .. }
                | Self::GenerationTimeout { .. }
                | Self::GenerationFailed { .. }
                | Self::Reconciliation { .. }
                | Self::Probe { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Errors raised while compositing; these abort the run with no output.
    pub fn is_compositor_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransitionOverlap { .. } | Self::AudioSync { .. } | Self::Encode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_id_is_exposed_for_scene_errors() {
        let err = MvgenError::missing_asset("intro", "/tmp/intro.mp4");
        assert_eq!(err.scene_id(), Some("intro"));
        assert!(err.is_scene_local());
        assert!(!err.is_compositor_fatal());
    }

    #[test]
    fn test_compositor_errors_are_fatal() {
        let err = MvgenError::TransitionOverlap {
            scene_id: "verse".to_string(),
            overlap_secs: 1.0,
            available_secs: 0.5,
        };
        assert!(err.is_compositor_fatal());
        assert!(!err.is_scene_local());
        assert!(MvgenError::encode("ffmpeg exited with 1").is_compositor_fatal());
        assert!(MvgenError::audio_sync("no audio").is_compositor_fatal());
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = MvgenError::validation("scenes[1].duration", "must be positive");
        assert_eq!(
            err.to_string(),
            "Validation error in `scenes[1].duration`: must be positive"
        );
    }
}
