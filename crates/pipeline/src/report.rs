//! Run outcome and per-scene status.

use std::path::PathBuf;

use serde::Serialize;

use mvgen_project_model::{RunState, SceneStage};

/// A scene that did not make it to the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneFailure {
    pub scene_id: String,
    /// Stage the scene was in when it failed, or `cancelled`.
    pub stage: SceneStage,
    pub error: String,
}

/// Outcome of a pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub project: String,
    /// Reconciled scenes, manifest order.
    pub succeeded: Vec<String>,
    pub failed: Vec<SceneFailure>,
    /// Scenes not attempted yet.
    pub pending: Vec<String>,
    /// Final output, when one was written.
    pub output_path: Option<PathBuf>,
    pub total_duration_secs: Option<f64>,
}

impl PipelineReport {
    pub(crate) fn from_state(state: &RunState, total_duration_secs: Option<f64>) -> Self {
        let mut report = Self {
            project: state.project_name.clone(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            pending: Vec::new(),
            output_path: state.output_path.clone(),
            total_duration_secs,
        };
        for record in &state.scenes {
            match record.stage {
                SceneStage::Reconciled => report.succeeded.push(record.scene_id.clone()),
                SceneStage::Failed => report.failed.push(SceneFailure {
                    scene_id: record.scene_id.clone(),
                    stage: record.failed_during.unwrap_or(SceneStage::Failed),
                    error: record
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                }),
                SceneStage::Cancelled => report.failed.push(SceneFailure {
                    scene_id: record.scene_id.clone(),
                    stage: SceneStage::Cancelled,
                    error: "cancelled".to_string(),
                }),
                _ => report.pending.push(record.scene_id.clone()),
            }
        }
        report
    }

    /// Every scene reconciled and the output written.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty() && self.output_path.is_some()
    }

    /// `0` on success, `2` when a partial output was written, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else if self.output_path.is_some() {
            2
        } else {
            1
        }
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.scene_id.as_str()).collect()
    }
}

/// One row of `mvgen status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneStatus {
    pub scene_id: String,
    pub stage: SceneStage,
    /// `generate` or `file`.
    pub source: &'static str,
    pub target_secs: f64,
    /// Native duration of the resolved asset.
    pub native_secs: Option<f64>,
    /// Reconcile plan label (`trim`, `loop`, ...).
    pub plan: Option<&'static str>,
    pub attempts: u32,
    pub asset_path: Option<PathBuf>,
    pub error: Option<String>,
}
