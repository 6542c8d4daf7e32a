//! Persisted per-scene pipeline progress.
//!
//! The run state is the only record that survives between invocations. It is
//! owned by the orchestrator, mutated one scene transition at a time, and
//! written atomically so an interrupted run never leaves a torn file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clip::{MediaInfo, ReconcilePlan};
use crate::manifest::Manifest;

/// Schema version of the run-state file.
pub const RUN_STATE_VERSION: &str = "1.0";

/// Pipeline stage of one scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStage {
    Pending,
    Resolving,
    Resolved,
    Reconciling,
    Reconciled,
    Failed,
    Cancelled,
}

impl SceneStage {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SceneStage) -> bool {
        use SceneStage::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Pending, Cancelled)
                | (Resolving, Resolved)
                | (Resolving, Failed)
                | (Resolving, Cancelled)
                | (Resolved, Reconciling)
                | (Reconciling, Reconciled)
                | (Reconciling, Failed)
                | (Failed, Resolving)
                | (Failed, Reconciling)
                | (Cancelled, Resolving)
        )
    }

    /// Stages a scene can be left in by an interrupted process.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Resolving | Self::Reconciling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Resolved => "resolved",
            Self::Reconciling => "reconciling",
            Self::Reconciled => "reconciled",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SceneStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene_id: String,

    /// Fingerprint of the scene definition this record was produced from.
    pub fingerprint: String,

    pub stage: SceneStage,

    /// Concrete media file once resolved.
    #[serde(default)]
    pub asset_path: Option<PathBuf>,

    #[serde(default)]
    pub media: Option<MediaInfo>,

    #[serde(default)]
    pub plan: Option<ReconcilePlan>,

    /// Last error message, if the scene failed.
    #[serde(default)]
    pub error: Option<String>,

    /// Stage that was running when the scene failed.
    #[serde(default)]
    pub failed_during: Option<SceneStage>,

    /// Number of resolution attempts across runs.
    #[serde(default)]
    pub attempts: u32,

    /// Last modified timestamp (ISO 8601).
    pub updated_at: String,
}

impl SceneRecord {
    fn new(scene_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            fingerprint: fingerprint.into(),
            stage: SceneStage::Pending,
            asset_path: None,
            media: None,
            plan: None,
            error: None,
            failed_during: None,
            attempts: 0,
            updated_at: now(),
        }
    }

    fn clear(&mut self) {
        self.stage = SceneStage::Pending;
        self.asset_path = None;
        self.media = None;
        self.plan = None;
        self.error = None;
        self.failed_during = None;
        self.updated_at = now();
    }
}

/// Persisted run record (`.mvgen/run-state.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub version: String,
    pub project_name: String,
    pub created_at: String,
    pub updated_at: String,

    /// Fingerprint of the manifest settings outside the scene list.
    #[serde(default)]
    pub manifest_fingerprint: String,

    /// One record per manifest scene, in manifest order.
    pub scenes: Vec<SceneRecord>,

    /// Final output once composited.
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    /// Run-level errors (compositor failures and the like).
    #[serde(default)]
    pub errors: Vec<String>,
}

/// What [`RunState::sync_with_manifest`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Scenes whose definition changed and were reset to pending.
    pub invalidated: Vec<String>,
    /// Scenes left in flight by an interrupted run.
    pub recovered: Vec<String>,
    /// Output, audio, subtitle or style settings changed.
    pub output_changed: bool,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.invalidated.is_empty()
            && self.recovered.is_empty()
            && !self.output_changed
    }
}

/// Per-stage scene counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub resolved: usize,
    pub reconciled: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunState {
    /// Fresh state with every scene pending.
    pub fn new(manifest: &Manifest) -> Self {
        let now = now();
        Self {
            version: RUN_STATE_VERSION.to_string(),
            project_name: manifest.project_name.clone(),
            created_at: now.clone(),
            updated_at: now,
            manifest_fingerprint: manifest.output_fingerprint(),
            scenes: manifest
                .scenes
                .iter()
                .map(|s| SceneRecord::new(&s.id, s.fingerprint()))
                .collect(),
            output_path: None,
            errors: vec![],
        }
    }

    /// Load a run state from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunStateError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| RunStateError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| RunStateError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the persisted state if present and bring it in line with the
    /// manifest; otherwise start fresh.
    pub fn load_or_new(
        path: impl AsRef<Path>,
        manifest: &Manifest,
    ) -> Result<(Self, SyncReport), RunStateError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok((Self::new(manifest), SyncReport::default()));
        }
        let mut state = Self::load(path)?;
        let report = state.sync_with_manifest(manifest);
        Ok((state, report))
    }

    /// Write the state atomically (temp file + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RunStateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RunStateError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| RunStateError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| RunStateError::IoError {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| RunStateError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reconcile a loaded state with the current manifest.
    ///
    /// Records are reordered to manifest order. New scenes start pending,
    /// removed scenes are dropped, edited scenes are reset, and scenes left
    /// in flight fall back to their last settled stage. Any change at all
    /// forgets the previous output.
    pub fn sync_with_manifest(&mut self, manifest: &Manifest) -> SyncReport {
        let mut report = SyncReport::default();
        let mut old = std::mem::take(&mut self.scenes);

        for scene in &manifest.scenes {
            let fingerprint = scene.fingerprint();
            let record = match old.iter().position(|r| r.scene_id == scene.id) {
                Some(idx) => {
                    let mut record = old.swap_remove(idx);
                    if record.fingerprint != fingerprint {
                        record.clear();
                        record.fingerprint = fingerprint;
                        report.invalidated.push(scene.id.clone());
                    } else if record.stage.is_in_flight() {
                        record.stage = match record.stage {
                            SceneStage::Reconciling => SceneStage::Resolved,
                            _ => SceneStage::Pending,
                        };
                        record.updated_at = now();
                        report.recovered.push(scene.id.clone());
                    }
                    record
                }
                None => {
                    report.added.push(scene.id.clone());
                    SceneRecord::new(&scene.id, fingerprint)
                }
            };
            self.scenes.push(record);
        }

        report.removed = old.into_iter().map(|r| r.scene_id).collect();
        let manifest_fingerprint = manifest.output_fingerprint();
        if self.manifest_fingerprint != manifest_fingerprint {
            self.manifest_fingerprint = manifest_fingerprint;
            report.output_changed = true;
        }
        self.project_name = manifest.project_name.clone();
        if !report.is_empty() {
            self.output_path = None;
            self.touch();
        }
        report
    }

    pub fn record(&self, scene_id: &str) -> Option<&SceneRecord> {
        self.scenes.iter().find(|r| r.scene_id == scene_id)
    }

    pub fn stage(&self, scene_id: &str) -> Option<SceneStage> {
        self.record(scene_id).map(|r| r.stage)
    }

    fn record_mut(&mut self, scene_id: &str) -> Result<&mut SceneRecord, RunStateError> {
        self.scenes
            .iter_mut()
            .find(|r| r.scene_id == scene_id)
            .ok_or_else(|| RunStateError::UnknownScene {
                scene_id: scene_id.to_string(),
            })
    }

    /// Apply a guarded stage transition.
    pub fn transition(&mut self, scene_id: &str, next: SceneStage) -> Result<(), RunStateError> {
        let record = self.record_mut(scene_id)?;
        if !record.stage.can_transition_to(next) {
            return Err(RunStateError::InvalidTransition {
                scene_id: scene_id.to_string(),
                from: record.stage,
                to: next,
            });
        }
        if next == SceneStage::Resolving {
            record.attempts += 1;
        }
        if matches!(next, SceneStage::Resolving | SceneStage::Reconciling) {
            record.error = None;
            record.failed_during = None;
        }
        record.stage = next;
        record.updated_at = now();
        self.touch();
        Ok(())
    }

    /// `resolving -> resolved`, recording the concrete asset.
    pub fn mark_resolved(
        &mut self,
        scene_id: &str,
        asset_path: PathBuf,
        media: MediaInfo,
    ) -> Result<(), RunStateError> {
        self.transition(scene_id, SceneStage::Resolved)?;
        let record = self.record_mut(scene_id)?;
        record.asset_path = Some(asset_path);
        record.media = Some(media);
        record.plan = None;
        Ok(())
    }

    /// `reconciling -> reconciled`, recording the plan.
    pub fn mark_reconciled(
        &mut self,
        scene_id: &str,
        plan: ReconcilePlan,
    ) -> Result<(), RunStateError> {
        self.transition(scene_id, SceneStage::Reconciled)?;
        self.record_mut(scene_id)?.plan = Some(plan);
        Ok(())
    }

    /// Move an in-flight scene to `failed`.
    pub fn mark_failed(
        &mut self,
        scene_id: &str,
        error: impl Into<String>,
    ) -> Result<(), RunStateError> {
        let during = self
            .stage(scene_id)
            .ok_or_else(|| RunStateError::UnknownScene {
                scene_id: scene_id.to_string(),
            })?;
        self.transition(scene_id, SceneStage::Failed)?;
        let record = self.record_mut(scene_id)?;
        record.error = Some(error.into());
        record.failed_during = Some(during);
        Ok(())
    }

    /// Move a pending or resolving scene to `cancelled`.
    pub fn mark_cancelled(&mut self, scene_id: &str) -> Result<(), RunStateError> {
        self.transition(scene_id, SceneStage::Cancelled)
    }

    /// Drop everything known about a scene and start it over.
    pub fn reset(&mut self, scene_id: &str) -> Result<(), RunStateError> {
        self.record_mut(scene_id)?.clear();
        self.output_path = None;
        self.touch();
        Ok(())
    }

    /// Scenes that still need resolution, in manifest order.
    pub fn needs_resolution(&self) -> Vec<&str> {
        self.scenes
            .iter()
            .filter(|r| {
                matches!(
                    r.stage,
                    SceneStage::Pending | SceneStage::Cancelled
                ) || (r.stage == SceneStage::Failed
                    && r.failed_during != Some(SceneStage::Reconciling))
            })
            .map(|r| r.scene_id.as_str())
            .collect()
    }

    /// Scenes with a resolved asset waiting for reconciliation.
    pub fn needs_reconciliation(&self) -> Vec<&str> {
        self.scenes
            .iter()
            .filter(|r| {
                r.stage == SceneStage::Resolved
                    || (r.stage == SceneStage::Failed
                        && r.failed_during == Some(SceneStage::Reconciling)
                        && r.media.is_some())
            })
            .map(|r| r.scene_id.as_str())
            .collect()
    }

    pub fn all_reconciled(&self) -> bool {
        !self.scenes.is_empty() && self.scenes.iter().all(|r| r.stage == SceneStage::Reconciled)
    }

    pub fn failed(&self) -> Vec<&SceneRecord> {
        self.scenes
            .iter()
            .filter(|r| r.stage == SceneStage::Failed)
            .collect()
    }

    pub fn counts(&self) -> StageCounts {
        let mut counts = StageCounts::default();
        for record in &self.scenes {
            match record.stage {
                SceneStage::Pending => counts.pending += 1,
                SceneStage::Resolving | SceneStage::Reconciling => counts.in_flight += 1,
                SceneStage::Resolved => counts.resolved += 1,
                SceneStage::Reconciled => counts.reconciled += 1,
                SceneStage::Failed => counts.failed += 1,
                SceneStage::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn set_output(&mut self, path: PathBuf) {
        self.output_path = Some(path);
        self.touch();
    }

    /// Forget the recorded output; a new export is about to replace it.
    pub fn clear_output(&mut self) {
        self.output_path = None;
        self.touch();
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now();
    }
}

/// Errors that can occur when working with run state.
#[derive(Debug, thiserror::Error)]
pub enum RunStateError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unknown scene `{scene_id}` in run state")]
    UnknownScene { scene_id: String },

    #[error("Scene `{scene_id}`: invalid transition {from} -> {to}")]
    InvalidTransition {
        scene_id: String,
        from: SceneStage,
        to: SceneStage,
    },
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
