//! mvgen Pipeline
//!
//! Orchestrates a manifest through every stage:
//! - **Resolve:** scenes become probed media files, with bounded concurrency
//! - **Reconcile:** each clip is planned to its declared duration
//! - **Compose:** the reconciled timeline is composited and exported once
//!
//! Progress is persisted per scene so interrupted or partially failed runs
//! resume without redoing settled work.

pub mod options;
pub mod orchestrator;
pub mod report;

pub use options::{Collaborators, PipelineOptions, RendererFactory};
pub use orchestrator::{manifest_dir, Pipeline};
pub use report::{PipelineReport, SceneFailure, SceneStatus};
