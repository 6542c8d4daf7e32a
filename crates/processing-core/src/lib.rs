//! mvgen Processing Core
//!
//! Turns resolved clips into a frame-accurate timeline:
//! - **Reconcile:** Trim, loop, or retime each clip to its declared duration
//! - **Normalize:** Crop-to-fill or pad-to-fit geometry for the output frame
//! - **Timeline:** Scene placement, transition handles, and overlay windows
//!
//! This crate is pure computation with no I/O and no media tools.
//! All inputs are data; all outputs are data.

pub mod normalize;
pub mod reconcile;
pub mod timeline;

pub use normalize::{normalize_geometry, NormalizeGeometry};
pub use reconcile::{DurationReconciler, ReconcileError};
pub use timeline::{LayoutError, TimelineEntry, TimelineLayout};
