//! mvgen Project Model
//!
//! Defines the core data contracts for mvgen projects:
//! - **Manifest:** The declarative scene list and global output settings
//! - **Styles:** Text style presets and overlay positions
//! - **Clips:** Resolved and reconciled clip handles
//! - **Run state:** Persisted per-scene pipeline progress used for resume
//!
//! This crate performs no media work; it only parses, validates, and persists.

pub mod clip;
pub mod manifest;
pub mod run_state;
pub mod style;

pub use clip::*;
pub use manifest::*;
pub use run_state::*;
pub use style::*;
