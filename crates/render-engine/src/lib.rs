//! mvgen Render Engine
//!
//! Compiles reconciled clips, overlays, subtitles and the music track into
//! one encoded video file.
//!
//! # Pipeline Architecture
//!
//! ```text
//! reconciled clips ──┐
//!                    ├── Timing (trim / loop / retime)
//! manifest output ───┘         │
//!                              ├── Normalize (crop-to-fill / pad-to-fit)
//!                              │
//!                              ├── Join (concat / xfade)
//! overlays + cues ─────────────┘         │
//!                                        ├── drawtext
//! music track ───────────────────────────┘         │
//!                                                  ├── Encode (x264 / vp9)
//!                                                  ▼
//!                                     output.partial.mp4 ── rename ──▶ output.mp4
//! ```

pub mod compositor;
pub mod export;

pub use compositor::*;
pub use export::*;
