//! mvgen Audio Intelligence
//!
//! Timed text for the music track:
//! - **Transcription:** pluggable speech-to-text (`HttpTranscriber`) or pre-timed
//!   lyrics files (`SrtFileTranscriber`)
//! - **Subtitle I/O:** SRT/VTT generation and SRT parsing
//! - **Cue placement:** repeating cues per audio loop and clipping them to the timeline

pub mod subtitles;
pub mod transcription;

pub use subtitles::*;
pub use transcription::*;
