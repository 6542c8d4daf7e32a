//! Transcribe an audio file to SRT or VTT.

use std::path::PathBuf;

use mvgen_audio_ai::{save_subtitles, HttpTranscriber, Transcriber};
use mvgen_common::AppConfig;

pub async fn run(
    config: &AppConfig,
    audio: PathBuf,
    output: PathBuf,
    language: Option<String>,
) -> anyhow::Result<i32> {
    let mut transcription = config.transcription.clone();
    if language.is_some() {
        transcription.language = language;
    }
    let Some(transcriber) = HttpTranscriber::from_config(&transcription)? else {
        anyhow::bail!(
            "no transcription service configured (set transcription.base_url or MVGEN_TRANSCRIPTION_URL)"
        );
    };

    println!("Transcribing: {}", audio.display());
    let result = transcriber.transcribe(&audio).await?;
    save_subtitles(&result.segments, &output)?;

    println!("  Language: {}", result.language);
    println!("  Segments: {}", result.segments.len());
    println!("  Processing time: {:.1}s", result.processing_time_secs);
    println!("Subtitles written: {}", output.display());
    Ok(0)
}
