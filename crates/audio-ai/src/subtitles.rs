//! Subtitle reading and writing in SRT and VTT formats, and placement of
//! cues on the output timeline.

use crate::transcription::TranscriptionSegment;
use mvgen_common::error::MvgenResult;

/// Malformed subtitle input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct SubtitleParseError {
    pub line: usize,
    pub message: String,
}

/// Generate SRT subtitle content from transcription segments.
pub fn generate_srt(segments: &[TranscriptionSegment]) -> String {
    let mut output = String::new();

    for (i, segment) in segments.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(segment.start_secs),
            format_srt_time(segment.end_secs),
        ));
        output.push_str(&segment.text);
        output.push_str("\n\n");
    }

    output
}

/// Generate WebVTT subtitle content from transcription segments.
pub fn generate_vtt(segments: &[TranscriptionSegment]) -> String {
    let mut output = String::from("WEBVTT\n\n");

    for segment in segments {
        output.push_str(&format!(
            "{} --> {}\n",
            format_vtt_time(segment.start_secs),
            format_vtt_time(segment.end_secs),
        ));
        output.push_str(&segment.text);
        output.push_str("\n\n");
    }

    output
}

/// Parse SRT content. Cue numbers are optional; multi-line cue text is kept
/// with its line breaks. A UTF-8 BOM and CRLF line endings are accepted.
pub fn parse_srt(content: &str) -> Result<Vec<TranscriptionSegment>, SubtitleParseError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut segments = Vec::new();
    let mut lines = content.lines().enumerate().peekable();

    loop {
        while matches!(lines.peek(), Some((_, l)) if l.trim().is_empty()) {
            lines.next();
        }
        let Some((mut line_no, mut line)) = lines.next() else {
            break;
        };

        if !line.contains("-->") {
            if line.trim().parse::<u64>().is_err() {
                return Err(SubtitleParseError {
                    line: line_no + 1,
                    message: format!("expected cue number or timing, found `{}`", line.trim()),
                });
            }
            match lines.next() {
                Some((n, l)) => {
                    line_no = n;
                    line = l;
                }
                None => {
                    return Err(SubtitleParseError {
                        line: line_no + 1,
                        message: "cue number without timing".to_string(),
                    })
                }
            }
        }

        let (start, end) = parse_timing_line(line).map_err(|message| SubtitleParseError {
            line: line_no + 1,
            message,
        })?;

        let mut text = Vec::new();
        while let Some((_, l)) = lines.peek() {
            if l.trim().is_empty() {
                break;
            }
            text.push(l.trim_end().to_string());
            lines.next();
        }

        segments.push(TranscriptionSegment::new(start, end, text.join("\n")));
    }

    Ok(segments)
}

fn parse_timing_line(line: &str) -> Result<(f64, f64), String> {
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| format!("expected `start --> end`, found `{}`", line.trim()))?;
    // Anything after the end timestamp is positioning, which is ignored.
    let end = rest.split_whitespace().next().unwrap_or_default();
    let start = parse_timestamp(start.trim())?;
    let end = parse_timestamp(end)?;
    if end < start {
        return Err(format!("cue ends before it starts ({start:.3}s > {end:.3}s)"));
    }
    Ok((start, end))
}

/// Parse `HH:MM:SS,mmm` (or `.mmm`, or `MM:SS,mmm`) into seconds.
fn parse_timestamp(s: &str) -> Result<f64, String> {
    let bad = || format!("invalid timestamp `{s}`");
    let normalized = s.replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    let (h, m, sec) = match parts.as_slice() {
        [h, m, sec] => (*h, *m, *sec),
        [m, sec] => ("0", *m, *sec),
        _ => return Err(bad()),
    };
    let h: u64 = h.parse().map_err(|_| bad())?;
    let m: u64 = m.parse().map_err(|_| bad())?;
    let sec: f64 = sec.parse().map_err(|_| bad())?;
    if m >= 60 || !(0.0..60.0).contains(&sec) {
        return Err(bad());
    }
    Ok(h as f64 * 3600.0 + m as f64 * 60.0 + sec)
}

/// Place transcribed cues on an output timeline of `total_secs`.
///
/// When the music track loops (`loop_audio` with a known `audio_secs`
/// shorter than the timeline), every cue is repeated once per loop
/// iteration, offset by the audio length. Cues are clipped to the timeline
/// and to their own loop iteration; cues that fall entirely outside are
/// dropped.
pub fn place_cues(
    segments: &[TranscriptionSegment],
    audio_secs: Option<f64>,
    total_secs: f64,
    loop_audio: bool,
) -> Vec<TranscriptionSegment> {
    const MIN_CUE_SECS: f64 = 0.001;

    let (period, iterations) = match audio_secs {
        Some(a) if loop_audio && a > 0.0 && a < total_secs => {
            (a, (total_secs / a).ceil() as usize)
        }
        Some(a) if a > 0.0 => (a, 1),
        _ => (f64::INFINITY, 1),
    };

    let mut placed = Vec::new();
    for k in 0..iterations {
        let offset = k as f64 * if period.is_finite() { period } else { 0.0 };
        for segment in segments {
            let start = segment.start_secs + offset;
            let end = (segment.end_secs.min(period) + offset).min(total_secs);
            if start >= total_secs || end - start < MIN_CUE_SECS {
                continue;
            }
            placed.push(TranscriptionSegment {
                start_secs: start,
                end_secs: end,
                ..segment.clone()
            });
        }
    }
    placed.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
    placed
}

/// Format seconds as SRT timestamp: HH:MM:SS,mmm
fn format_srt_time(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Format seconds as VTT timestamp: HH:MM:SS.mmm
fn format_vtt_time(secs: f64) -> String {
    format_srt_time(secs).replace(',', ".")
}

/// Save subtitles to a file.
pub fn save_subtitles(
    segments: &[TranscriptionSegment],
    path: &std::path::Path,
) -> MvgenResult<()> {
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("vtt") => generate_vtt(segments),
        _ => generate_srt(segments), // default to SRT
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}
