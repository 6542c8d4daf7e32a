//! Composition planning: turns reconciled clips into one ffmpeg invocation.
//!
//! ```text
//! clip 0 ── timing ── normalize ──┐
//! clip 1 ── timing ── normalize ──┼── concat / xfade ── drawtext ── [vout]
//! clip N ── timing ── normalize ──┘
//! music ─── loop/trim ── volume ── afade ──────────────────────── [aout]
//! ```
//!
//! Planning is pure: nothing here touches the output path, so a planning
//! failure (`TransitionOverlap`, `AudioSync`) leaves the filesystem as it was.

use std::path::{Path, PathBuf};

use mvgen_audio_ai::TranscriptionSegment;
use mvgen_common::{MvgenError, MvgenResult};
use mvgen_processing_core::{normalize_geometry, TimelineLayout};
use mvgen_project_model::{
    Manifest, OutputFormat, OverlayPosition, Quality, ReconcilePlan, ReconciledClip, Resolution,
    SubtitleSource, TextStyle, DEFAULT_MARGIN_PX,
};

const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// The music track as handed to the compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInput {
    /// Absolute path to the audio file.
    pub path: PathBuf,
    /// Probed duration, when known.
    pub duration_secs: Option<f64>,
}

/// One ffmpeg input with its input-side options.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    /// Options placed before `-i` (e.g. `-stream_loop`).
    pub options: Vec<String>,
    /// The `-i` argument.
    pub source: String,
}

impl InputSpec {
    fn file(path: &Path) -> Self {
        Self {
            options: Vec::new(),
            source: path.display().to_string(),
        }
    }

    fn looped_file(path: &Path) -> Self {
        Self {
            options: vec!["-stream_loop".to_string(), "-1".to_string()],
            source: path.display().to_string(),
        }
    }

    fn silence(duration_secs: f64) -> Self {
        Self {
            options: vec![
                "-f".to_string(),
                "lavfi".to_string(),
                "-t".to_string(),
                format!("{duration_secs:.6}"),
            ],
            source: format!("anullsrc=channel_layout=stereo:sample_rate={AUDIO_SAMPLE_RATE}"),
        }
    }
}

/// Everything needed to encode the final video.
#[derive(Debug, Clone)]
pub struct CompositionPlan {
    pub inputs: Vec<InputSpec>,
    pub filter_graph: String,
    pub video_label: String,
    pub audio_label: String,
    pub codec_args: Vec<String>,
    pub layout: TimelineLayout,
    pub resolution: Resolution,
    pub format: OutputFormat,
    pub quality: Quality,
    /// Subtitle cues burned into the video, in output time.
    pub cues: Vec<TranscriptionSegment>,
}

impl CompositionPlan {
    pub fn total_secs(&self) -> f64 {
        self.layout.total_secs
    }

    pub fn frame_rate(&self) -> f64 {
        self.layout.frame_rate
    }

    pub fn total_frames(&self) -> u64 {
        (self.layout.total_secs * self.layout.frame_rate).round() as u64
    }

    /// Full ffmpeg argument list writing to `output`.
    pub fn ffmpeg_args(&self, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
        ];
        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }
        args.push("-filter_complex".to_string());
        args.push(self.filter_graph.clone());
        args.push("-map".to_string());
        args.push(self.video_label.clone());
        args.push("-map".to_string());
        args.push(self.audio_label.clone());
        args.push("-r".to_string());
        args.push(format_rate(self.frame_rate()));
        args.push("-t".to_string());
        args.push(format!("{:.6}", self.total_secs()));
        args.extend(self.codec_args.iter().cloned());
        args.push(output.display().to_string());
        args
    }
}

/// Builds a [`CompositionPlan`] from a manifest and its reconciled clips.
pub struct Compositor<'a> {
    manifest: &'a Manifest,
}

impl<'a> Compositor<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self { manifest }
    }

    /// Plan the composition of `clips` (manifest order, possibly a subset).
    ///
    /// `cues` are subtitle cues already placed in output time.
    pub fn plan(
        &self,
        clips: &[ReconciledClip],
        audio: Option<&AudioInput>,
        cues: &[TranscriptionSegment],
    ) -> MvgenResult<CompositionPlan> {
        let output = &self.manifest.output;
        let layout = TimelineLayout::build(&self.manifest.scenes, clips, output.frame_rate)?;

        let wants_audio_subtitles = matches!(
            self.manifest.subtitles.as_ref().map(|s| &s.source),
            Some(SubtitleSource::Audio)
        );
        if wants_audio_subtitles && audio.is_none() {
            return Err(MvgenError::audio_sync(
                "subtitles are sourced from the audio track but no audio track is configured",
            ));
        }
        if let Some(d) = audio.and_then(|a| a.duration_secs) {
            if !d.is_finite() || d <= 0.0 {
                return Err(MvgenError::audio_sync(format!(
                    "audio track has no usable duration ({d})"
                )));
            }
        }

        let mut inputs = Vec::with_capacity(clips.len() + 1);
        let mut chains = Vec::new();

        for (entry, clip) in layout.entries.iter().zip(clips) {
            inputs.push(InputSpec::file(&clip.path));

            let geometry = normalize_geometry(
                clip.media.width,
                clip.media.height,
                output.resolution,
                output.fit,
            );
            chains.push(format!(
                "[{i}:v]{timing},{normalize},format=yuv420p[v{i}]",
                i = entry.index,
                timing = timing_filter(&entry.render_plan, output.frame_rate),
                normalize = geometry.filter(&output.pad_color),
            ));
        }

        let joined = join_filters(&layout, &mut chains);

        let mut drawtexts = Vec::new();
        for entry in &layout.entries {
            let (Some(scene), Some((start, end))) = (
                self.manifest.scene(&entry.scene_id),
                entry.overlay_window,
            ) else {
                continue;
            };
            let Some(overlay) = &scene.overlay else {
                continue;
            };
            if end - start <= 0.0 {
                continue;
            }
            let style = self
                .manifest
                .resolved_style(&overlay.style)
                .unwrap_or_default();
            drawtexts.push(drawtext(
                &overlay.text,
                &style,
                overlay.position,
                start,
                end,
            ));
        }

        let mut burned = Vec::new();
        if let Some(subtitles) = &self.manifest.subtitles {
            let style = self
                .manifest
                .resolved_style(&subtitles.style)
                .unwrap_or_default();
            for cue in cues {
                let start = cue.start_secs.max(0.0);
                let end = cue.end_secs.min(layout.total_secs);
                if end <= start || cue.text.trim().is_empty() {
                    continue;
                }
                drawtexts.push(drawtext(&cue.text, &style, subtitles.position, start, end));
                burned.push(TranscriptionSegment {
                    start_secs: start,
                    end_secs: end,
                    ..cue.clone()
                });
            }
        }

        let video_tail = if drawtexts.is_empty() {
            format!("[{joined}]null[vout]")
        } else {
            format!("[{joined}]{}[vout]", drawtexts.join(","))
        };
        chains.push(video_tail);

        let audio_index = inputs.len();
        let total = layout.total_secs;
        let audio_label = match (audio, &self.manifest.audio) {
            (Some(input), Some(track)) => {
                let looping =
                    track.loop_audio && input.duration_secs.map_or(true, |d| d < total);
                inputs.push(if looping {
                    InputSpec::looped_file(&input.path)
                } else {
                    InputSpec::file(&input.path)
                });
                chains.push(format!(
                    "[{audio_index}:a]{}[aout]",
                    audio_filter(total, track.volume, track.fade_in_secs, track.fade_out_secs)
                ));
                "[aout]".to_string()
            }
            _ => {
                inputs.push(InputSpec::silence(total));
                format!("{audio_index}:a")
            }
        };

        let plan = CompositionPlan {
            inputs,
            filter_graph: chains.join(";"),
            video_label: "[vout]".to_string(),
            audio_label,
            codec_args: codec_args(output.format, output.quality),
            resolution: output.resolution,
            format: output.format,
            quality: output.quality,
            cues: burned,
            layout,
        };

        tracing::info!(
            scenes = plan.layout.entries.len(),
            total_secs = plan.total_secs(),
            fit = ?output.fit,
            format = ?plan.format,
            quality = ?plan.quality,
            overlays = drawtexts.len(),
            filter_len = plan.filter_graph.len(),
            "Composition planned"
        );
        Ok(plan)
    }
}

/// Per-clip timing: applies the reconcile plan on the output frame grid.
///
/// A loop repeats exactly `source_secs` of the clip, so every seam lands on
/// a multiple of the loop period rather than of the file's native length.
fn timing_filter(plan: &ReconcilePlan, fps: f64) -> String {
    let rate = format_rate(fps);
    match *plan {
        ReconcilePlan::Passthrough { duration_secs } => {
            format!("fps={rate},trim=duration={duration_secs:.6},setpts=PTS-STARTPTS")
        }
        ReconcilePlan::Loop {
            iterations,
            source_secs,
            duration_secs,
        } => {
            let period = ((source_secs * fps).round() as u64).max(1);
            format!(
                "fps={rate},trim=end_frame={period},setpts=PTS-STARTPTS,\
                 loop=loop={repeats}:size={period}:start=0,setpts=N/FRAME_RATE/TB,\
                 trim=duration={duration_secs:.6},setpts=PTS-STARTPTS",
                repeats = iterations.saturating_sub(1),
            )
        }
        ReconcilePlan::Trim {
            start_secs,
            duration_secs,
        } => format!(
            "fps={rate},trim=start={start_secs:.6}:duration={duration_secs:.6},setpts=PTS-STARTPTS"
        ),
        ReconcilePlan::Retime {
            factor,
            duration_secs,
        } => format!(
            "setpts={factor:.6}*(PTS-STARTPTS),fps={rate},trim=duration={duration_secs:.6},setpts=PTS-STARTPTS"
        ),
    }
}

/// Join the normalized clip streams. Returns the label of the joined stream.
fn join_filters(layout: &TimelineLayout, chains: &mut Vec<String>) -> String {
    let entries = &layout.entries;
    if entries.len() == 1 {
        return "v0".to_string();
    }

    if entries.iter().all(|e| e.transition_out.is_none()) {
        let labels: String = entries.iter().map(|e| format!("[v{}]", e.index)).collect();
        chains.push(format!(
            "{labels}concat=n={}:v=1:a=0[vjoin]",
            entries.len()
        ));
        return "vjoin".to_string();
    }

    // Pairwise: the running stream always ends exactly where the previous
    // clip's tail handle ends, so an xfade offset is the next scene's start.
    let mut current = "v0".to_string();
    for pair in entries.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let label = format!("j{}", next.index);
        let step = match prev.transition_out {
            Some(t) => format!(
                "[{current}][v{n}]xfade=transition={kind}:duration={d:.6}:offset={o:.6}[{label}]",
                n = next.index,
                kind = t.kind.xfade_name(),
                d = t.duration_secs,
                o = next.start_secs,
            ),
            None => format!("[{current}][v{n}]concat=n=2:v=1:a=0[{label}]", n = next.index),
        };
        chains.push(step);
        current = label;
    }
    current
}

fn audio_filter(total_secs: f64, volume: f64, fade_in: f64, fade_out: f64) -> String {
    let mut parts = vec![
        format!("aformat=sample_rates={AUDIO_SAMPLE_RATE}:channel_layouts=stereo"),
        "apad".to_string(),
        format!("atrim=duration={total_secs:.6}"),
        "asetpts=PTS-STARTPTS".to_string(),
        format!("volume={volume:.4}"),
    ];
    let fade_in = fade_in.min(total_secs);
    if fade_in > 0.0 {
        parts.push(format!("afade=t=in:st=0:d={fade_in:.6}"));
    }
    let fade_out = fade_out.min(total_secs);
    if fade_out > 0.0 {
        parts.push(format!(
            "afade=t=out:st={:.6}:d={fade_out:.6}",
            total_secs - fade_out
        ));
    }
    parts.join(",")
}

/// A `drawtext` filter shown during `[start, end)` of output time.
fn drawtext(
    text: &str,
    style: &TextStyle,
    position: OverlayPosition,
    start: f64,
    end: f64,
) -> String {
    let (x, y) = position.drawtext_xy(DEFAULT_MARGIN_PX);
    let font_key = if style.font.contains('/') || style.font.contains('.') {
        "fontfile"
    } else {
        "font"
    };
    let mut opts = vec![
        format!("{font_key}={}", escape_filter_value(&style.font)),
        format!("text={}", escape_filter_value(text)),
        "expansion=none".to_string(),
        format!("fontsize={}", style.font_size),
        format!("fontcolor={}", escape_filter_value(&style.color)),
        format!("x={x}"),
        format!("y={y}"),
    ];
    if let (true, Some(stroke)) = (style.has_stroke(), &style.stroke_color) {
        opts.push(format!("borderw={}", style.stroke_width));
        opts.push(format!("bordercolor={}", escape_filter_value(stroke)));
    }
    if let Some(background) = &style.background_color {
        opts.push("box=1".to_string());
        opts.push(format!("boxcolor={}", escape_filter_value(background)));
        opts.push(format!("boxborderw={}", style.padding));
    }
    opts.push(format!("enable=between(t\\,{start:.3}\\,{end:.3})"));
    format!("drawtext={}", opts.join(":"))
}

/// Escape a value for a filter option inside a filtergraph.
///
/// Two levels apply: the option parser (`\ ' :`) and then the filtergraph
/// parser (`\ ' [ ] , ;`).
pub fn escape_filter_value(value: &str) -> String {
    let option_level = escape_chars(value, &['\\', '\'', ':']);
    escape_chars(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Encoder arguments per container and quality.
pub fn codec_args(format: OutputFormat, quality: Quality) -> Vec<String> {
    let draft = quality == Quality::Draft;
    let args: Vec<&str> = match format {
        OutputFormat::Mp4 | OutputFormat::Mov => {
            let mut args = vec![
                "-c:v",
                "libx264",
                "-preset",
                if draft { "veryfast" } else { "medium" },
                "-crf",
                if draft { "28" } else { "18" },
                "-profile:v",
                "high",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                if draft { "128k" } else { "192k" },
            ];
            if format == OutputFormat::Mp4 {
                args.extend(["-movflags", "+faststart"]);
            }
            args
        }
        OutputFormat::Webm => vec![
            "-c:v",
            "libvpx-vp9",
            "-b:v",
            "0",
            "-crf",
            if draft { "40" } else { "31" },
            "-deadline",
            if draft { "realtime" } else { "good" },
            "-cpu-used",
            if draft { "8" } else { "2" },
            "-row-mt",
            "1",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "libopus",
            "-b:a",
            if draft { "96k" } else { "160k" },
        ],
    };
    args.into_iter().map(String::from).collect()
}

fn format_rate(fps: f64) -> String {
    if (fps - fps.round()).abs() < 1e-9 {
        format!("{}", fps.round() as u64)
    } else {
        format!("{fps:.6}")
    }
}
