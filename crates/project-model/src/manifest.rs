//! Scene manifest: the declarative description of a music video.
//!
//! A manifest is read from JSON or TOML (chosen by file extension) into a
//! [`ManifestDocument`], which mirrors the on-disk layout, and then converted
//! into a validated [`Manifest`]. Every field problem is reported as a
//! [`ValidationError`] naming the offending field path, e.g.
//! `scenes[2].duration`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::style::{OverlayPosition, TextStyle};

/// Frame rates above this are rejected.
pub const MAX_FRAME_RATE: f64 = 240.0;

/// Short side of the output frame when only an aspect ratio is given.
pub const DEFAULT_SHORT_SIDE: u32 = 1080;

/// Allowed relative mismatch between a resolution and its aspect ratio.
const ASPECT_TOLERANCE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

/// A validated manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Human-readable project name.
    pub project_name: String,

    /// Global output settings.
    pub output: OutputSettings,

    /// Music track laid under the whole timeline.
    pub audio: Option<AudioTrack>,

    /// Burned-in subtitles.
    pub subtitles: Option<SubtitleSettings>,

    /// User-defined styles, consulted before the presets.
    pub styles: BTreeMap<String, TextStyle>,

    /// Scenes in timeline order.
    pub scenes: Vec<Scene>,
}

/// Output geometry, timing and encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    pub frame_rate: f64,
    pub fit: FitPolicy,
    pub pad_color: String,
    pub format: OutputFormat,
    pub quality: Quality,
}

/// One timeline segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub source: SceneSource,
    pub duration_secs: f64,
    pub overlay: Option<Overlay>,
    /// Transition into the following scene.
    pub transition: Option<Transition>,
    pub reconcile: ReconcileOptions,
}

/// Where a scene's footage comes from. Exactly one per scene.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneSource {
    Generate(GenerationDirective),
    File(FileReference),
}

/// Request for the generation backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDirective {
    pub prompt: String,
    pub params: GenerationParams,
}

/// Existing media on disk. Relative paths are resolved against the
/// manifest's directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReference {
    pub path: PathBuf,
}

/// Width:height ratio, e.g. `9:16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

/// Output frame size in pixels, e.g. `1080x1920`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

// ---------------------------------------------------------------------------
// Wire layout
// ---------------------------------------------------------------------------

/// On-disk manifest layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub project_name: String,

    #[serde(default)]
    pub output: OutputDocument,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTrack>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<SubtitleSettings>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub styles: BTreeMap<String, TextStyle>,

    #[serde(default)]
    pub scenes: Vec<SceneDocument>,
}

/// On-disk output settings. Geometry stays textual until validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDocument {
    /// `W:H`, defaults to `9:16`.
    pub aspect_ratio: String,

    /// `WxH`; derived from the aspect ratio when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    pub frame_rate: f64,

    pub fit: FitPolicy,

    pub pad_color: String,

    pub format: OutputFormat,

    pub quality: Quality,
}

impl Default for OutputDocument {
    fn default() -> Self {
        Self {
            aspect_ratio: "9:16".to_string(),
            resolution: None,
            frame_rate: 30.0,
            fit: FitPolicy::default(),
            pad_color: "black".to_string(),
            format: OutputFormat::default(),
            quality: Quality::default(),
        }
    }
}

/// On-disk scene layout: `prompt` and `file` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDocument {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Extra parameters forwarded to the generation backend.
    #[serde(default, skip_serializing_if = "GenerationParams::is_empty")]
    pub generation: GenerationParams,

    /// Target duration in seconds.
    pub duration: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Overlay>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,

    #[serde(default)]
    pub reconcile: ReconcileOptions,
}

// ---------------------------------------------------------------------------
// Shared leaf types (identical on disk and in memory)
// ---------------------------------------------------------------------------

/// How clips with a different aspect ratio are fitted to the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    /// Scale to cover the frame, crop the overflow (centered).
    #[default]
    Crop,
    /// Scale to fit inside the frame, pad the remainder (centered).
    Pad,
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mov,
}

/// Encoding quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Fast preset, low bitrate; for previews.
    Draft,
    #[default]
    Final,
}

/// Parameters forwarded verbatim to the generation backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Anything else the backend understands.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl GenerationParams {
    pub fn is_empty(&self) -> bool {
        self.style.is_none()
            && self.negative_prompt.is_none()
            && self.seed.is_none()
            && self.extra.is_empty()
    }
}

/// Music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Path to the audio file, relative to the manifest directory.
    pub path: PathBuf,

    /// Linear gain.
    #[serde(default = "default_volume")]
    pub volume: f64,

    /// Fade-in at the very start of the video.
    #[serde(default)]
    pub fade_in_secs: f64,

    /// Fade-out at the very end of the video.
    #[serde(default = "default_fade_out")]
    pub fade_out_secs: f64,

    /// Loop the track when the video is longer than the audio.
    #[serde(default = "default_true")]
    pub loop_audio: bool,
}

/// Burned-in subtitle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSettings {
    pub source: SubtitleSource,

    #[serde(default = "default_subtitle_style")]
    pub style: String,

    #[serde(default)]
    pub position: OverlayPosition,
}

/// Where subtitle cues come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubtitleSource {
    /// Transcribe the manifest's audio track.
    Audio,
    /// Pre-timed `.srt` file, timed against the audio track.
    File { path: PathBuf },
}

/// Text drawn over one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub text: String,

    #[serde(default = "default_overlay_style")]
    pub style: String,

    #[serde(default)]
    pub position: OverlayPosition,

    /// Start within the scene, seconds. Defaults to the scene start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_secs: Option<f64>,

    /// End within the scene, seconds. Defaults to the scene end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_secs: Option<f64>,
}

/// Transition from a scene into the next one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default)]
    pub kind: TransitionKind,

    /// Overlap in seconds taken from the adjoining clip boundaries.
    #[serde(rename = "duration")]
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    Crossfade,
    FadeBlack,
}

impl TransitionKind {
    /// ffmpeg `xfade` transition name.
    pub fn xfade_name(self) -> &'static str {
        match self {
            Self::Crossfade => "fade",
            Self::FadeBlack => "fadeblack",
        }
    }
}

/// Per-scene duration reconciliation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReconcileOptions {
    pub policy: SpeedPolicy,
    pub anchor: TrimAnchor,
}

/// How a clip is brought to its target duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeedPolicy {
    /// Trim long clips, loop short ones.
    #[default]
    LoopTrim,
    /// Stretch or compress playback speed.
    Retime,
}

/// Which part of a long clip survives trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrimAnchor {
    #[default]
    Start,
    Center,
    End,
}

fn default_volume() -> f64 {
    1.0
}

fn default_fade_out() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_subtitle_style() -> String {
    "caption".to_string()
}

fn default_overlay_style() -> String {
    "default".to_string()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A manifest field failed validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid `{field}`: {message}")]
pub struct ValidationError {
    /// Field path, e.g. `scenes[0].duration`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur when loading or saving manifests.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {origin}: {message}")]
    ParseError { origin: String, message: String },

    #[error("Unsupported manifest format: {path} (expected .json or .toml)")]
    UnsupportedFormat { path: PathBuf },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ---------------------------------------------------------------------------
// Geometry parsing
// ---------------------------------------------------------------------------

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected `W:H`, got `{s}`"))?;
        let width = parse_positive(w).ok_or_else(|| format!("bad width in `{s}`"))?;
        let height = parse_positive(h).ok_or_else(|| format!("bad height in `{s}`"))?;
        Ok(Self { width, height })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl AspectRatio {
    pub fn ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Even-sized resolution with the given short side.
    pub fn default_resolution(&self, short_side: u32) -> Resolution {
        let scale = |long: u32, short: u32| -> u32 {
            let raw = (short_side as f64 * long as f64 / short as f64).round() as u32;
            raw + raw % 2
        };
        if self.width >= self.height {
            Resolution {
                width: scale(self.width, self.height),
                height: short_side,
            }
        } else {
            Resolution {
                width: short_side,
                height: scale(self.height, self.width),
            }
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (w, h) = lower
            .split_once('x')
            .ok_or_else(|| format!("expected `WxH`, got `{s}`"))?;
        let width = parse_positive(w).ok_or_else(|| format!("bad width in `{s}`"))?;
        let height = parse_positive(h).ok_or_else(|| format!("bad height in `{s}`"))?;
        if width % 2 != 0 || height % 2 != 0 {
            return Err(format!("`{s}` must have even dimensions"));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn parse_positive(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok().filter(|v| *v > 0)
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl Manifest {
    /// Load and validate a manifest file. The format follows the extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        match extension(path).as_deref() {
            Some("json") => Self::parse_json(&content, &path.display().to_string()),
            Some("toml") => Self::parse_toml(&content, &path.display().to_string()),
            _ => Err(ManifestError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, ManifestError> {
        Self::parse_json(content, "<json>")
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ManifestError> {
        Self::parse_toml(content, "<toml>")
    }

    fn parse_json(content: &str, origin: &str) -> Result<Self, ManifestError> {
        let doc: ManifestDocument =
            serde_json::from_str(content).map_err(|e| ManifestError::ParseError {
                origin: origin.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::from_document(doc)?)
    }

    fn parse_toml(content: &str, origin: &str) -> Result<Self, ManifestError> {
        let doc: ManifestDocument =
            toml::from_str(content).map_err(|e| ManifestError::ParseError {
                origin: origin.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::from_document(doc)?)
    }

    /// Save the manifest. The format follows the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let path = path.as_ref();
        let doc = self.to_document();
        let content = match extension(path).as_deref() {
            Some("json") => {
                serde_json::to_string_pretty(&doc).map_err(|e| ManifestError::ParseError {
                    origin: path.display().to_string(),
                    message: e.to_string(),
                })?
            }
            Some("toml") => toml::to_string_pretty(&doc).map_err(|e| ManifestError::ParseError {
                origin: path.display().to_string(),
                message: e.to_string(),
            })?,
            _ => {
                return Err(ManifestError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };
        std::fs::write(path, content).map_err(|e| ManifestError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validate a wire document and convert it into the model.
    pub fn from_document(doc: ManifestDocument) -> Result<Self, ValidationError> {
        if doc.project_name.trim().is_empty() {
            return Err(ValidationError::new("project_name", "must not be empty"));
        }

        let output = validate_output(&doc.output)?;

        for (name, style) in &doc.styles {
            if style.font_size == 0 {
                return Err(ValidationError::new(
                    format!("styles.{name}.font_size"),
                    "must be positive",
                ));
            }
        }
        let style_known =
            |name: &str| doc.styles.contains_key(name) || TextStyle::preset(name).is_some();

        if let Some(audio) = &doc.audio {
            if audio.path.as_os_str().is_empty() {
                return Err(ValidationError::new("audio.path", "must not be empty"));
            }
            if !audio.volume.is_finite() || audio.volume < 0.0 {
                return Err(ValidationError::new("audio.volume", "must be non-negative"));
            }
            if !audio.fade_in_secs.is_finite() || audio.fade_in_secs < 0.0 {
                return Err(ValidationError::new(
                    "audio.fade_in_secs",
                    "must be non-negative",
                ));
            }
            if !audio.fade_out_secs.is_finite() || audio.fade_out_secs < 0.0 {
                return Err(ValidationError::new(
                    "audio.fade_out_secs",
                    "must be non-negative",
                ));
            }
        }

        if let Some(subtitles) = &doc.subtitles {
            if !style_known(&subtitles.style) {
                return Err(ValidationError::new(
                    "subtitles.style",
                    format!("unknown style `{}`", subtitles.style),
                ));
            }
        }

        if doc.scenes.is_empty() {
            return Err(ValidationError::new("scenes", "at least one scene is required"));
        }

        let mut seen = HashSet::new();
        let last = doc.scenes.len() - 1;
        let mut scenes = Vec::with_capacity(doc.scenes.len());
        for (i, raw) in doc.scenes.into_iter().enumerate() {
            let field = |name: &str| format!("scenes[{i}].{name}");

            if raw.id.trim().is_empty() {
                return Err(ValidationError::new(field("id"), "must not be empty"));
            }
            if !seen.insert(raw.id.clone()) {
                return Err(ValidationError::new(
                    field("id"),
                    format!("duplicate scene id `{}`", raw.id),
                ));
            }

            if !raw.duration.is_finite() || raw.duration <= 0.0 {
                return Err(ValidationError::new(
                    field("duration"),
                    format!("must be positive, got {}", raw.duration),
                ));
            }

            let source = match (raw.prompt, raw.file) {
                (Some(_), Some(_)) => {
                    return Err(ValidationError::new(
                        field("source"),
                        "has both `prompt` and `file`; exactly one is required",
                    ))
                }
                (None, None) => {
                    return Err(ValidationError::new(
                        field("source"),
                        "has neither `prompt` nor `file`; exactly one is required",
                    ))
                }
                (Some(prompt), None) => {
                    if prompt.trim().is_empty() {
                        return Err(ValidationError::new(field("prompt"), "must not be blank"));
                    }
                    SceneSource::Generate(GenerationDirective {
                        prompt,
                        params: raw.generation,
                    })
                }
                (None, Some(path)) => {
                    if path.as_os_str().is_empty() {
                        return Err(ValidationError::new(field("file"), "must not be empty"));
                    }
                    SceneSource::File(FileReference { path })
                }
            };

            if let Some(overlay) = &raw.overlay {
                if overlay.text.trim().is_empty() {
                    return Err(ValidationError::new(
                        field("overlay.text"),
                        "must not be blank",
                    ));
                }
                if !style_known(&overlay.style) {
                    return Err(ValidationError::new(
                        field("overlay.style"),
                        format!("unknown style `{}`", overlay.style),
                    ));
                }
                let start = overlay.start_secs.unwrap_or(0.0);
                let end = overlay.end_secs.unwrap_or(raw.duration);
                if !start.is_finite() || start < 0.0 || start > raw.duration {
                    return Err(ValidationError::new(
                        field("overlay.start_secs"),
                        "must lie within the scene duration",
                    ));
                }
                if !end.is_finite() || end > raw.duration + 1e-9 {
                    return Err(ValidationError::new(
                        field("overlay.end_secs"),
                        "must lie within the scene duration",
                    ));
                }
                if end <= start {
                    return Err(ValidationError::new(
                        field("overlay.end_secs"),
                        "must be after start_secs",
                    ));
                }
            }

            if let Some(transition) = &raw.transition {
                if !transition.duration_secs.is_finite() || transition.duration_secs <= 0.0 {
                    return Err(ValidationError::new(
                        field("transition.duration"),
                        "must be positive",
                    ));
                }
                if i == last {
                    return Err(ValidationError::new(
                        field("transition"),
                        "the last scene has no following scene to transition into",
                    ));
                }
            }

            scenes.push(Scene {
                id: raw.id,
                source,
                duration_secs: raw.duration,
                overlay: raw.overlay,
                transition: raw.transition,
                reconcile: raw.reconcile,
            });
        }

        Ok(Self {
            project_name: doc.project_name,
            output,
            audio: doc.audio,
            subtitles: doc.subtitles,
            styles: doc.styles,
            scenes,
        })
    }

    /// Re-check invariants on a manifest built or edited in code.
    pub fn validate(&self) -> Result<(), ValidationError> {
        Self::from_document(self.to_document()).map(|_| ())
    }

    /// Convert back to the wire layout.
    pub fn to_document(&self) -> ManifestDocument {
        ManifestDocument {
            project_name: self.project_name.clone(),
            output: OutputDocument {
                aspect_ratio: self.output.aspect_ratio.to_string(),
                resolution: Some(self.output.resolution.to_string()),
                frame_rate: self.output.frame_rate,
                fit: self.output.fit,
                pad_color: self.output.pad_color.clone(),
                format: self.output.format,
                quality: self.output.quality,
            },
            audio: self.audio.clone(),
            subtitles: self.subtitles.clone(),
            styles: self.styles.clone(),
            scenes: self.scenes.iter().map(SceneDocument::from).collect(),
        }
    }

    /// Stable hash of the settings that shape the whole video: everything
    /// except the scene list.
    pub fn output_fingerprint(&self) -> String {
        let mut doc = self.to_document();
        doc.scenes.clear();
        fingerprint_of(&doc)
    }

    /// Sum of declared scene durations.
    pub fn total_duration_secs(&self) -> f64 {
        self.scenes.iter().map(|s| s.duration_secs).sum()
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    /// Resolve a style name against user styles, then presets.
    pub fn resolved_style(&self, name: &str) -> Option<TextStyle> {
        self.styles
            .get(name)
            .cloned()
            .or_else(|| TextStyle::preset(name))
    }

    /// Number of scenes that need the generation backend.
    pub fn generation_count(&self) -> usize {
        self.scenes
            .iter()
            .filter(|s| matches!(s.source, SceneSource::Generate(_)))
            .count()
    }
}

fn validate_output(doc: &OutputDocument) -> Result<OutputSettings, ValidationError> {
    let aspect_ratio: AspectRatio = doc
        .aspect_ratio
        .parse()
        .map_err(|e: String| ValidationError::new("output.aspect_ratio", e))?;

    let resolution = match &doc.resolution {
        Some(raw) => {
            let res: Resolution = raw
                .parse()
                .map_err(|e: String| ValidationError::new("output.resolution", e))?;
            let actual = res.width as f64 / res.height as f64;
            let expected = aspect_ratio.ratio();
            if ((actual - expected) / expected).abs() > ASPECT_TOLERANCE {
                return Err(ValidationError::new(
                    "output.resolution",
                    format!("{res} does not match aspect ratio {aspect_ratio}"),
                ));
            }
            res
        }
        None => aspect_ratio.default_resolution(DEFAULT_SHORT_SIDE),
    };

    if !doc.frame_rate.is_finite() || doc.frame_rate <= 0.0 || doc.frame_rate > MAX_FRAME_RATE {
        return Err(ValidationError::new(
            "output.frame_rate",
            format!("must be in (0, {MAX_FRAME_RATE}], got {}", doc.frame_rate),
        ));
    }

    Ok(OutputSettings {
        aspect_ratio,
        resolution,
        frame_rate: doc.frame_rate,
        fit: doc.fit,
        pad_color: doc.pad_color.clone(),
        format: doc.format,
        quality: doc.quality,
    })
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

impl From<&Scene> for SceneDocument {
    fn from(scene: &Scene) -> Self {
        let (prompt, file, generation) = match &scene.source {
            SceneSource::Generate(g) => (Some(g.prompt.clone()), None, g.params.clone()),
            SceneSource::File(f) => (None, Some(f.path.clone()), GenerationParams::default()),
        };
        Self {
            id: scene.id.clone(),
            prompt,
            file,
            generation,
            duration: scene.duration_secs,
            overlay: scene.overlay.clone(),
            transition: scene.transition,
            reconcile: scene.reconcile,
        }
    }
}

impl Scene {
    /// Stable hash of everything that affects this scene's output.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&SceneDocument::from(self))
    }

    pub fn is_generated(&self) -> bool {
        matches!(self.source, SceneSource::Generate(_))
    }
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mov => "mov",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            "mov" => Ok(Self::Mov),
            other => Err(format!("unknown format `{other}` (expected mp4, webm or mov)")),
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "final" => Ok(Self::Final),
            other => Err(format!("unknown quality `{other}` (expected draft or final)")),
        }
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn fingerprint_of<T: Serialize>(doc: &T) -> String {
    // Documents hold only strings, numbers and string-keyed maps.
    let bytes = serde_json::to_vec(doc).expect("manifest documents always serialize to JSON");
    format!("{:016x}", fnv1a_64(&bytes))
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SCENES: &str = r#"{
        "project_name": "Neon Nights",
        "output": { "aspect_ratio": "9:16", "frame_rate": 30 },
        "audio": { "path": "song.mp3" },
        "scenes": [
            { "id": "intro", "file": "clips/intro.mp4", "duration": 2.0 },
            { "id": "verse", "prompt": "city lights at night", "duration": 3.0,
              "overlay": { "text": "Verse 1", "style": "title", "position": "top" } }
        ]
    }"#;

    fn doc_with_scene(scene: serde_json::Value) -> String {
        serde_json::json!({
            "project_name": "Test",
            "scenes": [scene],
        })
        .to_string()
    }

    fn expect_field(content: &str, field: &str) {
        match Manifest::from_json_str(content) {
            Err(ManifestError::Validation(e)) => assert_eq!(e.field, field, "{e}"),
            other => panic!("expected validation error on {field}, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_two_scene_manifest() {
        let manifest = Manifest::from_json_str(TWO_SCENES).unwrap();
        assert_eq!(manifest.project_name, "Neon Nights");
        assert_eq!(manifest.scenes.len(), 2);
        assert_eq!(manifest.scenes[0].id, "intro");
        assert!(matches!(manifest.scenes[0].source, SceneSource::File(_)));
        assert!(manifest.scenes[1].is_generated());
        assert_eq!(manifest.output.resolution, Resolution { width: 1080, height: 1920 });
        assert_eq!(manifest.output.fit, FitPolicy::Crop);
        assert!((manifest.total_duration_secs() - 5.0).abs() < 1e-9);

        let audio = manifest.audio.as_ref().unwrap();
        assert!((audio.fade_out_secs - 2.0).abs() < 1e-9);
        assert!(audio.loop_audio);
    }

    #[test]
    fn test_scene_with_both_prompt_and_file_is_rejected() {
        let content = doc_with_scene(serde_json::json!({
            "id": "a", "prompt": "x", "file": "a.mp4", "duration": 1.0
        }));
        expect_field(&content, "scenes[0].source");
    }

    #[test]
    fn test_scene_with_neither_source_is_rejected() {
        let content = doc_with_scene(serde_json::json!({ "id": "a", "duration": 1.0 }));
        expect_field(&content, "scenes[0].source");
    }

    #[test]
    fn test_non_positive_duration_is_rejected() {
        let content = doc_with_scene(serde_json::json!({
            "id": "a", "file": "a.mp4", "duration": 0.0
        }));
        expect_field(&content, "scenes[0].duration");

        let content = doc_with_scene(serde_json::json!({
            "id": "a", "file": "a.mp4", "duration": -2.5
        }));
        expect_field(&content, "scenes[0].duration");
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let content = serde_json::json!({
            "project_name": "Test",
            "scenes": [
                { "id": "a", "file": "a.mp4", "duration": 1.0 },
                { "id": "a", "file": "b.mp4", "duration": 1.0 }
            ]
        })
        .to_string();
        expect_field(&content, "scenes[1].id");
    }

    #[test]
    fn test_malformed_geometry_is_rejected() {
        for (output, field) in [
            (serde_json::json!({ "aspect_ratio": "16/9" }), "output.aspect_ratio"),
            (serde_json::json!({ "aspect_ratio": "0:9" }), "output.aspect_ratio"),
            (
                serde_json::json!({ "aspect_ratio": "16:9", "resolution": "1920by1080" }),
                "output.resolution",
            ),
            (
                serde_json::json!({ "aspect_ratio": "16:9", "resolution": "1080x1920" }),
                "output.resolution",
            ),
            (
                serde_json::json!({ "aspect_ratio": "16:9", "resolution": "1921x1081" }),
                "output.resolution",
            ),
            (serde_json::json!({ "frame_rate": 0 }), "output.frame_rate"),
        ] {
            let content = serde_json::json!({
                "project_name": "Test",
                "output": output,
                "scenes": [{ "id": "a", "file": "a.mp4", "duration": 1.0 }]
            })
            .to_string();
            expect_field(&content, field);
        }
    }

    #[test]
    fn test_overlay_window_must_fit_scene() {
        let content = doc_with_scene(serde_json::json!({
            "id": "a", "file": "a.mp4", "duration": 2.0,
            "overlay": { "text": "hi", "start_secs": 1.0, "end_secs": 3.0 }
        }));
        expect_field(&content, "scenes[0].overlay.end_secs");
    }

    #[test]
    fn test_unknown_overlay_style_is_rejected() {
        let content = doc_with_scene(serde_json::json!({
            "id": "a", "file": "a.mp4", "duration": 2.0,
            "overlay": { "text": "hi", "style": "neon" }
        }));
        expect_field(&content, "scenes[0].overlay.style");
    }

    #[test]
    fn test_transition_on_last_scene_is_rejected() {
        let content = doc_with_scene(serde_json::json!({
            "id": "a", "file": "a.mp4", "duration": 2.0,
            "transition": { "duration": 0.5 }
        }));
        expect_field(&content, "scenes[0].transition");
    }

    #[test]
    fn test_user_style_shadows_preset() {
        let content = serde_json::json!({
            "project_name": "Test",
            "styles": { "title": { "font_size": 90 } },
            "scenes": [{ "id": "a", "file": "a.mp4", "duration": 1.0,
                         "overlay": { "text": "x", "style": "title" } }]
        })
        .to_string();
        let manifest = Manifest::from_json_str(&content).unwrap();
        assert_eq!(manifest.resolved_style("title").unwrap().font_size, 90);
        assert_eq!(manifest.resolved_style("caption").unwrap().font_size, 32);
    }

    #[test]
    fn test_toml_and_json_agree() {
        let toml_src = r#"
            project_name = "Neon Nights"

            [output]
            aspect_ratio = "9:16"
            frame_rate = 30.0

            [audio]
            path = "song.mp3"

            [[scenes]]
            id = "intro"
            file = "clips/intro.mp4"
            duration = 2.0

            [[scenes]]
            id = "verse"
            prompt = "city lights at night"
            duration = 3.0

            [scenes.overlay]
            text = "Verse 1"
            style = "title"
            position = "top"
        "#;
        let from_toml = Manifest::from_toml_str(toml_src).unwrap();
        let from_json = Manifest::from_json_str(TWO_SCENES).unwrap();
        assert_eq!(from_toml, from_json);
    }

    #[test]
    fn test_generation_params_pass_through() {
        let content = doc_with_scene(serde_json::json!({
            "id": "a", "prompt": "waves", "duration": 6.0,
            "generation": { "seed": 42, "camera": "dolly" }
        }));
        let manifest = Manifest::from_json_str(&content).unwrap();
        match &manifest.scenes[0].source {
            SceneSource::Generate(g) => {
                assert_eq!(g.params.seed, Some(42));
                assert_eq!(g.params.extra["camera"], serde_json::json!("dolly"));
            }
            SceneSource::File(_) => panic!("expected generation directive"),
        }
    }

    #[test]
    fn test_fingerprint_tracks_scene_changes() {
        let manifest = Manifest::from_json_str(TWO_SCENES).unwrap();
        let mut edited = manifest.scenes[1].clone();
        assert_eq!(edited.fingerprint(), manifest.scenes[1].fingerprint());
        edited.duration_secs = 4.0;
        assert_ne!(edited.fingerprint(), manifest.scenes[1].fingerprint());
    }

    #[test]
    fn test_output_fingerprint_ignores_scenes() {
        let manifest = Manifest::from_json_str(TWO_SCENES).unwrap();
        let before = manifest.output_fingerprint();

        let mut scenes_edited = manifest.clone();
        scenes_edited.scenes[0].duration_secs += 1.0;
        assert_eq!(scenes_edited.output_fingerprint(), before);

        let mut output_edited = manifest.clone();
        output_edited.output.pad_color = "white".to_string();
        assert_ne!(output_edited.output_fingerprint(), before);
    }

    #[test]
    fn test_save_and_load_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::from_json_str(TWO_SCENES).unwrap();
        for name in ["script.json", "script.toml"] {
            let path = dir.path().join(name);
            manifest.save(&path).unwrap();
            let loaded = Manifest::load(&path).unwrap();
            assert_eq!(loaded, manifest, "{name}");
        }
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.yaml");
        std::fs::write(&path, "project_name: x").unwrap();
        assert!(matches!(
            Manifest::load(&path),
            Err(ManifestError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_default_resolution_from_aspect() {
        let landscape: AspectRatio = "16:9".parse().unwrap();
        assert_eq!(
            landscape.default_resolution(1080),
            Resolution { width: 1920, height: 1080 }
        );
        let square: AspectRatio = "1:1".parse().unwrap();
        assert_eq!(
            square.default_resolution(1080),
            Resolution { width: 1080, height: 1080 }
        );
    }
}
