//! Text styling for overlays and subtitles.

use serde::{Deserialize, Serialize};

/// Names of the built-in style presets.
pub const PRESET_NAMES: [&str; 5] = ["default", "title", "subtitle", "caption", "minimal"];

/// Distance in pixels between a positioned overlay and the frame edge.
pub const DEFAULT_MARGIN_PX: u32 = 50;

/// Visual style for burned-in text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    /// Font family name or path to a font file.
    pub font: String,

    /// Font size in output pixels.
    pub font_size: u32,

    /// Text color (ffmpeg color syntax, e.g. `white` or `#ffcc00`).
    pub color: String,

    /// Outline color; no outline when `None` or `stroke_width == 0`.
    pub stroke_color: Option<String>,

    /// Outline width in pixels.
    pub stroke_width: u32,

    /// Box color behind the text (e.g. `black@0.7`).
    pub background_color: Option<String>,

    /// Padding around the text inside the background box.
    pub padding: u32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font: "Arial".to_string(),
            font_size: 48,
            color: "white".to_string(),
            stroke_color: Some("black".to_string()),
            stroke_width: 2,
            background_color: None,
            padding: 10,
        }
    }
}

impl TextStyle {
    /// Look up a built-in preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        let base = Self::default();
        match name {
            "default" => Some(base),
            "title" => Some(Self {
                font_size: 72,
                stroke_width: 3,
                ..base
            }),
            "subtitle" => Some(Self {
                font_size: 36,
                stroke_width: 1,
                ..base
            }),
            "caption" => Some(Self {
                font_size: 32,
                stroke_color: None,
                stroke_width: 0,
                background_color: Some("black@0.7".to_string()),
                ..base
            }),
            "minimal" => Some(Self {
                font_size: 42,
                stroke_color: None,
                stroke_width: 0,
                ..base
            }),
            _ => None,
        }
    }

    pub fn has_stroke(&self) -> bool {
        self.stroke_width > 0 && self.stroke_color.is_some()
    }
}

/// Where an overlay sits on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPosition {
    Center,
    Top,
    #[default]
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl OverlayPosition {
    /// ffmpeg `drawtext` x/y expressions for this position.
    pub fn drawtext_xy(self, margin: u32) -> (String, String) {
        let m = margin;
        let center_x = "(w-text_w)/2".to_string();
        let center_y = "(h-text_h)/2".to_string();
        let left = format!("{m}");
        let right = format!("w-text_w-{m}");
        let top = format!("{m}");
        let bottom = format!("h-text_h-{m}");
        match self {
            Self::Center => (center_x, center_y),
            Self::Top => (center_x, top),
            Self::Bottom => (center_x, bottom),
            Self::TopLeft => (left, top),
            Self::TopRight => (right, top),
            Self::BottomLeft => (left, bottom),
            Self::BottomRight => (right, bottom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_preset_names_resolve() {
        for name in PRESET_NAMES {
            assert!(TextStyle::preset(name).is_some(), "missing preset {name}");
        }
        assert!(TextStyle::preset("neon").is_none());
    }

    #[test]
    fn test_caption_preset_has_box_and_no_stroke() {
        let caption = TextStyle::preset("caption").unwrap();
        assert_eq!(caption.font_size, 32);
        assert!(!caption.has_stroke());
        assert_eq!(caption.background_color.as_deref(), Some("black@0.7"));
    }

    #[test]
    fn test_positions_use_margin() {
        let (x, y) = OverlayPosition::BottomRight.drawtext_xy(50);
        assert_eq!(x, "w-text_w-50");
        assert_eq!(y, "h-text_h-50");
        let (x, _) = OverlayPosition::Bottom.drawtext_xy(50);
        assert_eq!(x, "(w-text_w)/2");
    }
}
