//! Aspect/resolution normalization geometry.
//!
//! Every clip is scaled to the output frame before concatenation, either
//! covering the frame and cropping the overflow (`crop`) or fitting inside
//! it and padding the remainder (`pad`). Both are centered. Scaled sizes are
//! kept even so that yuv420p encoders accept them.

use mvgen_project_model::{FitPolicy, Resolution};

/// Scale-then-crop or scale-then-pad parameters for one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeGeometry {
    pub fit: FitPolicy,
    pub target: Resolution,
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Offset of the crop window inside the scaled frame.
    pub crop_x: u32,
    pub crop_y: u32,
    /// Offset of the scaled frame inside the padded canvas.
    pub pad_x: u32,
    pub pad_y: u32,
}

/// Compute normalization for a `src_width x src_height` clip.
///
/// Unknown (zero) source dimensions are stretched to the target.
pub fn normalize_geometry(
    src_width: u32,
    src_height: u32,
    target: Resolution,
    fit: FitPolicy,
) -> NormalizeGeometry {
    let (tw, th) = (target.width, target.height);
    let mut geometry = NormalizeGeometry {
        fit,
        target,
        scaled_width: tw,
        scaled_height: th,
        crop_x: 0,
        crop_y: 0,
        pad_x: 0,
        pad_y: 0,
    };
    if src_width == 0 || src_height == 0 {
        return geometry;
    }

    let sx = tw as f64 / src_width as f64;
    let sy = th as f64 / src_height as f64;

    match fit {
        FitPolicy::Crop => {
            let scale = sx.max(sy);
            let w = even_up(src_width as f64 * scale).max(tw);
            let h = even_up(src_height as f64 * scale).max(th);
            geometry.scaled_width = w;
            geometry.scaled_height = h;
            geometry.crop_x = (w - tw) / 2;
            geometry.crop_y = (h - th) / 2;
        }
        FitPolicy::Pad => {
            let scale = sx.min(sy);
            let w = even_down(src_width as f64 * scale).clamp(2, tw);
            let h = even_down(src_height as f64 * scale).clamp(2, th);
            geometry.scaled_width = w;
            geometry.scaled_height = h;
            geometry.pad_x = (tw - w) / 2;
            geometry.pad_y = (th - h) / 2;
        }
    }
    geometry
}

impl NormalizeGeometry {
    /// Whether the clip already matches the target frame.
    pub fn is_identity(&self) -> bool {
        self.scaled_width == self.target.width
            && self.scaled_height == self.target.height
            && self.crop_x == 0
            && self.crop_y == 0
            && self.pad_x == 0
            && self.pad_y == 0
    }

    /// ffmpeg filter chain producing exactly the target frame.
    pub fn filter(&self, pad_color: &str) -> String {
        let (tw, th) = (self.target.width, self.target.height);
        let scale = format!("scale={}:{}", self.scaled_width, self.scaled_height);
        match self.fit {
            FitPolicy::Crop => format!(
                "{scale},crop={tw}:{th}:{}:{},setsar=1",
                self.crop_x, self.crop_y
            ),
            FitPolicy::Pad => format!(
                "{scale},pad={tw}:{th}:{}:{}:color={pad_color},setsar=1",
                self.pad_x, self.pad_y
            ),
        }
    }
}

fn even_up(v: f64) -> u32 {
    let n = (v - 1e-6).ceil().max(2.0) as u32;
    n + n % 2
}

fn even_down(v: f64) -> u32 {
    let n = (v + 1e-6).floor().max(2.0) as u32;
    n - n % 2
}
