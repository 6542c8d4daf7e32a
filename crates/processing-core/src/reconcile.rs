//! Duration reconciliation.
//!
//! Forces each resolved clip to its scene's declared duration. All durations
//! are quantized to the output frame grid so that trims start on a frame and
//! loop seams land exactly on frame boundaries.
//!
//! Policy, in priority order:
//! 1. within half a frame of the target: pass through unchanged
//! 2. scene asks for retiming: stretch or compress playback speed
//! 3. longer than the target: trim, keeping the part selected by the anchor
//! 4. shorter than the target: loop from the start, then cut at the target

use mvgen_common::MvgenError;
use mvgen_project_model::{
    ClipStatus, MediaInfo, ReconcileOptions, ReconcilePlan, ReconciledClip, ResolvedClip,
    SpeedPolicy, TrimAnchor,
};

/// Slack used when flooring frame counts that are integral up to float noise.
const FRAME_EPSILON: f64 = 1e-6;

/// Plans trims, loops and retimes on a fixed frame grid.
#[derive(Debug, Clone, Copy)]
pub struct DurationReconciler {
    frame_rate: f64,
}

/// Reconciliation failures. All of them fail only the affected scene.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error("scene `{scene_id}`: clip is not ready ({status:?})")]
    NotReady { scene_id: String, status: ClipStatus },

    #[error("scene `{scene_id}`: clip has zero or unreadable duration ({duration_secs})")]
    ZeroDuration { scene_id: String, duration_secs: f64 },

    #[error("scene `{scene_id}`: clip of {duration_secs:.4}s is shorter than one frame")]
    ShorterThanFrame { scene_id: String, duration_secs: f64 },

    #[error("scene `{scene_id}`: invalid target duration {target_secs}")]
    InvalidTarget { scene_id: String, target_secs: f64 },
}

impl ReconcileError {
    pub fn scene_id(&self) -> &str {
        match self {
            Self::NotReady { scene_id, .. }
            | Self::ZeroDuration { scene_id, .. }
            | Self::ShorterThanFrame { scene_id, .. }
            | Self::InvalidTarget { scene_id, .. } => scene_id,
        }
    }
}

impl From<ReconcileError> for MvgenError {
    fn from(err: ReconcileError) -> Self {
        MvgenError::reconciliation(err.scene_id().to_string(), err.to_string())
    }
}

impl DurationReconciler {
    /// Create a reconciler for the given output frame rate. Non-positive
    /// rates fall back to 30 fps.
    pub fn new(frame_rate: f64) -> Self {
        let frame_rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            30.0
        };
        Self { frame_rate }
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_secs(&self) -> f64 {
        1.0 / self.frame_rate
    }

    /// Round a duration to the nearest whole frame (at least one frame).
    pub fn quantize(&self, secs: f64) -> f64 {
        let frames = (secs * self.frame_rate).round().max(1.0);
        frames / self.frame_rate
    }

    /// Reconcile a resolved clip to `target_secs`.
    pub fn reconcile(
        &self,
        clip: &ResolvedClip,
        target_secs: f64,
        options: ReconcileOptions,
    ) -> Result<ReconciledClip, ReconcileError> {
        let media = match (&clip.media, clip.status) {
            (Some(media), ClipStatus::Ready) => media,
            _ => {
                return Err(ReconcileError::NotReady {
                    scene_id: clip.scene_id.clone(),
                    status: clip.status,
                })
            }
        };
        let plan = self.plan(&clip.scene_id, media, target_secs, options)?;
        Ok(ReconciledClip {
            scene_id: clip.scene_id.clone(),
            path: clip.path.clone(),
            media: media.clone(),
            target_secs,
            plan,
        })
    }

    /// Plan how `media` becomes `target_secs` long.
    pub fn plan(
        &self,
        scene_id: &str,
        media: &MediaInfo,
        target_secs: f64,
        options: ReconcileOptions,
    ) -> Result<ReconcilePlan, ReconcileError> {
        let native = media.duration_secs;
        if !native.is_finite() || native <= 0.0 {
            return Err(ReconcileError::ZeroDuration {
                scene_id: scene_id.to_string(),
                duration_secs: native,
            });
        }
        if !target_secs.is_finite() || target_secs <= 0.0 {
            return Err(ReconcileError::InvalidTarget {
                scene_id: scene_id.to_string(),
                target_secs,
            });
        }

        let fps = self.frame_rate;
        let target = self.quantize(target_secs);
        let native_frames = (native * fps + FRAME_EPSILON).floor();
        if native_frames < 1.0 {
            return Err(ReconcileError::ShorterThanFrame {
                scene_id: scene_id.to_string(),
                duration_secs: native,
            });
        }

        if (native - target).abs() <= 0.5 / fps {
            return Ok(ReconcilePlan::Passthrough {
                duration_secs: target,
            });
        }

        if options.policy == SpeedPolicy::Retime {
            return Ok(ReconcilePlan::Retime {
                factor: target / native,
                duration_secs: target,
            });
        }

        if native > target {
            let excess = native - target;
            let raw_start = match options.anchor {
                TrimAnchor::Start => 0.0,
                TrimAnchor::Center => excess / 2.0,
                TrimAnchor::End => excess,
            };
            let start = (raw_start * fps + FRAME_EPSILON).floor() / fps;
            return Ok(ReconcilePlan::Trim {
                start_secs: start,
                duration_secs: target,
            });
        }

        let source = native_frames / fps;
        let iterations = (target / source - FRAME_EPSILON).ceil().max(1.0) as u32;
        Ok(ReconcilePlan::Loop {
            iterations,
            source_secs: source,
            duration_secs: target,
        })
    }
}

/// Output times at which a looped clip restarts from its first frame.
pub fn loop_points(plan: &ReconcilePlan) -> Vec<f64> {
    match plan {
        ReconcilePlan::Loop {
            iterations,
            source_secs,
            duration_secs,
        } => (1..*iterations)
            .map(|k| k as f64 * source_secs)
            .filter(|t| *t < *duration_secs)
            .collect(),
        _ => vec![],
    }
}

/// Largest distance, in seconds, between a loop seam and the frame grid.
pub fn seam_error_secs(plan: &ReconcilePlan, frame_rate: f64) -> f64 {
    loop_points(plan)
        .into_iter()
        .map(|t| {
            let frames = t * frame_rate;
            (frames - frames.round()).abs() / frame_rate
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvgen_project_model::ClipOrigin;
    use proptest::prelude::*;

    fn clip(duration_secs: f64) -> ResolvedClip {
        ResolvedClip::ready(
            "scene",
            "/tmp/scene.mp4",
            ClipOrigin::File,
            MediaInfo {
                duration_secs,
                width: 1080,
                height: 1920,
                fps: 30.0,
                has_audio: false,
                codec: "h264".to_string(),
            },
        )
    }

    fn anchored(anchor: TrimAnchor) -> ReconcileOptions {
        ReconcileOptions {
            anchor,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_duration_passes_through() {
        let r = DurationReconciler::new(30.0);
        let out = r.reconcile(&clip(5.0), 5.0, Default::default()).unwrap();
        assert_eq!(out.plan, ReconcilePlan::Passthrough { duration_secs: 5.0 });
        assert_eq!(out.path, clip(5.0).path);
    }

    #[test]
    fn test_within_half_frame_passes_through() {
        let r = DurationReconciler::new(30.0);
        let out = r.reconcile(&clip(5.01), 5.0, Default::default()).unwrap();
        assert!(matches!(out.plan, ReconcilePlan::Passthrough { .. }));
    }

    #[test]
    fn test_three_second_clip_loops_to_ten() {
        let r = DurationReconciler::new(30.0);
        let out = r.reconcile(&clip(3.0), 10.0, Default::default()).unwrap();
        match &out.plan {
            ReconcilePlan::Loop {
                iterations,
                source_secs,
                duration_secs,
            } => {
                assert_eq!(*iterations, 4);
                assert!((source_secs - 3.0).abs() < 1e-9);
                assert!((duration_secs - 10.0).abs() < 1e-9);
            }
            other => panic!("expected loop, got {other:?}"),
        }
        let seams = loop_points(&out.plan);
        assert_eq!(seams.len(), 3);
        assert!(seam_error_secs(&out.plan, 30.0) <= 1.0 / 30.0);
    }

    #[test]
    fn test_long_clip_trims_by_anchor() {
        let r = DurationReconciler::new(30.0);
        let start = |anchor| match r.plan("s", clip(8.0).media.as_ref().unwrap(), 5.0, anchored(anchor)) {
            Ok(ReconcilePlan::Trim { start_secs, .. }) => start_secs,
            other => panic!("expected trim, got {other:?}"),
        };
        assert_eq!(start(TrimAnchor::Start), 0.0);
        assert!((start(TrimAnchor::Center) - 1.5).abs() < 1e-9);
        assert!((start(TrimAnchor::End) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_retime_policy_overrides_loop() {
        let r = DurationReconciler::new(30.0);
        let options = ReconcileOptions {
            policy: SpeedPolicy::Retime,
            ..Default::default()
        };
        let out = r.reconcile(&clip(4.0), 8.0, options).unwrap();
        match out.plan {
            ReconcilePlan::Retime {
                factor,
                duration_secs,
            } => {
                assert!((factor - 2.0).abs() < 1e-9);
                assert!((duration_secs - 8.0).abs() < 1e-9);
            }
            other => panic!("expected retime, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_duration_fails() {
        let r = DurationReconciler::new(30.0);
        let err = r.reconcile(&clip(0.0), 5.0, Default::default()).unwrap_err();
        assert!(matches!(err, ReconcileError::ZeroDuration { .. }));
        let mvgen: MvgenError = err.into();
        assert_eq!(mvgen.scene_id(), Some("scene"));
    }

    #[test]
    fn test_failed_clip_is_rejected() {
        let r = DurationReconciler::new(30.0);
        let err = r
            .reconcile(&clip(5.0).fail("probe failed"), 5.0, Default::default())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::NotReady { .. }));
    }

    #[test]
    fn test_sub_frame_clip_fails() {
        let r = DurationReconciler::new(30.0);
        let err = r.reconcile(&clip(0.01), 5.0, Default::default()).unwrap_err();
        assert!(matches!(err, ReconcileError::ShorterThanFrame { .. }));
    }

    proptest! {
        #[test]
        fn prop_output_matches_target_within_half_frame(
            native in 0.1f64..30.0,
            target in 0.1f64..30.0,
            fps in prop::sample::select(vec![24.0, 25.0, 30.0, 60.0]),
        ) {
            let r = DurationReconciler::new(fps);
            let out = r.reconcile(&clip(native), target, Default::default()).unwrap();
            prop_assert!((out.duration_secs() - target).abs() <= 0.5 / fps + 1e-9);
        }

        #[test]
        fn prop_reconcile_is_idempotent(
            native in 0.1f64..30.0,
            target in 0.1f64..30.0,
        ) {
            let r = DurationReconciler::new(30.0);
            let first = r.reconcile(&clip(native), target, Default::default()).unwrap();
            let again = r
                .reconcile(&clip(first.duration_secs()), first.duration_secs(), Default::default())
                .unwrap();
            prop_assert_eq!(
                again.plan,
                ReconcilePlan::Passthrough { duration_secs: first.duration_secs() }
            );
        }

        #[test]
        fn prop_loop_seams_stay_on_frame_grid(
            native in 0.1f64..5.0,
            extra in 0.5f64..20.0,
        ) {
            let r = DurationReconciler::new(30.0);
            let out = r.reconcile(&clip(native), native + extra, Default::default()).unwrap();
            if let ReconcilePlan::Loop { iterations, source_secs, duration_secs } = out.plan {
                prop_assert!(iterations as f64 * source_secs >= duration_secs - 1e-9);
                prop_assert!(seam_error_secs(&out.plan, 30.0) <= 1.0 / 30.0);
            }
        }

        #[test]
        fn prop_trim_window_stays_inside_source(
            native in 1.0f64..30.0,
            cut in 0.1f64..0.9,
            anchor in prop::sample::select(vec![TrimAnchor::Start, TrimAnchor::Center, TrimAnchor::End]),
        ) {
            let r = DurationReconciler::new(30.0);
            let out = r.reconcile(&clip(native), native * cut, anchored(anchor)).unwrap();
            if let ReconcilePlan::Trim { start_secs, duration_secs } = out.plan {
                prop_assert!(start_secs >= 0.0);
                prop_assert!(start_secs + duration_secs <= native + 0.5 / 30.0 + 1e-9);
            }
        }
    }
}
