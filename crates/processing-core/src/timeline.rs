//! Timeline layout: where each reconciled clip lands in the output.
//!
//! Scenes are laid end to end in manifest order. A transition out of scene
//! `i` is duration-neutral: scene `i` is rendered with a tail handle of the
//! transition's length, and the blend occupies the first `d` seconds of
//! scene `i + 1`. The total therefore equals the sum of reconciled durations.

use mvgen_common::MvgenError;
use mvgen_project_model::{ReconcilePlan, ReconciledClip, Scene, Transition};

use crate::reconcile::{DurationReconciler, ReconcileError};

/// One scene placed on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub scene_id: String,

    /// Position among the scenes actually laid out.
    pub index: usize,

    /// Output time at which the scene starts.
    pub start_secs: f64,

    /// Reconciled scene duration.
    pub duration_secs: f64,

    /// Plan used to render the clip, including any tail handle.
    pub render_plan: ReconcilePlan,

    /// Transition into the next laid-out scene.
    pub transition_out: Option<Transition>,

    /// Absolute overlay window, clamped to the scene slot.
    pub overlay_window: Option<(f64, f64)>,
}

impl TimelineEntry {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }

    /// Length of the rendered clip, tail handle included.
    pub fn rendered_secs(&self) -> f64 {
        self.render_plan.duration_secs()
    }
}

/// Ordered layout of the whole video.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineLayout {
    pub entries: Vec<TimelineEntry>,
    pub total_secs: f64,
    pub frame_rate: f64,
}

/// Layout failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("no clips to lay out")]
    Empty,

    #[error("no scene definition for clip `{scene_id}`")]
    UnknownScene { scene_id: String },

    #[error(
        "scene `{scene_id}`: transition needs {overlap_secs:.3}s but the clip is only {available_secs:.3}s"
    )]
    TransitionOverlap {
        scene_id: String,
        overlap_secs: f64,
        available_secs: f64,
    },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl From<LayoutError> for MvgenError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::TransitionOverlap {
                scene_id,
                overlap_secs,
                available_secs,
            } => MvgenError::TransitionOverlap {
                scene_id,
                overlap_secs,
                available_secs,
            },
            LayoutError::Reconcile(e) => e.into(),
            other => MvgenError::state(other.to_string()),
        }
    }
}

impl TimelineLayout {
    /// Lay out `clips` (in timeline order) against their scene definitions.
    ///
    /// `scenes` may contain more scenes than `clips`; a partial run lays out
    /// only the clips present, and a transition applies to the next clip
    /// that is actually present.
    pub fn build(
        scenes: &[Scene],
        clips: &[ReconciledClip],
        frame_rate: f64,
    ) -> Result<Self, LayoutError> {
        if clips.is_empty() {
            return Err(LayoutError::Empty);
        }
        let reconciler = DurationReconciler::new(frame_rate);

        let lookup = |id: &str| {
            scenes
                .iter()
                .find(|s| s.id == id)
                .ok_or_else(|| LayoutError::UnknownScene {
                    scene_id: id.to_string(),
                })
        };

        let mut entries = Vec::with_capacity(clips.len());
        let mut cursor = 0.0;
        for (index, clip) in clips.iter().enumerate() {
            let scene = lookup(&clip.scene_id)?;
            let duration = clip.duration_secs();
            let is_last = index + 1 == clips.len();
            let transition_out = if is_last { None } else { scene.transition };

            let render_plan = match transition_out {
                Some(t) => {
                    let next = &clips[index + 1];
                    for (id, available) in [
                        (&clip.scene_id, duration),
                        (&next.scene_id, next.duration_secs()),
                    ] {
                        if available + 1e-9 < t.duration_secs {
                            return Err(LayoutError::TransitionOverlap {
                                scene_id: id.clone(),
                                overlap_secs: t.duration_secs,
                                available_secs: available,
                            });
                        }
                    }
                    reconciler.plan(
                        &clip.scene_id,
                        &clip.media,
                        duration + t.duration_secs,
                        scene.reconcile,
                    )?
                }
                None => clip.plan.clone(),
            };

            let overlay_window = scene.overlay.as_ref().map(|o| {
                let start = o.start_secs.unwrap_or(0.0).clamp(0.0, duration);
                let end = o.end_secs.unwrap_or(duration).clamp(start, duration);
                (cursor + start, cursor + end)
            });

            entries.push(TimelineEntry {
                scene_id: clip.scene_id.clone(),
                index,
                start_secs: cursor,
                duration_secs: duration,
                render_plan,
                transition_out,
                overlay_window,
            });
            cursor += duration;
        }

        tracing::debug!(
            clips = entries.len(),
            total_secs = cursor,
            transitions = entries.iter().filter(|e| e.transition_out.is_some()).count(),
            "Timeline laid out"
        );
        Ok(Self {
            entries,
            total_secs: cursor,
            frame_rate,
        })
    }

    /// Entry covering output time `t`, if any.
    pub fn entry_at(&self, t: f64) -> Option<&TimelineEntry> {
        self.entries
            .iter()
            .find(|e| t >= e.start_secs && t < e.end_secs())
    }

    pub fn scene_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.scene_id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvgen_project_model::{ClipOrigin, Manifest, MediaInfo, ResolvedClip};
    use proptest::prelude::*;

    fn manifest(scenes: serde_json::Value) -> Manifest {
        Manifest::from_json_str(
            &serde_json::json!({ "project_name": "Test", "scenes": scenes }).to_string(),
        )
        .unwrap()
    }

    fn reconciled(manifest: &Manifest, native: &[f64]) -> Vec<ReconciledClip> {
        let r = DurationReconciler::new(manifest.output.frame_rate);
        manifest
            .scenes
            .iter()
            .zip(native)
            .map(|(scene, native)| {
                let clip = ResolvedClip::ready(
                    &scene.id,
                    format!("/tmp/{}.mp4", scene.id),
                    ClipOrigin::File,
                    MediaInfo {
                        duration_secs: *native,
                        width: 1080,
                        height: 1920,
                        fps: 30.0,
                        has_audio: false,
                        codec: "h264".to_string(),
                    },
                );
                r.reconcile(&clip, scene.duration_secs, scene.reconcile)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_two_file_scenes_total_five_seconds_in_order() {
        let m = manifest(serde_json::json!([
            { "id": "a", "file": "a.mp4", "duration": 2.0 },
            { "id": "b", "file": "b.mp4", "duration": 3.0 }
        ]));
        let clips = reconciled(&m, &[2.0, 3.0]);
        let layout = TimelineLayout::build(&m.scenes, &clips, 30.0).unwrap();

        assert_eq!(layout.scene_ids(), vec!["a", "b"]);
        assert!((layout.total_secs - 5.0).abs() < 1e-9);
        assert!((layout.entries[1].start_secs - 2.0).abs() < 1e-9);
        assert_eq!(layout.entry_at(2.5).unwrap().scene_id, "b");
    }

    #[test]
    fn test_crossfade_is_duration_neutral() {
        let m = manifest(serde_json::json!([
            { "id": "a", "file": "a.mp4", "duration": 2.0,
              "transition": { "kind": "crossfade", "duration": 0.5 } },
            { "id": "b", "file": "b.mp4", "duration": 3.0 }
        ]));
        let clips = reconciled(&m, &[4.0, 3.0]);
        let layout = TimelineLayout::build(&m.scenes, &clips, 30.0).unwrap();

        assert!((layout.total_secs - 5.0).abs() < 1e-9);
        assert!((layout.entries[0].rendered_secs() - 2.5).abs() < 1e-9);
        assert!((layout.entries[1].rendered_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_transition_longer_than_clip_fails() {
        let m = manifest(serde_json::json!([
            { "id": "a", "file": "a.mp4", "duration": 2.0,
              "transition": { "duration": 1.5 } },
            { "id": "b", "file": "b.mp4", "duration": 1.0 }
        ]));
        let clips = reconciled(&m, &[2.0, 1.0]);
        let err = TimelineLayout::build(&m.scenes, &clips, 30.0).unwrap_err();
        match err {
            LayoutError::TransitionOverlap { scene_id, .. } => assert_eq!(scene_id, "b"),
            other => panic!("expected overlap error, got {other:?}"),
        }
        let mvgen: MvgenError = TimelineLayout::build(&m.scenes, &clips, 30.0)
            .unwrap_err()
            .into();
        assert!(mvgen.is_compositor_fatal());
    }

    #[test]
    fn test_overlay_window_is_relative_to_scene_slot() {
        let m = manifest(serde_json::json!([
            { "id": "a", "file": "a.mp4", "duration": 2.0 },
            { "id": "b", "file": "b.mp4", "duration": 3.0,
              "overlay": { "text": "hi", "start_secs": 0.5, "end_secs": 2.0 } }
        ]));
        let clips = reconciled(&m, &[2.0, 7.0]);
        let layout = TimelineLayout::build(&m.scenes, &clips, 30.0).unwrap();
        let (start, end) = layout.entries[1].overlay_window.unwrap();
        assert!((start - 2.5).abs() < 1e-9);
        assert!((end - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_layout_skips_missing_scenes() {
        let m = manifest(serde_json::json!([
            { "id": "a", "file": "a.mp4", "duration": 2.0 },
            { "id": "b", "file": "b.mp4", "duration": 3.0 },
            { "id": "c", "file": "c.mp4", "duration": 1.0 }
        ]));
        let mut clips = reconciled(&m, &[2.0, 3.0, 1.0]);
        clips.remove(1);
        let layout = TimelineLayout::build(&m.scenes, &clips, 30.0).unwrap();
        assert_eq!(layout.scene_ids(), vec!["a", "c"]);
        assert!((layout.total_secs - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_layout_fails() {
        let m = manifest(serde_json::json!([{ "id": "a", "file": "a.mp4", "duration": 2.0 }]));
        assert_eq!(
            TimelineLayout::build(&m.scenes, &[], 30.0),
            Err(LayoutError::Empty)
        );
    }

    proptest! {
        #[test]
        fn prop_total_is_sum_of_scene_durations(
            durations in prop::collection::vec(0.5f64..8.0, 1..8),
            natives in prop::collection::vec(0.2f64..12.0, 8),
            fade in 0.0f64..0.5,
        ) {
            let scenes: Vec<_> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    let mut scene = serde_json::json!({ "id": format!("s{i}"), "file": "x.mp4", "duration": d });
                    if fade > 0.05 && i + 1 < durations.len() {
                        scene["transition"] = serde_json::json!({ "duration": fade });
                    }
                    scene
                })
                .collect();
            let m = manifest(serde_json::Value::Array(scenes));
            let clips = reconciled(&m, &natives[..durations.len()]);
            let layout = TimelineLayout::build(&m.scenes, &clips, 30.0).unwrap();

            let declared: f64 = durations.iter().sum();
            let frame = 1.0 / 30.0;
            prop_assert!((layout.total_secs - declared).abs() <= durations.len() as f64 * frame / 2.0 + 1e-9);
            let reconciled_sum: f64 = clips.iter().map(|c| c.duration_secs()).sum();
            prop_assert!((layout.total_secs - reconciled_sum).abs() <= frame);
        }
    }
}
