//! Motion-blur step planning and per-object transform sampling
//!
//! A frame is prepared by stepping the host scene through a small list of
//! sub-frame time offsets and recording a world matrix per step. The planner
//! builds that list from the shutter settings; the sampled matrices are kept
//! per object and handed to the backend as a normalized transform sequence.

use serde::{Deserialize, Serialize};

use crate::backend::TransformSequence;
use crate::foundation::math::Mat4;
use crate::host::FrameTime;
use crate::session::settings::RenderSettings;

/// Where the shutter interval sits relative to the frame time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShutterPosition {
    /// Shutter centered on the frame
    #[default]
    FrameCenter,
    /// Shutter opens at the frame
    FrameStart,
    /// Shutter closes at the frame
    FrameEnd,
}

impl ShutterPosition {
    /// Offset of the first shutter sample relative to the frame time
    pub fn start_offset(self, shutter_length: f64) -> FrameTime {
        match self {
            Self::FrameCenter => -shutter_length / 2.0,
            Self::FrameStart => 0.0,
            Self::FrameEnd => -shutter_length,
        }
    }
}

/// What a single preparation step samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Sample world transforms of animated objects
    Transform,
    /// Sample deforming geometry of animated shapes
    Deform,
    /// Sample everything once; used when motion blur is disabled
    Both,
    /// Post-shutter pass giving non-animated objects their single sample
    Static,
}

/// One sub-frame preparation step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionStep {
    /// Time offset relative to the frame being prepared
    pub offset: FrameTime,
    /// What this step samples
    pub kind: StepKind,
}

impl MotionStep {
    /// Whether this step records world-transform samples
    pub fn samples_transforms(self) -> bool {
        matches!(self.kind, StepKind::Transform | StepKind::Both)
    }

    /// Whether this step records geometry samples
    pub fn samples_geometry(self) -> bool {
        matches!(self.kind, StepKind::Deform | StepKind::Both)
    }
}

/// Build the list of preparation steps for one frame.
///
/// With motion blur disabled this is a single step at the frame time. With it
/// enabled, transform and deform samples are spread evenly over the shutter
/// interval, merged in time order, and followed by a trailing [`StepKind::Static`]
/// step at the frame time so non-animated objects are recorded exactly once.
pub fn plan_steps(settings: &RenderSettings) -> Vec<MotionStep> {
    if !settings.motion_blur {
        return vec![MotionStep {
            offset: 0.0,
            kind: StepKind::Both,
        }];
    }

    let length = settings.shutter_length;
    let start = settings.shutter_position.start_offset(length);

    let mut steps = Vec::new();
    append_spread(&mut steps, StepKind::Transform, settings.transform_samples, start, length);
    append_spread(&mut steps, StepKind::Deform, settings.deform_samples, start, length);
    steps.sort_by(|a, b| a.offset.total_cmp(&b.offset));
    steps.push(MotionStep {
        offset: 0.0,
        kind: StepKind::Static,
    });
    steps
}

fn append_spread(
    steps: &mut Vec<MotionStep>,
    kind: StepKind,
    count: u32,
    start: FrameTime,
    length: f64,
) {
    let count = count.max(1);
    let spacing = if count > 1 {
        length / f64::from(count - 1)
    } else {
        0.0
    };
    for i in 0..count {
        steps.push(MotionStep {
            offset: start + spacing * f64::from(i),
            kind,
        });
    }
}

/// World-matrix samples collected for one object over a shutter interval.
///
/// Re-sampling a frame starts with [`TransformSamples::clear`]; collection is
/// idempotent per frame, never additive across frames. A sampling failure
/// degrades the set to a single identity matrix for the rest of the frame.
#[derive(Debug, Clone, Default)]
pub struct TransformSamples {
    matrices: Vec<Mat4>,
    degraded: bool,
}

impl TransformSamples {
    /// Empty sample set
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all samples collected so far
    pub fn clear(&mut self) {
        self.matrices.clear();
        self.degraded = false;
    }

    /// Append one world-matrix sample; ignored once the set is degraded
    pub fn push(&mut self, matrix: Mat4) {
        if !self.degraded {
            self.matrices.push(matrix);
        }
    }

    /// Replace all samples with a single matrix
    pub fn set_single(&mut self, matrix: Mat4) {
        self.clear();
        self.matrices.push(matrix);
    }

    /// Replace the set with a single identity sample and stop accepting
    /// further samples until the next [`TransformSamples::clear`]
    pub fn degrade(&mut self) {
        self.matrices.clear();
        self.matrices.push(Mat4::identity());
        self.degraded = true;
    }

    /// Whether a sampling failure degraded this set
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Number of samples collected
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    /// True if no samples have been collected
    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    /// Collected matrices in sampling order
    pub fn matrices(&self) -> &[Mat4] {
        &self.matrices
    }

    /// Most recent sample, identity if none was collected yet
    pub fn last(&self) -> Mat4 {
        self.matrices.last().copied().unwrap_or_else(Mat4::identity)
    }

    /// Normalized backend transform sequence over the collected samples
    pub fn sequence(&self) -> TransformSequence {
        TransformSequence::from_matrices(&self.matrices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    fn blur_settings() -> RenderSettings {
        RenderSettings {
            motion_blur: true,
            shutter_length: 0.4,
            transform_samples: 2,
            deform_samples: 2,
            ..RenderSettings::default()
        }
    }

    #[test]
    fn test_blur_disabled_plans_single_combined_step() {
        let steps = plan_steps(&RenderSettings::default());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, StepKind::Both);
        assert_relative_eq!(steps[0].offset, 0.0);
    }

    #[test]
    fn test_centered_shutter_spreads_samples_and_appends_static_step() {
        let steps = plan_steps(&blur_settings());
        // 2 transform + 2 deform + trailing static
        assert_eq!(steps.len(), 5);
        let offsets: Vec<f64> = steps.iter().map(|s| s.offset).collect();
        assert_relative_eq!(offsets[0], -0.2);
        assert_relative_eq!(offsets[1], -0.2);
        assert_relative_eq!(offsets[2], 0.2);
        assert_relative_eq!(offsets[3], 0.2);
        assert_relative_eq!(offsets[4], 0.0);
        // at equal offsets transform steps sort ahead of deform steps
        assert_eq!(steps[0].kind, StepKind::Transform);
        assert_eq!(steps[1].kind, StepKind::Deform);
        assert_eq!(steps[4].kind, StepKind::Static);
    }

    #[test]
    fn test_shutter_anchored_at_frame_end_finishes_at_frame_time() {
        let mut settings = blur_settings();
        settings.shutter_position = ShutterPosition::FrameEnd;
        settings.deform_samples = 1;
        let steps = plan_steps(&settings);
        assert_relative_eq!(steps[0].offset, -0.4);
        // the single deform sample sits at the shutter start
        assert_eq!(steps[1].kind, StepKind::Deform);
        assert_relative_eq!(steps[1].offset, -0.4);
        let last_shutter = steps[steps.len() - 2];
        assert_relative_eq!(last_shutter.offset, 0.0);
    }

    #[test]
    fn test_three_samples_share_the_shutter_evenly() {
        let mut settings = blur_settings();
        settings.transform_samples = 3;
        settings.deform_samples = 1;
        settings.shutter_position = ShutterPosition::FrameStart;
        let steps = plan_steps(&settings);
        let transforms: Vec<f64> = steps
            .iter()
            .filter(|s| s.kind == StepKind::Transform)
            .map(|s| s.offset)
            .collect();
        assert_eq!(transforms.len(), 3);
        assert_relative_eq!(transforms[0], 0.0);
        assert_relative_eq!(transforms[1], 0.2);
        assert_relative_eq!(transforms[2], 0.4);
    }

    #[test]
    fn test_degraded_samples_ignore_further_pushes_until_cleared() {
        let mut samples = TransformSamples::new();
        samples.push(Mat4::new_translation(&Vec3::new(1.0, 0.0, 0.0)));
        samples.degrade();
        samples.push(Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples.last(), Mat4::identity());
        samples.clear();
        assert!(!samples.is_degraded());
        assert!(samples.is_empty());
    }

    #[test]
    fn test_sequence_preserves_sampling_order() {
        let mut samples = TransformSamples::new();
        let a = Mat4::new_translation(&Vec3::new(0.0, 0.0, 0.0));
        let b = Mat4::new_translation(&Vec3::new(1.0, 0.0, 0.0));
        samples.push(a);
        samples.push(b);
        let sequence = samples.sequence();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.samples()[0].1, a);
        assert_eq!(sequence.samples()[1].1, b);
    }
}
