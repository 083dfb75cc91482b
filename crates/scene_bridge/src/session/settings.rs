//! Render settings
//!
//! One flat settings struct drives both batch and interactive sessions. It
//! implements [`Config`] so hosts can persist it next to their other project
//! files.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::host::FrameTime;
use crate::scene::motion::ShutterPosition;

/// Settings for one render session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Whether motion blur is sampled at all
    pub motion_blur: bool,
    /// Shutter-open interval in frames
    pub shutter_length: f64,
    /// Where the shutter interval sits relative to the frame time
    pub shutter_position: ShutterPosition,
    /// Transform samples per frame when blur is on
    pub transform_samples: u32,
    /// Geometry deformation samples per frame when blur is on
    pub deform_samples: u32,
    /// Uniform scale applied to the master assembly and camera positions
    pub scene_scale: f64,
    /// First frame of the batch range
    pub frame_start: FrameTime,
    /// Last frame of the batch range, inclusive
    pub frame_end: FrameTime,
    /// Frame increment through the batch range
    pub frame_step: f64,
    /// Nodes whose leaf name contains this pattern are skipped entirely
    pub exclusion_pattern: String,
    /// Interactive sessions translate only this camera
    pub view_camera: Option<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            motion_blur: false,
            shutter_length: 0.4,
            shutter_position: ShutterPosition::default(),
            transform_samples: 2,
            deform_samples: 2,
            scene_scale: 1.0,
            frame_start: 1.0,
            frame_end: 1.0,
            frame_step: 1.0,
            exclusion_pattern: "shaderBall".to_string(),
            view_camera: None,
        }
    }
}

impl Config for RenderSettings {}

impl RenderSettings {
    /// Frames of the batch range in render order. Always yields at least the
    /// start frame, even for an inverted range.
    pub fn frame_list(&self) -> Vec<FrameTime> {
        let step = if self.frame_step.abs() < f64::EPSILON {
            1.0
        } else {
            self.frame_step.abs()
        };
        let mut frames = Vec::new();
        let mut frame = self.frame_start;
        while frame <= self.frame_end + f64::EPSILON {
            frames.push(frame);
            frame += step;
        }
        if frames.is_empty() {
            frames.push(self.frame_start);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_describe_a_single_unblurred_frame() {
        let settings = RenderSettings::default();
        assert!(!settings.motion_blur);
        assert!((settings.shutter_length - 0.4).abs() < f64::EPSILON);
        assert_eq!(settings.transform_samples, 2);
        assert_eq!(settings.frame_list(), vec![1.0]);
        assert_eq!(settings.exclusion_pattern, "shaderBall");
    }

    #[test]
    fn test_frame_list_steps_through_the_range() {
        let settings = RenderSettings {
            frame_start: 1.0,
            frame_end: 6.0,
            frame_step: 2.0,
            ..RenderSettings::default()
        };
        assert_eq!(settings.frame_list(), vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_inverted_range_still_renders_the_start_frame() {
        let settings = RenderSettings {
            frame_start: 10.0,
            frame_end: 5.0,
            ..RenderSettings::default()
        };
        assert_eq!(settings.frame_list(), vec![10.0]);
    }

    #[test]
    fn test_settings_round_trip_through_ron() {
        let settings = RenderSettings {
            motion_blur: true,
            shutter_position: ShutterPosition::FrameStart,
            view_camera: Some("persp".to_string()),
            ..RenderSettings::default()
        };
        let text = ron::to_string(&settings).unwrap();
        let parsed = RenderSettings::from_str_by_extension("render.ron", &text).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let parsed =
            RenderSettings::from_str_by_extension("render.toml", "motion_blur = true\n").unwrap();
        assert!(parsed.motion_blur);
        assert_eq!(parsed.deform_samples, 2);
    }
}
