// THEORY:
// Every tunable of the vision engine lives in one plain struct, in the same way
// the pipeline is driven by a single `PipelineConfig`. The defaults reproduce the
// behavior the shape detector was tuned with on the time-of-flight sensor; a JSON
// file can override any subset of them.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the `FramePipeline`, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of frames averaged into the background depth map.
    pub background_frames: u32,
    /// Shapes with a contour area below this are rejected.
    pub min_area: f64,
    /// Fraction of the frame width/height treated as the rejection border.
    /// A centroid exactly on the margin line is kept.
    pub border_margin: f64,
    /// Depth difference (background minus live) at or above which a pixel is foreground.
    pub diff_threshold: f32,
    /// Side length of the square box filter applied to the depth difference. Must be odd.
    pub blur_size: u32,
    /// Polygon simplification tolerance as a fraction of the contour perimeter.
    pub approx_epsilon_ratio: f64,
    /// Allowed deviation from 1.0 of the aspect ratio and of the area/circle-area ratio.
    pub circle_tolerance: f64,
    /// Radius of the markers drawn on simplified polygon vertices.
    pub vertex_marker_radius: i32,
    /// Radius of the marker drawn at the centroid of a rejected shape.
    pub centroid_marker_radius: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            background_frames: 20,
            min_area: 100.0,
            border_margin: 0.1,
            diff_threshold: 0.005,
            blur_size: 5,
            approx_epsilon_ratio: 0.02,
            circle_tolerance: 0.2,
            vertex_marker_radius: 2,
            centroid_marker_radius: 2,
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON config file. Missing fields fall back to the defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.background_frames == 0 {
            return Err(PipelineError::Config("background_frames must be at least 1".into()));
        }
        if self.blur_size == 0 || self.blur_size % 2 == 0 {
            return Err(PipelineError::Config(format!(
                "blur_size must be odd and non-zero, got {}",
                self.blur_size
            )));
        }
        if !(0.0..0.5).contains(&self.border_margin) {
            return Err(PipelineError::Config(format!(
                "border_margin must lie in [0, 0.5), got {}",
                self.border_margin
            )));
        }
        if self.approx_epsilon_ratio <= 0.0 {
            return Err(PipelineError::Config("approx_epsilon_ratio must be positive".into()));
        }
        Ok(())
    }
}

/// Placement of the projector relative to the depth camera.
///
/// The scale factors are `sin(camera_fov / 2) / sin(projector_fov / 2)` for the
/// rig the detector was built on; the vertical shift decays with depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    pub display_width: u32,
    pub display_height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub shift_y_amplitude: f64,
    pub shift_y_decay: f64,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            display_width: 1280,
            display_height: 720,
            scale_x: 1.3074,
            scale_y: 1.8256,
            shift_y_amplitude: 486.69004,
            shift_y_decay: 0.048035356,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.background_frames, 20);
        assert_eq!(config.min_area, 100.0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "min_area": 250.0 }"#).unwrap();
        assert_eq!(config.min_area, 250.0);
        assert_eq!(config.blur_size, 5);
        assert_eq!(config.diff_threshold, 0.005);
    }

    #[test]
    fn even_blur_is_rejected() {
        let config = PipelineConfig { blur_size: 4, ..Default::default() };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn margin_out_of_range_is_rejected() {
        let config = PipelineConfig { border_margin: 0.5, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join("shape_vision_config_test.json");
        std::fs::write(&path, r#"{ "background_frames": 10, "border_margin": 0.05 }"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.background_frames, 10);
        assert_eq!(config.border_margin, 0.05);
        let _ = std::fs::remove_file(path);
    }
}
