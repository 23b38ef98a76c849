// THEORY:
// The shape detector was built to drive a projector mounted next to the depth
// camera, so that detected shapes can be highlighted on the surface itself. The
// camera and projector see the scene through different fields of view and from
// slightly different positions. `ProjectorMapping` converts a camera pixel plus
// its depth into a projector display pixel using a fitted linear scale and a
// depth-dependent vertical parallax shift. The fit is specific to the rig; the
// constants live in `ProjectorConfig`.

use crate::config::ProjectorConfig;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProjectorMapping {
    config: ProjectorConfig,
    camera_width: u32,
    camera_height: u32,
}

impl ProjectorMapping {
    pub fn new(config: ProjectorConfig, camera_width: u32, camera_height: u32) -> Self {
        Self { config, camera_width, camera_height }
    }

    /// Maps a camera pixel at depth `z` (meters) to a projector pixel.
    /// Returns `None` for invalid input or when the point falls outside the projector view.
    pub fn camera_to_projector(&self, x: f64, y: f64, z: f64) -> Option<(i32, i32)> {
        if x < 0.0 || y < 0.0 || z <= 0.0 || self.camera_width == 0 || self.camera_height == 0 {
            return None;
        }
        let c = &self.config;
        let (dw, dh) = (c.display_width as f64, c.display_height as f64);

        let shift_y = c.shift_y_amplitude * (-c.shift_y_decay * z).exp();
        let px = x * dw * c.scale_x / self.camera_width as f64 - dw * (c.scale_x - 1.0) / 2.0;
        let py = y * dh * c.scale_y / self.camera_height as f64 - dh * (c.scale_y - 1.0) / 2.0 - shift_y;

        if px > dw || px < 0.0 || py > dh || py < 0.0 {
            debug!(px, py, "Point is outside of the projector view.");
            return None;
        }
        Some((px as i32, py as i32))
    }
}
