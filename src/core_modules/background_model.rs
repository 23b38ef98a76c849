// THEORY:
// The `BackgroundModel` is the learning entity of the vision system. It holds a
// single floating-point depth map describing the scene with "nothing in it" and
// learns that map by averaging a fixed number of consecutive frames.
//
// Key architectural principles:
// 1.  **Explicit State Machine**: `Idle -> Capturing -> Ready`. The accumulator is
//     written only while capturing and at the moment a capture completes. In Idle
//     and Ready it is read-only for the foreground extractor.
// 2.  **Confidence Gating**: Samples the sensor flags as unreliable are skipped.
//     They add nothing, so a hole persists until a confident sample arrives.
// 3.  **Restartable**: A new capture request always starts from zero, whatever
//     state the model was in. Partial accumulations are never kept.
// 4.  **Generations**: Each completed capture bumps a counter, letting consumers
//     that cache data derived from the background notice it has been replaced.

use crate::core_modules::depth_frame::DepthFrame;
use crate::error::Result;
use tracing::info;

/// The capture state of the background model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum BackgroundState {
    /// No capture is running. The accumulator holds the last completed average, or zeros.
    Idle,
    /// Frames are being summed into the accumulator.
    Capturing,
    /// The accumulator holds a finished background depth map.
    Ready,
}

/// A learned, per-pixel average of the scene depth.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    /// Running sum while capturing, average once ready.
    background_z: Vec<f32>,
    frames_accumulated: u32,
    target_frames: u32,
    state: BackgroundState,
    generation: u64,
}

impl BackgroundModel {
    pub fn new(width: u32, height: u32, target_frames: u32) -> Self {
        Self {
            width,
            height,
            background_z: vec![0.0; width as usize * height as usize],
            frames_accumulated: 0,
            target_frames: target_frames.max(1),
            state: BackgroundState::Idle,
            generation: 0,
        }
    }

    /// Starts (or restarts) a capture cycle from an empty accumulator.
    pub fn start_capture(&mut self) {
        if self.state == BackgroundState::Capturing {
            info!(
                discarded_frames = self.frames_accumulated,
                "Background detection restarted."
            );
        } else {
            info!("Background detection has started.");
        }
        self.background_z.fill(0.0);
        self.frames_accumulated = 0;
        self.state = BackgroundState::Capturing;
    }

    /// Feeds one frame into the state machine. Outside of `Capturing` this is a no-op.
    /// Returns the state after the frame was applied.
    pub fn accumulate(&mut self, frame: &DepthFrame) -> Result<BackgroundState> {
        if self.state != BackgroundState::Capturing {
            return Ok(self.state);
        }
        frame.ensure_dimensions(self.width, self.height)?;

        for (acc, sample) in self.background_z.iter_mut().zip(frame.samples()) {
            if sample.is_confident() {
                *acc += sample.z;
            }
        }
        self.frames_accumulated += 1;

        if self.frames_accumulated >= self.target_frames {
            let divisor = self.target_frames as f32;
            for acc in self.background_z.iter_mut() {
                *acc /= divisor;
            }
            self.state = BackgroundState::Ready;
            self.generation += 1;
            info!(generation = self.generation, "Background detection has ended.");
        }
        Ok(self.state)
    }

    pub fn state(&self) -> BackgroundState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == BackgroundState::Ready
    }

    pub fn frames_accumulated(&self) -> u32 {
        self.frames_accumulated
    }

    pub fn target_frames(&self) -> u32 {
        self.target_frames
    }

    /// Incremented every time a capture completes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The raw accumulator. Only meaningful as a depth map when the model is `Ready`.
    pub fn background_z(&self) -> &[f32] {
        &self.background_z
    }
}
