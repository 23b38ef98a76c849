// THEORY:
// The `DepthFrame` is the most fundamental unit of the vision system: a "dumb"
// data container for one complete readout of the time-of-flight sensor. Each
// `DepthSample` carries the measured distance, the sensor's confidence in it and
// the IR amplitude (gray value).
//
// Pixel traversal convention: sample `k` sits at `(k % width, k / width)`. The
// frame is never mirrored. The z-images, the binary mask, the contours and the
// packed output buffer all use this same orientation, so a contour point can be
// looked up directly in the output buffer at `y * width + x`.

use crate::error::{PipelineError, Result};
use image::{ImageBuffer, Luma};

/// A single-channel floating point image (depth, depth difference).
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// One sensor reading for a single pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthSample {
    /// Distance along the optical axis, in meters.
    pub z: f32,
    /// Sensor confidence. Zero or below marks the sample as unreliable.
    pub depth_confidence: i32,
    /// IR amplitude of the pixel.
    pub gray_value: u16,
}

impl DepthSample {
    pub fn new(z: f32, depth_confidence: i32, gray_value: u16) -> Self {
        Self { z, depth_confidence, gray_value }
    }

    /// Unreliable samples must never overwrite stored depth state.
    #[inline]
    pub fn is_confident(&self) -> bool {
        self.depth_confidence > 0
    }
}

/// A complete, row-major frame of depth samples.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    samples: Vec<DepthSample>,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, samples: Vec<DepthSample>) -> Result<Self> {
        let expected = (width as usize) * (height as usize);
        if samples.len() != expected {
            return Err(PipelineError::SampleCountMismatch {
                width,
                height,
                expected,
                got: samples.len(),
            });
        }
        Ok(Self { width, height, samples })
    }

    /// A frame where every pixel reports the same sample.
    pub fn filled(width: u32, height: u32, sample: DepthSample) -> Self {
        Self {
            width,
            height,
            samples: vec![sample; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> &[DepthSample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [DepthSample] {
        &mut self.samples
    }

    /// Maps a sample index to its pixel coordinate.
    #[inline]
    pub fn coords_of(&self, index: usize) -> (u32, u32) {
        let width = self.width as usize;
        ((index % width) as u32, (index / width) as u32)
    }

    #[inline]
    pub fn index_of(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn sample_at(&self, x: u32, y: u32) -> Option<&DepthSample> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.samples.get(self.index_of(x, y))
    }

    /// Checks that this frame matches the dimensions a session was opened with.
    pub fn ensure_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if self.width == width && self.height == height {
            Ok(())
        } else {
            Err(PipelineError::FrameSizeMismatch {
                expected_width: width,
                expected_height: height,
                got_width: self.width,
                got_height: self.height,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_sample_count() {
        let result = DepthFrame::new(4, 3, vec![DepthSample::default(); 11]);
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SampleCountMismatch { width: 4, height: 3, expected: 12, got: 11 }
        ));
        assert_eq!(err.to_string(), "a 4x3 frame needs 12 samples, got 11");
    }

    #[test]
    fn dimension_mismatch_names_both_sizes() {
        let frame = DepthFrame::filled(5, 4, DepthSample::default());
        let err = frame.ensure_dimensions(6, 4).unwrap_err();
        assert_eq!(err.to_string(), "frame is 5x4 but 6x4 was expected");
    }

    #[test]
    fn forward_traversal_maps_index_to_coordinates() {
        let frame = DepthFrame::filled(5, 4, DepthSample::default());
        assert_eq!(frame.coords_of(0), (0, 0));
        assert_eq!(frame.coords_of(4), (4, 0));
        assert_eq!(frame.coords_of(5), (0, 1));
        assert_eq!(frame.coords_of(19), (4, 3));
        assert_eq!(frame.index_of(3, 2), 13);
    }

    #[test]
    fn confidence_gate() {
        assert!(DepthSample::new(1.0, 1, 0).is_confident());
        assert!(!DepthSample::new(1.0, 0, 0).is_confident());
        assert!(!DepthSample::new(1.0, -3, 0).is_confident());
    }

    #[test]
    fn dimension_check() {
        let frame = DepthFrame::filled(8, 6, DepthSample::default());
        assert!(frame.ensure_dimensions(8, 6).is_ok());
        assert!(frame.ensure_dimensions(6, 8).is_err());
        assert!(frame.sample_at(8, 0).is_none());
    }
}
