// THEORY:
// The `ForegroundExtractor` is the spatial analysis layer. It compares each live
// depth frame against the learned background and outlines whatever now sits
// closer to the sensor than the background did.
//
// Algorithm steps:
// 1.  **Live z-image**: a persistent per-pixel depth map. It is seeded from the
//     background snapshot each time a new background becomes ready, then updated
//     only by confident samples, so holes keep the last known depth.
// 2.  **Difference**: `background - live`. Positive where an object occludes the
//     background.
// 3.  **Undistortion**: the difference image is resampled through the lens remap
//     table. Without calibration this step is the identity.
// 4.  **Smoothing**: a normalized box filter suppresses sensor noise.
// 5.  **Binarization**: values at or above the threshold become foreground.
// 6.  **Contours**: only outermost borders are kept; holes and anything nested
//     inside them are discarded.
//
// The extractor owns its scratch buffers and reuses them from frame to frame.

use crate::config::PipelineConfig;
use crate::core_modules::background_model::BackgroundModel;
use crate::core_modules::depth_frame::{DepthFrame, DepthImage};
use crate::core_modules::lens_model::{LensModel, UndistortMap};
use crate::error::{PipelineError, Result};
use image::{imageops, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::filter::separable_filter_equal;
use imageproc::point::Point;
use tracing::{debug, warn};

pub type RawContour = Vec<Point<i32>>;

pub struct ForegroundExtractor {
    width: u32,
    height: u32,
    diff_threshold: f32,
    blur_size: u32,
    undistort: Option<UndistortMap>,
    /// Live depth map carried over between frames.
    z_image: DepthImage,
    /// Background generation the live depth map was seeded from.
    seeded_generation: Option<u64>,
    diff: DepthImage,
    undistorted: DepthImage,
    mask: GrayImage,
}

impl ForegroundExtractor {
    pub fn new(width: u32, height: u32, config: &PipelineConfig, lens: Option<&LensModel>) -> Self {
        let undistort = match lens {
            Some(lens) => Some(lens.undistort_map(width, height)),
            None => {
                warn!(
                    error = %PipelineError::MissingCalibration,
                    "Undistortion disabled; contours are extracted from the raw lens image."
                );
                None
            }
        };
        Self {
            width,
            height,
            diff_threshold: config.diff_threshold,
            blur_size: config.blur_size.max(1),
            undistort,
            z_image: DepthImage::new(width, height),
            seeded_generation: None,
            diff: DepthImage::new(width, height),
            undistorted: DepthImage::new(width, height),
            mask: GrayImage::new(width, height),
        }
    }

    pub fn has_undistortion(&self) -> bool {
        self.undistort.is_some()
    }

    /// The binary foreground mask produced by the most recent extraction.
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// The live depth map as of the most recent extraction.
    pub fn z_image(&self) -> &[f32] {
        self.z_image.as_raw()
    }

    /// Runs the full extraction for one frame against a ready background.
    pub fn extract(&mut self, frame: &DepthFrame, background: &BackgroundModel) -> Result<Vec<RawContour>> {
        if !background.is_ready() {
            return Err(PipelineError::NotReady);
        }
        frame.ensure_dimensions(self.width, self.height)?;

        self.update_z_image(frame, background);
        self.compute_difference(background.background_z());
        let source = match &self.undistort {
            Some(map) => {
                map.remap(&self.diff, &mut self.undistorted);
                &self.undistorted
            }
            None => &self.diff,
        };
        let smoothed = box_filter(source, self.blur_size);
        self.binarize(&smoothed);

        let contours = external_contours(&self.mask);
        debug!(contours = contours.len(), "Foreground extracted.");
        Ok(contours)
    }

    fn update_z_image(&mut self, frame: &DepthFrame, background: &BackgroundModel) {
        if self.seeded_generation != Some(background.generation()) {
            self.z_image.copy_from_slice(background.background_z());
            self.seeded_generation = Some(background.generation());
        }
        for (z, sample) in self.z_image.iter_mut().zip(frame.samples()) {
            if sample.is_confident() {
                *z = sample.z;
            }
        }
    }

    fn compute_difference(&mut self, background_z: &[f32]) {
        for ((d, bg), z) in self.diff.iter_mut().zip(background_z).zip(self.z_image.iter()) {
            *d = bg - z;
        }
    }

    fn binarize(&mut self, smoothed: &DepthImage) {
        let threshold = self.diff_threshold;
        for (pixel, value) in self.mask.pixels_mut().zip(smoothed.pixels()) {
            *pixel = Luma([if value[0] >= threshold { 255 } else { 0 }]);
        }
    }
}

/// Outer borders that are not nested inside any hole.
///
/// The border follower reports a blob touching the image edge as a hole that
/// parents every other blob, so the mask is traced inside a one-pixel zero frame.
pub fn external_contours(mask: &GrayImage) -> Vec<RawContour> {
    let (width, height) = mask.dimensions();
    let mut framed = GrayImage::new(width + 2, height + 2);
    imageops::replace(&mut framed, mask, 1, 1);

    find_contours::<i32>(&framed)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| c.points.into_iter().map(|p| Point::new(p.x - 1, p.y - 1)).collect())
        .collect()
}

/// Mirrors an out-of-range index back into `0..n` without repeating the edge pixel.
#[inline]
fn reflect_101(i: i64, n: i64) -> u32 {
    if n == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * n - 2 - i;
        }
    }
    i as u32
}

/// Normalized `size x size` box filter with reflect-101 borders.
pub fn box_filter(src: &DepthImage, size: u32) -> DepthImage {
    let (width, height) = src.dimensions();
    let radius = size / 2;
    let (r, w, h) = (radius as i64, width as i64, height as i64);

    // The filter itself replicates edge pixels; the mirrored margin keeps it
    // from ever reaching them.
    let padded = DepthImage::from_fn(width + 2 * radius, height + 2 * radius, |x, y| {
        *src.get_pixel(reflect_101(x as i64 - r, w), reflect_101(y as i64 - r, h))
    });
    let kernel = vec![1.0 / size as f32; size as usize];
    let smoothed = separable_filter_equal(&padded, &kernel);
    imageops::crop_imm(&smoothed, radius, radius, width, height).to_image()
}
