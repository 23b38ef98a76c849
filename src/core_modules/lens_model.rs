// THEORY:
// The `LensModel` holds the pinhole intrinsics and Brown-Conrady distortion the
// sensor reports once per session. The foreground extractor never moves points
// around; it resamples whole depth-difference images. So besides the classic
// camera matrix / coefficient vector pair, the lens can bake an `UndistortMap`:
// for every pixel of the corrected image, the (sub-pixel) source coordinate in
// the raw image. Building the map once per session keeps the per-frame cost at
// one bilinear lookup per pixel.

use crate::core_modules::depth_frame::DepthImage;
use crate::error::{PipelineError, Result};
use image::{imageops, Luma};
use imageproc::geometric_transformations::{warp_into_with, Interpolation};
use serde::{Deserialize, Serialize};

/// Calibration of the depth sensor's optics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LensModel {
    /// Focal length in x (pixels).
    pub fx: f64,
    /// Focal length in y (pixels).
    pub fy: f64,
    /// Principal point x (pixels).
    pub cx: f64,
    /// Principal point y (pixels).
    pub cy: f64,
    /// Radial coefficients.
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    /// Tangential coefficients.
    pub p1: f64,
    pub p2: f64,
}

impl LensModel {
    /// Builds a lens model from calibration values, rejecting unusable intrinsics.
    pub fn new(
        focal_length: (f64, f64),
        principal_point: (f64, f64),
        radial: [f64; 3],
        tangential: (f64, f64),
    ) -> Result<Self> {
        let lens = Self {
            fx: focal_length.0,
            fy: focal_length.1,
            cx: principal_point.0,
            cy: principal_point.1,
            k1: radial[0],
            k2: radial[1],
            k3: radial[2],
            p1: tangential.0,
            p2: tangential.1,
        };
        if !lens.is_valid() {
            return Err(PipelineError::InvalidLens(format!(
                "focal lengths ({}, {}) and principal point ({}, {}) must be finite with non-zero focal lengths",
                lens.fx, lens.fy, lens.cx, lens.cy
            )));
        }
        Ok(lens)
    }

    /// A distortion-free lens, mostly useful in tests.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self> {
        Self::new((fx, fy), (cx, cy), [0.0; 3], (0.0, 0.0))
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy, self.k1, self.k2, self.k3, self.p1, self.p2]
            .iter()
            .all(|v| v.is_finite())
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }

    /// ```text
    /// (fx  0  cx)
    /// ( 0 fy  cy)
    /// ( 0  0   1)
    /// ```
    pub fn camera_matrix(&self) -> [[f64; 3]; 3] {
        [[self.fx, 0.0, self.cx], [0.0, self.fy, self.cy], [0.0, 0.0, 1.0]]
    }

    /// Coefficients in the conventional `k1 k2 p1 p2 k3` order.
    pub fn distortion_coefficients(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Applies the distortion to normalized pinhole coordinates.
    pub fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (x * radial + x_tan, y * radial + y_tan)
    }

    /// Maps an undistorted pixel to where the lens actually imaged it.
    pub fn distort_pixel(&self, u: f64, v: f64) -> (f64, f64) {
        let xn = (u - self.cx) / self.fx;
        let yn = (v - self.cy) / self.fy;
        let (xd, yd) = self.distort_normalized(xn, yn);
        (self.fx * xd + self.cx, self.fy * yd + self.cy)
    }

    pub fn undistort_map(&self, width: u32, height: u32) -> UndistortMap {
        let mut sources = Vec::with_capacity(width as usize * height as usize);
        for v in 0..height {
            for u in 0..width {
                let (sx, sy) = self.distort_pixel(u as f64, v as f64);
                sources.push((sx as f32, sy as f32));
            }
        }
        UndistortMap { width, height, sources }
    }
}

/// Per-pixel source coordinates for undistorting a full image.
#[derive(Debug, Clone)]
pub struct UndistortMap {
    width: u32,
    height: u32,
    sources: Vec<(f32, f32)>,
}

impl UndistortMap {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The raw-image coordinate that output pixel `(x, y)` samples from.
    pub fn source_of(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.sources.get((y * self.width + x) as usize).copied()
    }

    /// Resamples `src` into `dst` with bilinear interpolation. Samples falling
    /// outside the source read as zero; samples straddling the border blend
    /// with that zero.
    pub fn remap(&self, src: &DepthImage, dst: &mut DepthImage) {
        // A one-pixel zero frame lets bilinear lookups reach the last row and
        // column, which the interpolator otherwise treats as out of bounds.
        let mut padded = DepthImage::new(self.width + 2, self.height + 2);
        imageops::replace(&mut padded, src, 1, 1);

        let sources = &self.sources;
        let width = self.width as usize;
        warp_into_with(
            &padded,
            |x, y| match sources.get(y as usize * width + x as usize) {
                Some(&(sx, sy)) => (sx + 1.0, sy + 1.0),
                None => (f32::NAN, f32::NAN),
            },
            Interpolation::Bilinear,
            Luma([0.0]),
            dst,
        );
    }
}
