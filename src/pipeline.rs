// THEORY:
// The `pipeline` module is the top-level API of the vision engine. It wraps the
// full stack (background model, foreground extractor, shape classification,
// border rejection and rendering) behind one object that consumes a depth frame
// and returns what the host asked for: a rendered overlay, the raw shape list or
// the amplitude image.
//
// Shared state: the background model and the output mode are also touched from
// outside the frame loop (a UI thread pressing "background" or switching mode).
// Both live in a single `SharedState` behind a mutex, reachable only through
// `PipelineControl`. A frame holds the lock while it updates or reads the
// background, so a capture request can never land in the middle of an update.

use crate::config::{PipelineConfig, ProjectorConfig};
use crate::core_modules::background_model::{BackgroundModel, BackgroundState};
use crate::core_modules::depth_frame::DepthFrame;
use crate::core_modules::foreground_extractor::{ForegroundExtractor, RawContour};
use crate::core_modules::lens_model::LensModel;
use crate::core_modules::overlay::{self, OverlayStyle, PackedImage};
use crate::core_modules::projector::ProjectorMapping;
use crate::core_modules::shape::{Shape, ShapeLimits};
use crate::error::{PipelineError, Result};
use image::RgbImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::shape::{ShapeReport, ShapeType, encode_descriptors};

/// What the pipeline hands back for each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutputMode {
    /// Rendered shape overlay.
    Overlay,
    /// Structured shape list only, no rendering.
    RawShapes,
    /// Gray visualisation of the IR amplitude.
    Amplitude,
}

impl OutputMode {
    /// Decodes the integer mode code used by the host.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(OutputMode::Overlay),
            2 => Ok(OutputMode::RawShapes),
            3 => Ok(OutputMode::Amplitude),
            other => Err(PipelineError::UnknownMode(other)),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            OutputMode::Overlay => 1,
            OutputMode::RawShapes => 2,
            OutputMode::Amplitude => 3,
        }
    }
}

impl TryFrom<i32> for OutputMode {
    type Error = PipelineError;

    fn try_from(code: i32) -> Result<Self> {
        Self::from_code(code)
    }
}

/// The primary output of the pipeline for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    Overlay(PackedImage),
    RawShapes(Vec<ShapeReport>),
    Amplitude(PackedImage),
}

/// The capability a depth source drives: one call per delivered frame.
/// A frame that cannot be processed yields an empty output, never an error.
pub trait FrameListener {
    fn on_frame(&mut self, frame: DepthFrame) -> PipelineOutput;
}

struct SharedState {
    background: BackgroundModel,
    mode: OutputMode,
}

/// Cloneable handle for commands arriving from outside the frame loop.
#[derive(Clone)]
pub struct PipelineControl {
    state: Arc<Mutex<SharedState>>,
}

impl PipelineControl {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        // A panic while holding the lock leaves nothing half-written that a new
        // capture cycle would not reset.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new background capture cycle, discarding any capture in progress.
    pub fn capture_background(&self) {
        self.lock().background.start_capture();
    }

    pub fn set_mode(&self, mode: OutputMode) {
        let mut state = self.lock();
        if state.mode != mode {
            info!(?mode, "Output mode changed.");
            state.mode = mode;
        }
    }

    /// Applies a host mode code. Unknown codes leave the current mode in place.
    pub fn set_mode_code(&self, code: i32) -> Result<()> {
        self.set_mode(OutputMode::from_code(code)?);
        Ok(())
    }

    pub fn mode(&self) -> OutputMode {
        self.lock().mode
    }

    pub fn background_state(&self) -> BackgroundState {
        self.lock().background.state()
    }

    pub fn frames_accumulated(&self) -> u32 {
        self.lock().background.frames_accumulated()
    }
}

/// The main, top-level struct for the vision engine. One per sensor session.
pub struct FramePipeline {
    width: u32,
    height: u32,
    config: PipelineConfig,
    limits: ShapeLimits,
    style: OverlayStyle,
    control: PipelineControl,
    extractor: ForegroundExtractor,
    projector: Option<ProjectorMapping>,
    frames_processed: u64,
}

impl FramePipeline {
    /// Builds the pipeline for a session. Without a lens model undistortion is skipped.
    pub fn new(width: u32, height: u32, config: PipelineConfig, lens: Option<LensModel>) -> Result<Self> {
        config.validate()?;
        let background = BackgroundModel::new(width, height, config.background_frames);
        let extractor = ForegroundExtractor::new(width, height, &config, lens.as_ref());
        info!(width, height, calibrated = lens.is_some(), "Frame pipeline initialized.");
        Ok(Self {
            width,
            height,
            limits: ShapeLimits::from(&config),
            style: OverlayStyle::from(&config),
            config,
            control: PipelineControl {
                state: Arc::new(Mutex::new(SharedState {
                    background,
                    mode: OutputMode::Overlay,
                })),
            },
            extractor,
            projector: None,
            frames_processed: 0,
        })
    }

    /// Adds projector coordinates to raw shape reports.
    pub fn with_projector(mut self, config: ProjectorConfig) -> Self {
        self.projector = Some(ProjectorMapping::new(config, self.width, self.height));
        self
    }

    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Processes one frame and renders it according to the current output mode.
    pub fn process_frame(&mut self, frame: &DepthFrame) -> Result<PipelineOutput> {
        frame.ensure_dimensions(self.width, self.height)?;
        self.frames_processed += 1;

        let (mode, state, contours) = {
            let mut shared = self.control.lock();
            let mode = shared.mode;
            let contours = if shared.background.is_ready() {
                if mode == OutputMode::Amplitude {
                    None
                } else {
                    Some(self.extractor.extract(frame, &shared.background)?)
                }
            } else {
                shared.background.accumulate(frame)?;
                None
            };
            (mode, shared.background.state(), contours)
        };

        let shapes = contours.map(|c| self.build_shapes(c)).unwrap_or_default();
        debug!(
            frame = self.frames_processed,
            shapes = shapes.len(),
            valid = shapes.iter().filter(|s| s.is_valid()).count(),
            "Frame processed."
        );

        Ok(match mode {
            OutputMode::Overlay => PipelineOutput::Overlay(self.render_overlay(&shapes, state)),
            OutputMode::RawShapes => PipelineOutput::RawShapes(self.reports(&shapes)),
            OutputMode::Amplitude => PipelineOutput::Amplitude(overlay::render_amplitude(frame)),
        })
    }

    /// Runs background update, extraction and classification without rendering.
    /// Returns an empty list while no background is ready.
    pub fn detect_shapes(&mut self, frame: &DepthFrame) -> Result<Vec<Shape>> {
        frame.ensure_dimensions(self.width, self.height)?;
        self.frames_processed += 1;
        let contours = {
            let mut shared = self.control.lock();
            if shared.background.is_ready() {
                self.extractor.extract(frame, &shared.background)?
            } else {
                shared.background.accumulate(frame)?;
                return Ok(Vec::new());
            }
        };
        Ok(self.build_shapes(contours))
    }

    /// One `Shape` per contour. Degenerate contours are dropped; shapes whose
    /// centroid falls inside the border margin are rejected.
    fn build_shapes(&self, contours: Vec<RawContour>) -> Vec<Shape> {
        let mut shapes = Vec::with_capacity(contours.len());
        for contour in contours {
            let mut shape = Shape::new(contour, self.limits);
            let centroid = match shape.centroid() {
                Ok(centroid) => centroid,
                Err(err) => {
                    debug!(%err, "Dropping contour.");
                    continue;
                }
            };
            if shape.is_valid() && self.in_border_margin(centroid) {
                shape.invalidate();
            }
            shapes.push(shape);
        }
        shapes
    }

    /// True when the point lies strictly inside the margin band along any edge.
    /// A point exactly on the margin line is outside the band.
    pub fn in_border_margin(&self, (cx, cy): (f64, f64)) -> bool {
        let (w, h) = (self.width as f64, self.height as f64);
        let mx = self.config.border_margin * w;
        let my = self.config.border_margin * h;
        cx < mx || cx > w - mx || cy < my || cy > h - my
    }

    fn render_overlay(&self, shapes: &[Shape], state: BackgroundState) -> PackedImage {
        let mut image = RgbImage::new(self.width, self.height);
        overlay::draw_status(&mut image, state);
        overlay::render(&mut image, shapes, &self.style);
        PackedImage::from_rgb(&image)
    }

    /// A blank result in the current output mode.
    fn empty_output(&self) -> PipelineOutput {
        let blank = || PackedImage::from_rgb(&RgbImage::new(self.width, self.height));
        match self.control.mode() {
            OutputMode::Overlay => PipelineOutput::Overlay(blank()),
            OutputMode::RawShapes => PipelineOutput::RawShapes(Vec::new()),
            OutputMode::Amplitude => PipelineOutput::Amplitude(blank()),
        }
    }

    fn reports(&self, shapes: &[Shape]) -> Vec<ShapeReport> {
        shapes
            .iter()
            .filter_map(|shape| {
                let mut report = shape.report()?;
                if let Some(projector) = &self.projector {
                    report.projected = self.depth_at(report.centroid).and_then(|z| {
                        projector.camera_to_projector(report.centroid.0, report.centroid.1, z as f64)
                    });
                }
                Some(report)
            })
            .collect()
    }

    fn depth_at(&self, (x, y): (f64, f64)) -> Option<f32> {
        let (x, y) = (x.round(), y.round());
        if x < 0.0 || y < 0.0 || x >= self.width as f64 || y >= self.height as f64 {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.extractor.z_image().get(index).copied()
    }
}

impl FrameListener for FramePipeline {
    fn on_frame(&mut self, frame: DepthFrame) -> PipelineOutput {
        match self.process_frame(&frame) {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, "Frame dropped.");
                self.empty_output()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::depth_frame::DepthSample;
    use crate::core_modules::overlay::{INVALID_COLOR, VALID_COLOR};

    const W: u32 = 64;
    const H: u32 = 48;

    fn flat(z: f32) -> DepthFrame {
        DepthFrame::filled(W, H, DepthSample::new(z, 1, 100))
    }

    fn with_block(x0: u32, y0: u32, size: u32, z: f32) -> DepthFrame {
        let mut frame = flat(1.0);
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let i = frame.index_of(x, y);
                frame.samples_mut()[i] = DepthSample::new(z, 1, 100);
            }
        }
        frame
    }

    fn ready_pipeline() -> FramePipeline {
        let mut pipeline = FramePipeline::new(W, H, PipelineConfig::default(), None).unwrap();
        pipeline.control().capture_background();
        for _ in 0..20 {
            pipeline.process_frame(&flat(1.0)).unwrap();
        }
        assert_eq!(pipeline.control().background_state(), BackgroundState::Ready);
        pipeline
    }

    #[test]
    fn mode_codes() {
        assert_eq!(OutputMode::from_code(1).unwrap(), OutputMode::Overlay);
        assert_eq!(OutputMode::try_from(2).unwrap(), OutputMode::RawShapes);
        assert_eq!(OutputMode::from_code(3).unwrap().code(), 3);
        assert!(matches!(OutputMode::from_code(7), Err(PipelineError::UnknownMode(7))));
    }

    #[test]
    fn unknown_mode_code_keeps_the_current_mode() {
        let pipeline = FramePipeline::new(W, H, PipelineConfig::default(), None).unwrap();
        let control = pipeline.control();
        control.set_mode(OutputMode::RawShapes);
        assert!(control.set_mode_code(42).is_err());
        assert_eq!(control.mode(), OutputMode::RawShapes);
    }

    #[test]
    fn no_shapes_before_the_background_is_ready() {
        let mut pipeline = FramePipeline::new(W, H, PipelineConfig::default(), None).unwrap();
        pipeline.control().set_mode(OutputMode::RawShapes);
        let out = pipeline.process_frame(&with_block(27, 19, 10, 0.5)).unwrap();
        assert_eq!(out, PipelineOutput::RawShapes(Vec::new()));
    }

    #[test]
    fn centered_block_is_one_valid_shape_at_the_center() {
        let mut pipeline = ready_pipeline();
        let shapes = pipeline.detect_shapes(&with_block(27, 19, 10, 0.5)).unwrap();

        assert_eq!(shapes.len(), 1);
        let shape = &shapes[0];
        assert!(shape.is_valid());
        let kind = shape.shape_type().unwrap();
        assert!(kind == ShapeType::Rectangle || kind == ShapeType::Other);
        let (cx, cy) = shape.centroid().unwrap();
        assert!((cx - 31.5).abs() < 1e-9, "cx = {cx}");
        assert!((cy - 23.5).abs() < 1e-9, "cy = {cy}");
    }

    #[test]
    fn raw_mode_reports_the_block() {
        let mut pipeline = ready_pipeline();
        pipeline.control().set_mode(OutputMode::RawShapes);
        let PipelineOutput::RawShapes(reports) = pipeline.process_frame(&with_block(27, 19, 10, 0.5)).unwrap() else {
            panic!("expected raw shapes");
        };
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_valid);
        assert_eq!(reports[0].shape_type, Some(ShapeType::Rectangle));
        assert_eq!(reports[0].projected, None);
    }

    #[test]
    fn block_near_the_edge_is_rejected_by_the_border_margin() {
        let mut pipeline = ready_pipeline();
        let shapes = pipeline.detect_shapes(&with_block(0, 19, 10, 0.5)).unwrap();
        assert_eq!(shapes.len(), 1);
        assert!(!shapes[0].is_valid());
    }

    #[test]
    fn strip_on_the_edge_does_not_hide_other_shapes() {
        let mut pipeline = ready_pipeline();
        let mut frame = with_block(27, 19, 10, 0.5);
        for y in 10..38 {
            for x in 0..6 {
                let i = frame.index_of(x, y);
                frame.samples_mut()[i] = DepthSample::new(0.5, 1, 100);
            }
        }
        let mut shapes = pipeline.detect_shapes(&frame).unwrap();
        assert_eq!(shapes.len(), 2);
        shapes.sort_by_key(|s| s.bounding_box().x);
        assert_eq!(shapes[0].bounding_box().x, 0);
        assert!(!shapes[0].is_valid());
        assert!(shapes[1].is_valid());
        let (cx, cy) = shapes[1].centroid().unwrap();
        assert!((cx - 31.5).abs() < 1e-9 && (cy - 23.5).abs() < 1e-9);
    }

    #[test]
    fn margin_boundary_is_inclusive_of_the_line() {
        let pipeline = FramePipeline::new(100, 50, PipelineConfig::default(), None).unwrap();
        // Margins are 10.0 horizontally and 5.0 vertically.
        assert!(!pipeline.in_border_margin((10.0, 25.0)));
        assert!(pipeline.in_border_margin((9.999, 25.0)));
        assert!(!pipeline.in_border_margin((10.001, 25.0)));
        assert!(!pipeline.in_border_margin((90.0, 25.0)));
        assert!(pipeline.in_border_margin((90.001, 25.0)));
        assert!(!pipeline.in_border_margin((50.0, 5.0)));
        assert!(pipeline.in_border_margin((50.0, 4.999)));
        assert!(pipeline.in_border_margin((50.0, 45.5)));
    }

    #[test]
    fn overlay_marks_valid_and_rejected_shapes_differently() {
        let mut pipeline = ready_pipeline();
        let mut frame = with_block(27, 19, 10, 0.5);
        // A second block hugging the left edge.
        for y in 19..29 {
            for x in 0..4 {
                let i = frame.index_of(x, y);
                frame.samples_mut()[i] = DepthSample::new(0.5, 1, 100);
            }
        }
        let PipelineOutput::Overlay(image) = pipeline.process_frame(&frame).unwrap() else {
            panic!("expected overlay");
        };
        assert_eq!(image.pixels.len(), (W * H) as usize);
        assert!(image.pixels.iter().all(|p| p >> 24 == 0xFF));
        let rgb = image.to_rgb();
        assert!(rgb.pixels().any(|p| *p == VALID_COLOR));
        assert!(rgb.pixels().any(|p| *p == INVALID_COLOR));
    }

    #[test]
    fn amplitude_mode_skips_detection() {
        let mut pipeline = ready_pipeline();
        pipeline.control().set_mode(OutputMode::Amplitude);
        let out = pipeline.process_frame(&with_block(27, 19, 10, 0.5)).unwrap();
        assert!(matches!(out, PipelineOutput::Amplitude(ref img) if img.width == W && img.height == H));
    }

    #[test]
    fn recapture_absorbs_the_object_into_the_background() {
        let mut pipeline = ready_pipeline();
        let scene = with_block(27, 19, 10, 0.5);
        assert_eq!(pipeline.detect_shapes(&scene).unwrap().len(), 1);

        pipeline.control().capture_background();
        for _ in 0..20 {
            pipeline.process_frame(&scene).unwrap();
        }
        assert!(pipeline.detect_shapes(&scene).unwrap().is_empty());
    }

    #[test]
    fn projector_coordinates_are_attached_when_configured() {
        let mut pipeline = ready_pipeline().with_projector(ProjectorConfig {
            display_width: 640,
            display_height: 480,
            scale_x: 1.0,
            scale_y: 1.0,
            shift_y_amplitude: 0.0,
            shift_y_decay: 0.0,
        });
        pipeline.control().set_mode(OutputMode::RawShapes);
        let PipelineOutput::RawShapes(reports) = pipeline.process_frame(&with_block(27, 19, 10, 0.5)).unwrap() else {
            panic!("expected raw shapes");
        };
        // Centroid (31.5, 23.5) on a 64x48 camera scaled to 640x480.
        assert_eq!(reports[0].projected, Some((315, 235)));
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        let mut pipeline = ready_pipeline();
        let frame = DepthFrame::filled(W + 1, H, DepthSample::new(1.0, 1, 0));
        assert!(matches!(
            pipeline.process_frame(&frame),
            Err(PipelineError::FrameSizeMismatch { .. })
        ));

        pipeline.control().set_mode(OutputMode::RawShapes);
        assert_eq!(pipeline.on_frame(frame), PipelineOutput::RawShapes(Vec::new()));
        // The background survives the bad frame.
        assert_eq!(pipeline.control().background_state(), BackgroundState::Ready);
    }

    #[test]
    fn all_zero_confidence_frame_yields_no_shapes() {
        let mut pipeline = ready_pipeline();
        let frame = DepthFrame::filled(W, H, DepthSample::new(0.0, 0, 0));
        assert!(pipeline.detect_shapes(&frame).unwrap().is_empty());
    }
}
