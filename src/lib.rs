// THEORY:
// This file is the main entry point for the `shape_vision` library crate. It
// defines the public API handed to whatever owns the depth camera: build a
// `FramePipeline` for the sensor resolution, feed it frames (directly or through
// a `DepthSession`), and steer it through a `PipelineControl`.
//
// The frame-level building blocks (background averaging, foreground
// extraction, polygon geometry, rendering) live in `core_modules` and are public
// for testing and tooling, but the pipeline is the intended way in.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod session;

pub use config::{PipelineConfig, ProjectorConfig};
pub use core_modules::background_model::BackgroundState;
pub use core_modules::depth_frame::{DepthFrame, DepthSample};
pub use core_modules::lens_model::LensModel;
pub use core_modules::overlay::PackedImage;
pub use error::{GeometryError, PipelineError, Result};
pub use pipeline::{FrameListener, FramePipeline, OutputMode, PipelineControl, PipelineOutput, ShapeReport, ShapeType};
pub use session::{DepthSession, FrameResult, SessionCommand, SessionHandle};
