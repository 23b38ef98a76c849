// THEORY:
// Errors are split by the layer that raises them. `GeometryError` belongs to a
// single `Shape` and never escapes a frame: the orchestrator turns it into
// "drop this shape" or "skip this query". `PipelineError` covers everything the
// frame loop and its control surface can report. None of them stop the frame
// stream; callers log them and move on to the next frame.

use thiserror::Error;

/// Failures that concern the geometry of one contour.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// The zeroth area moment is zero, so the centroid is undefined.
    #[error("degenerate geometry: contour has zero area moment")]
    DegenerateGeometry,
    /// The shape was rejected for being too small and its derived geometry
    /// (perimeter, simplified polygon, type) was never computed.
    #[error("shape area {area} is below the minimum; derived geometry was not computed")]
    Undersized { area: f64 },
}

/// Failures raised by the frame pipeline and its control surface.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("background model is not ready")]
    NotReady,
    #[error("lens calibration is unavailable")]
    MissingCalibration,
    #[error("frame is {got_width}x{got_height} but {expected_width}x{expected_height} was expected")]
    FrameSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("a {width}x{height} frame needs {expected} samples, got {got}")]
    SampleCountMismatch {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
    #[error("unknown output mode code {0}")]
    UnknownMode(i32),
    #[error("invalid lens parameters: {0}")]
    InvalidLens(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("depth session has shut down")]
    SessionClosed,
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
