// THEORY:
// The `Shape` is the semantic layer of the vision system. It wraps one raw
// contour from the foreground extractor and turns it into a classified object:
// triangle, rectangle, circle or "other".
//
// Key architectural principles:
// 1.  **Memoized Geometry**: Every derived quantity (perimeter, centroid,
//     bounding box, simplified polygon, type) is computed at most once and cached
//     in a `OnceCell`. No sentinel values stand in for "not yet computed".
// 2.  **Early Rejection**: The area is computed at construction. A contour that is
//     too small is marked invalid immediately and nothing else is derived from it;
//     asking an undersized shape for its perimeter, outline or type returns
//     `GeometryError::Undersized` instead of a value.
// 3.  **Convexity Gate**: Larger contours are simplified right away, and a
//     non-convex outline is marked invalid.
// 4.  **Frame-Scoped**: A `Shape` lives for one frame. Apart from the validity
//     flag, which the orchestrator clears for border rejection, it never changes.

use crate::config::PipelineConfig;
use crate::core_modules::polygon::{self, BoundingBox, Moments};
use crate::error::GeometryError;
use imageproc::geometry::{arc_length, contour_area};
use imageproc::point::Point;
use serde::Serialize;
use std::cell::OnceCell;
use std::f64::consts::PI;
use std::fmt;

/// The geometric class of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShapeType {
    Triangle,
    Rectangle,
    Circle,
    Other,
}

impl ShapeType {
    /// The short label drawn on the overlay.
    pub fn label(&self) -> &'static str {
        match self {
            ShapeType::Triangle => "TRI",
            ShapeType::Rectangle => "RECT",
            ShapeType::Circle => "CIR",
            ShapeType::Other => "OTR",
        }
    }

    /// Stable integer code used in flattened shape descriptors.
    pub fn code(&self) -> i32 {
        match self {
            ShapeType::Triangle => 3,
            ShapeType::Rectangle => 4,
            ShapeType::Circle => 0,
            ShapeType::Other => -1,
        }
    }
}

impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Thresholds a shape is judged against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeLimits {
    pub min_area: f64,
    pub approx_epsilon_ratio: f64,
    pub circle_tolerance: f64,
}

impl Default for ShapeLimits {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for ShapeLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            min_area: config.min_area,
            approx_epsilon_ratio: config.approx_epsilon_ratio,
            circle_tolerance: config.circle_tolerance,
        }
    }
}

/// One contour with its cached, lazily derived geometry.
#[derive(Debug, Clone)]
pub struct Shape {
    contour: Vec<Point<i32>>,
    limits: ShapeLimits,
    is_valid: bool,
    area: f64,
    perimeter: OnceCell<f64>,
    moments: OnceCell<Moments>,
    bounding_box: OnceCell<BoundingBox>,
    approx: OnceCell<Vec<Point<i32>>>,
    shape_type: OnceCell<ShapeType>,
}

impl Shape {
    pub fn new(contour: Vec<Point<i32>>, limits: ShapeLimits) -> Self {
        let area = contour_area(&contour);
        let mut shape = Self {
            contour,
            limits,
            is_valid: true,
            area,
            perimeter: OnceCell::new(),
            moments: OnceCell::new(),
            bounding_box: OnceCell::new(),
            approx: OnceCell::new(),
            shape_type: OnceCell::new(),
        };

        // Eliminate small blobs before deriving anything else.
        if shape.is_undersized() {
            shape.is_valid = false;
            return shape;
        }
        // Eliminate concave blobs.
        if !shape.approx().map(polygon::is_convex).unwrap_or(true) {
            shape.is_valid = false;
        }
        shape
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Marks the shape as rejected. There is no way back to valid.
    pub fn invalidate(&mut self) {
        self.is_valid = false;
    }

    pub fn contour(&self) -> &[Point<i32>] {
        &self.contour
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn is_undersized(&self) -> bool {
        self.area < self.limits.min_area
    }

    fn guard_size(&self) -> Result<(), GeometryError> {
        if self.is_undersized() {
            Err(GeometryError::Undersized { area: self.area })
        } else {
            Ok(())
        }
    }

    /// Closed arc length of the contour.
    pub fn perimeter(&self) -> Result<f64, GeometryError> {
        self.guard_size()?;
        Ok(*self
            .perimeter
            .get_or_init(|| arc_length(&self.contour, true)))
    }

    /// Area-weighted centroid from the contour moments.
    pub fn centroid(&self) -> Result<(f64, f64), GeometryError> {
        self.moments
            .get_or_init(|| Moments::of(&self.contour))
            .centroid()
            .ok_or(GeometryError::DegenerateGeometry)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        *self.bounding_box.get_or_init(|| polygon::bounding_box(&self.contour))
    }

    /// The contour simplified with a tolerance proportional to its perimeter.
    pub fn approx(&self) -> Result<&[Point<i32>], GeometryError> {
        let perimeter = self.perimeter()?;
        let epsilon = self.limits.approx_epsilon_ratio * perimeter;
        Ok(self
            .approx
            .get_or_init(|| polygon::approximate_closed(&self.contour, epsilon)))
    }

    pub fn shape_type(&self) -> Result<ShapeType, GeometryError> {
        if let Some(kind) = self.shape_type.get() {
            return Ok(*kind);
        }
        let kind = self.classify()?;
        Ok(*self.shape_type.get_or_init(|| kind))
    }

    fn classify(&self) -> Result<ShapeType, GeometryError> {
        let vertices = self.approx()?.len();
        let kind = match vertices {
            3 => ShapeType::Triangle,
            4 => ShapeType::Rectangle,
            _ => {
                let bb = self.bounding_box();
                let radius = (bb.width / 2) as f64;
                let aspect = bb.width as f64 / bb.height as f64;
                let fill = self.area / (PI * radius * radius);
                let tolerance = self.limits.circle_tolerance;
                if (1.0 - aspect).abs() <= tolerance && (1.0 - fill).abs() <= tolerance {
                    ShapeType::Circle
                } else {
                    ShapeType::Other
                }
            }
        };
        Ok(kind)
    }

    /// A frame-independent summary of this shape for raw output.
    pub fn report(&self) -> Option<ShapeReport> {
        let centroid = self.centroid().ok()?;
        Some(ShapeReport {
            contour: self.contour.iter().map(|p| (p.x, p.y)).collect(),
            shape_type: self.shape_type().ok(),
            is_valid: self.is_valid,
            centroid,
            bounding_box: self.bounding_box(),
            area: self.area,
            projected: None,
        })
    }
}

/// Raw-mode output for one shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeReport {
    pub contour: Vec<(i32, i32)>,
    /// `None` for undersized shapes, which are never classified.
    pub shape_type: Option<ShapeType>,
    pub is_valid: bool,
    pub centroid: (f64, f64),
    pub bounding_box: BoundingBox,
    pub area: f64,
    /// Projector display pixel of the centroid, when a projector mapping is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected: Option<(i32, i32)>,
}

impl ShapeReport {
    pub const DESCRIPTOR_LEN: usize = 8;

    /// `[type, cx, cy, bbox_x, bbox_y, bbox_w, bbox_h, valid]` as integers.
    /// Unclassified shapes use type code `-2`.
    pub fn descriptor(&self) -> [i32; Self::DESCRIPTOR_LEN] {
        let bb = self.bounding_box;
        [
            self.shape_type.map_or(-2, |t| t.code()),
            self.centroid.0.round() as i32,
            self.centroid.1.round() as i32,
            bb.x,
            bb.y,
            bb.width,
            bb.height,
            self.is_valid as i32,
        ]
    }
}

/// Flattens shape reports into one integer array for int-array consumers.
pub fn encode_descriptors(reports: &[ShapeReport]) -> Vec<i32> {
    reports.iter().flat_map(|r| r.descriptor()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(vertices: &[(i32, i32)]) -> Vec<Point<i32>> {
        let mut out = Vec::new();
        for i in 0..vertices.len() {
            let (x0, y0) = vertices[i];
            let (x1, y1) = vertices[(i + 1) % vertices.len()];
            let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1);
            for s in 0..steps {
                let t = s as f64 / steps as f64;
                out.push(Point::new(
                    (x0 as f64 + t * (x1 - x0) as f64).round() as i32,
                    (y0 as f64 + t * (y1 - y0) as f64).round() as i32,
                ));
            }
        }
        out
    }

    fn regular_polygon(cx: f64, cy: f64, r: f64, sides: usize) -> Vec<(i32, i32)> {
        (0..sides)
            .map(|i| {
                let a = 2.0 * PI * i as f64 / sides as f64;
                ((cx + r * a.cos()).round() as i32, (cy + r * a.sin()).round() as i32)
            })
            .collect()
    }

    #[test]
    fn square_is_a_rectangle() {
        let shape = Shape::new(trace(&[(20, 20), (60, 20), (60, 60), (20, 60)]), ShapeLimits::default());
        assert!(shape.is_valid());
        assert_eq!(shape.shape_type(), Ok(ShapeType::Rectangle));
        assert_eq!(shape.centroid(), Ok((40.0, 40.0)));
    }

    #[test]
    fn near_equilateral_triangle() {
        let shape = Shape::new(trace(&[(50, 10), (90, 80), (10, 80)]), ShapeLimits::default());
        assert!(shape.is_valid());
        assert_eq!(shape.shape_type(), Ok(ShapeType::Triangle));
    }

    #[test]
    fn sixteen_gon_is_a_circle() {
        let shape = Shape::new(trace(&regular_polygon(100.0, 100.0, 40.0, 16)), ShapeLimits::default());
        assert!(shape.is_valid());
        assert!(shape.approx().unwrap().len() >= 5);
        assert_eq!(shape.shape_type(), Ok(ShapeType::Circle));
        let (cx, cy) = shape.centroid().unwrap();
        assert!((cx - 100.0).abs() < 1.0 && (cy - 100.0).abs() < 1.0);
    }

    #[test]
    fn convex_but_elongated_hexagon_is_other() {
        let shape = Shape::new(
            trace(&[(10, 40), (40, 10), (160, 10), (190, 40), (160, 70), (40, 70)]),
            ShapeLimits::default(),
        );
        assert!(shape.is_valid());
        assert_eq!(shape.shape_type(), Ok(ShapeType::Other));
    }

    #[test]
    fn star_is_rejected_as_concave() {
        let mut star = Vec::new();
        for i in 0..10 {
            let a = PI * i as f64 / 5.0;
            let r = if i % 2 == 0 { 60.0 } else { 25.0 };
            star.push(((100.0 + r * a.cos()).round() as i32, (100.0 + r * a.sin()).round() as i32));
        }
        let shape = Shape::new(trace(&star), ShapeLimits::default());
        assert!(!shape.is_valid());
        assert_eq!(shape.shape_type(), Ok(ShapeType::Other));
    }

    #[test]
    fn small_contour_is_invalid_and_guarded() {
        let shape = Shape::new(trace(&[(0, 0), (8, 0), (8, 8), (0, 8)]), ShapeLimits::default());
        assert_eq!(shape.area(), 64.0);
        assert!(!shape.is_valid());
        assert_eq!(shape.perimeter(), Err(GeometryError::Undersized { area: 64.0 }));
        assert!(matches!(shape.approx(), Err(GeometryError::Undersized { .. })));
        assert!(matches!(shape.shape_type(), Err(GeometryError::Undersized { .. })));
        // Centroid and bounding box stay available for drawing the rejection marker.
        assert_eq!(shape.centroid(), Ok((4.0, 4.0)));
    }

    #[test]
    fn degenerate_contour_reports_degenerate_geometry() {
        let shape = Shape::new(vec![Point::new(3, 3)], ShapeLimits::default());
        assert!(!shape.is_valid());
        assert_eq!(shape.centroid(), Err(GeometryError::DegenerateGeometry));
        assert!(shape.report().is_none());
    }

    #[test]
    fn derived_values_are_cached() {
        let shape = Shape::new(trace(&[(20, 20), (60, 20), (60, 60), (20, 60)]), ShapeLimits::default());
        let first = shape.approx().unwrap().as_ptr();
        let second = shape.approx().unwrap().as_ptr();
        assert_eq!(first, second);
        assert_eq!(shape.shape_type(), shape.shape_type());
    }

    #[test]
    fn invalidate_is_sticky() {
        let mut shape = Shape::new(trace(&[(20, 20), (60, 20), (60, 60), (20, 60)]), ShapeLimits::default());
        shape.invalidate();
        assert!(!shape.is_valid());
        assert_eq!(shape.shape_type(), Ok(ShapeType::Rectangle));
    }

    #[test]
    fn descriptor_layout() {
        let shape = Shape::new(trace(&[(20, 20), (60, 20), (60, 60), (20, 60)]), ShapeLimits::default());
        let report = shape.report().unwrap();
        assert_eq!(report.descriptor(), [4, 40, 40, 20, 20, 41, 41, 1]);
        let flat = encode_descriptors(&[report.clone(), report]);
        assert_eq!(flat.len(), 2 * ShapeReport::DESCRIPTOR_LEN);
    }
}
