// THEORY:
// The overlay renderer is the visualization layer. It is a pure function of a
// list of shapes and a canvas: it knows nothing about frames, backgrounds or
// sensors. Colors encode validity only, never the shape type, so an accepted
// shape can never be mistaken for a rejected one.
//
// Valid shapes get their outline, a marker on every simplified vertex and a
// centered type label on a white plate. Rejected shapes get a single marker at
// their centroid.

use crate::config::PipelineConfig;
use crate::core_modules::background_model::BackgroundState;
use crate::core_modules::depth_frame::DepthFrame;
use crate::core_modules::glyphs::{draw_text, text_size};
use crate::core_modules::shape::Shape;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

pub const VALID_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const INVALID_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const VERTEX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const LABEL_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
pub const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const STATUS_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Marker sizes and label scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub vertex_marker_radius: i32,
    pub centroid_marker_radius: i32,
    pub label_scale: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for OverlayStyle {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            vertex_marker_radius: config.vertex_marker_radius,
            centroid_marker_radius: config.centroid_marker_radius,
            label_scale: 1,
        }
    }
}

/// Draws every shape onto `image`.
pub fn render(image: &mut RgbImage, shapes: &[Shape], style: &OverlayStyle) {
    for shape in shapes {
        if shape.is_valid() {
            draw_valid(image, shape, style);
        } else if let Ok((cx, cy)) = shape.centroid() {
            draw_filled_circle_mut(
                image,
                (cx.round() as i32, cy.round() as i32),
                style.centroid_marker_radius,
                INVALID_COLOR,
            );
        }
    }
}

fn draw_valid(image: &mut RgbImage, shape: &Shape, style: &OverlayStyle) {
    draw_closed_polyline(image, shape.contour(), VALID_COLOR);

    if let Ok(approx) = shape.approx() {
        for vertex in approx {
            draw_filled_circle_mut(image, (vertex.x, vertex.y), style.vertex_marker_radius, VERTEX_COLOR);
        }
    }

    if let Ok(kind) = shape.shape_type() {
        let label = kind.label();
        let scale = style.label_scale;
        let (tw, th) = text_size(label, scale);
        let bb = shape.bounding_box();
        let x = bb.x + (bb.width - tw as i32) / 2;
        let y = bb.y + (bb.height - th as i32) / 2;
        let plate = Rect::at(x - scale as i32, y - scale as i32).of_size(tw + 2 * scale, th + 2 * scale);
        draw_filled_rect_mut(image, plate, LABEL_BACKGROUND);
        draw_text(image, x, y, label, scale, LABEL_COLOR);
    }
}

fn draw_closed_polyline(image: &mut RgbImage, points: &[imageproc::point::Point<i32>], color: Rgb<u8>) {
    match points {
        [] => {}
        [only] => {
            if only.x >= 0 && only.y >= 0 && (only.x as u32) < image.width() && (only.y as u32) < image.height() {
                image.put_pixel(only.x as u32, only.y as u32, color);
            }
        }
        _ => {
            for (i, a) in points.iter().enumerate() {
                let b = points[(i + 1) % points.len()];
                draw_line_segment_mut(image, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
            }
        }
    }
}

/// Tells the user what the pipeline is waiting for while there is no background.
pub fn draw_status(image: &mut RgbImage, state: BackgroundState) {
    let message = match state {
        BackgroundState::Idle => "PRESS BACKGROUND",
        BackgroundState::Capturing => "DETECTING BACKGROUND...",
        BackgroundState::Ready => return,
    };
    draw_text(image, 10, 10, message, 2, STATUS_COLOR);
}

/// A frame-sized buffer of `0xAARRGGBB` pixels, alpha always 255.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl PackedImage {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| pack_argb(p[0], p[1], p[2]))
            .collect();
        Self { width: image.width(), height: image.height(), pixels }
    }

    /// Unpacks back into an RGB image, e.g. for saving to disk.
    pub fn to_rgb(&self) -> RgbImage {
        let mut image = RgbImage::new(self.width, self.height);
        for (pixel, &argb) in image.pixels_mut().zip(self.pixels.iter()) {
            *pixel = Rgb([(argb >> 16) as u8, (argb >> 8) as u8, argb as u8]);
        }
        image
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }
}

#[inline]
pub fn pack_argb(r: u8, g: u8, b: u8) -> u32 {
    (255u32 << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Gray visualisation of the IR amplitude, stretched between the frame's own
/// minimum and maximum.
pub fn render_amplitude(frame: &DepthFrame) -> PackedImage {
    let samples = frame.samples();
    let min = samples.iter().map(|s| s.gray_value).min().unwrap_or(0);
    let max = samples.iter().map(|s| s.gray_value).max().unwrap_or(0);
    let span = match max - min {
        0 => 1.0,
        s => s as f32,
    };
    let pixels = samples
        .iter()
        .map(|s| {
            let v = (((s.gray_value - min) as f32 / span) * 255.0) as u8;
            pack_argb(v, v, v)
        })
        .collect();
    PackedImage { width: frame.width(), height: frame.height(), pixels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::depth_frame::DepthSample;
    use crate::core_modules::shape::ShapeLimits;
    use imageproc::point::Point;

    fn square(x0: i32, y0: i32, side: i32) -> Vec<Point<i32>> {
        let mut pts = Vec::new();
        for x in x0..x0 + side {
            pts.push(Point::new(x, y0));
        }
        for y in y0..y0 + side {
            pts.push(Point::new(x0 + side, y));
        }
        for x in (x0 + 1..=x0 + side).rev() {
            pts.push(Point::new(x, y0 + side));
        }
        for y in (y0 + 1..=y0 + side).rev() {
            pts.push(Point::new(x0, y));
        }
        pts
    }

    #[test]
    fn valid_shape_gets_outline_vertices_and_label() {
        let shape = Shape::new(square(20, 20, 40), ShapeLimits::default());
        let mut image = RgbImage::new(100, 100);
        render(&mut image, &[shape], &OverlayStyle::default());

        assert_eq!(*image.get_pixel(40, 20), VALID_COLOR);
        assert_eq!(*image.get_pixel(20, 20), VERTEX_COLOR);
        // Label plate sits in the middle of the bounding box.
        assert!(image.pixels().any(|p| *p == LABEL_BACKGROUND));
        assert!(image.pixels().any(|p| *p == LABEL_COLOR));
        assert!(!image.pixels().any(|p| *p == INVALID_COLOR));
    }

    #[test]
    fn invalid_shape_gets_only_a_centroid_marker() {
        let mut shape = Shape::new(square(20, 20, 40), ShapeLimits::default());
        shape.invalidate();
        let mut image = RgbImage::new(100, 100);
        render(&mut image, &[shape], &OverlayStyle::default());

        assert_eq!(*image.get_pixel(40, 40), INVALID_COLOR);
        assert_eq!(*image.get_pixel(40, 20), Rgb([0, 0, 0]));
        assert!(!image.pixels().any(|p| *p == VALID_COLOR || *p == VERTEX_COLOR));
    }

    #[test]
    fn packing_is_argb_with_opaque_alpha() {
        assert_eq!(pack_argb(0x12, 0x34, 0x56), 0xFF12_3456);
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(1, 0, Rgb([1, 2, 3]));
        let packed = PackedImage::from_rgb(&image);
        assert_eq!(packed.pixels, vec![0xFF00_0000, 0xFF01_0203]);
        assert_eq!(packed.to_rgb(), image);
    }

    #[test]
    fn amplitude_is_stretched_to_full_range() {
        let samples = vec![
            DepthSample::new(1.0, 1, 100),
            DepthSample::new(1.0, 1, 150),
            DepthSample::new(1.0, 1, 200),
        ];
        let frame = DepthFrame::new(3, 1, samples).unwrap();
        let packed = render_amplitude(&frame);
        assert_eq!(packed.pixels[0], pack_argb(0, 0, 0));
        assert_eq!(packed.pixels[1], pack_argb(127, 127, 127));
        assert_eq!(packed.pixels[2], pack_argb(255, 255, 255));
    }

    #[test]
    fn flat_amplitude_does_not_divide_by_zero() {
        let frame = DepthFrame::filled(4, 4, DepthSample::new(1.0, 1, 42));
        assert!(render_amplitude(&frame).pixels.iter().all(|&p| p == pack_argb(0, 0, 0)));
    }

    #[test]
    fn status_banner_only_without_background() {
        let mut image = RgbImage::new(200, 40);
        draw_status(&mut image, BackgroundState::Ready);
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
        draw_status(&mut image, BackgroundState::Capturing);
        assert!(image.pixels().any(|p| *p == STATUS_COLOR));
    }
}
