//! Drawing surfaces.
//!
//! Lookers draw through the [`Canvas`] trait with a 2D affine transform made of
//! a translation and a uniform scale, like an HTML canvas context. Two surfaces
//! are provided:
//! - [`RecordingCanvas`]: records commands, used by tests and headless hosts
//! - [`RasterCanvas`]: software rasterizer into an [`image::RgbaImage`]

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use image::{Rgba as Pixel, RgbaImage};

use crate::color::Rgba;
use crate::error::Result;
use crate::geometry::{BoundingBox, Coordinates};
use crate::sample::MaskBuffer;

/// Approximate glyph advance relative to the font size.
const GLYPH_ADVANCE: f32 = 0.6;

/// A 2D drawing surface.
///
/// Coordinates passed to drawing calls are in canvas space and mapped through
/// the current transform.
pub trait Canvas {
    /// Erase the whole surface.
    fn clear(&mut self);
    /// Reset the transform to identity.
    fn reset_transform(&mut self);
    /// Append a translation to the transform.
    fn translate(&mut self, offset: Coordinates);
    /// Append a uniform scale to the transform.
    fn scale(&mut self, factor: f32);
    /// Set the stroke width for subsequent strokes.
    fn set_line_width(&mut self, width: f32);
    /// Set the font size for subsequent text.
    fn set_font_size(&mut self, size: f32);
    /// Outline a rectangle.
    fn stroke_rect(&mut self, rect: BoundingBox, color: Rgba);
    /// Fill a rectangle.
    fn fill_rect(&mut self, rect: BoundingBox, color: Rgba);
    /// Fill a circle.
    fn fill_circle(&mut self, center: Coordinates, radius: f32, color: Rgba);
    /// Stroke a straight line.
    fn stroke_line(&mut self, from: Coordinates, to: Coordinates, color: Rgba);
    /// Draw text with its top-left corner at `at`.
    fn fill_text(&mut self, text: &str, at: Coordinates, color: Rgba);
    /// Paint the non-zero pixels of a mask stretched over `rect`.
    fn draw_mask(&mut self, mask: &MaskBuffer, rect: BoundingBox, color: Rgba);
}

/// A recorded drawing call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// Surface cleared
    Clear,
    /// Transform reset
    ResetTransform,
    /// Translation appended
    Translate(Coordinates),
    /// Scale appended
    Scale(f32),
    /// Line width set
    LineWidth(f32),
    /// Font size set
    FontSize(f32),
    /// Rectangle outlined
    StrokeRect(BoundingBox, Rgba),
    /// Rectangle filled
    FillRect(BoundingBox, Rgba),
    /// Circle filled
    FillCircle(Coordinates, f32, Rgba),
    /// Line stroked
    StrokeLine(Coordinates, Coordinates, Rgba),
    /// Text drawn
    FillText(String, Coordinates, Rgba),
    /// Mask painted (mask width and height recorded)
    DrawMask {
        /// Target rectangle
        rect: BoundingBox,
        /// Mask size `[width, height]`
        size: [usize; 2],
        /// Paint color
        color: Rgba,
    },
}

/// A canvas that records every call.
///
/// Clones share the same log, so a host can hand one clone to a looker and
/// inspect the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingCanvas {
    log: Rc<RefCell<Vec<DrawCommand>>>,
}

impl RecordingCanvas {
    /// Create an empty recording canvas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded commands.
    pub fn commands(&self) -> Vec<DrawCommand> {
        self.log.borrow().clone()
    }

    /// Number of full redraws (each redraw starts with a clear).
    pub fn redraw_count(&self) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Clear))
            .count()
    }

    /// Commands issued since the last clear.
    pub fn last_frame(&self) -> Vec<DrawCommand> {
        let log = self.log.borrow();
        let start = log
            .iter()
            .rposition(|c| matches!(c, DrawCommand::Clear))
            .unwrap_or(0);
        log[start..].to_vec()
    }

    /// Forget all recorded commands.
    pub fn reset(&self) {
        self.log.borrow_mut().clear();
    }

    fn push(&self, command: DrawCommand) {
        self.log.borrow_mut().push(command);
    }
}

impl Canvas for RecordingCanvas {
    fn clear(&mut self) {
        self.push(DrawCommand::Clear);
    }

    fn reset_transform(&mut self) {
        self.push(DrawCommand::ResetTransform);
    }

    fn translate(&mut self, offset: Coordinates) {
        self.push(DrawCommand::Translate(offset));
    }

    fn scale(&mut self, factor: f32) {
        self.push(DrawCommand::Scale(factor));
    }

    fn set_line_width(&mut self, width: f32) {
        self.push(DrawCommand::LineWidth(width));
    }

    fn set_font_size(&mut self, size: f32) {
        self.push(DrawCommand::FontSize(size));
    }

    fn stroke_rect(&mut self, rect: BoundingBox, color: Rgba) {
        self.push(DrawCommand::StrokeRect(rect, color));
    }

    fn fill_rect(&mut self, rect: BoundingBox, color: Rgba) {
        self.push(DrawCommand::FillRect(rect, color));
    }

    fn fill_circle(&mut self, center: Coordinates, radius: f32, color: Rgba) {
        self.push(DrawCommand::FillCircle(center, radius, color));
    }

    fn stroke_line(&mut self, from: Coordinates, to: Coordinates, color: Rgba) {
        self.push(DrawCommand::StrokeLine(from, to, color));
    }

    fn fill_text(&mut self, text: &str, at: Coordinates, color: Rgba) {
        self.push(DrawCommand::FillText(text.to_owned(), at, color));
    }

    fn draw_mask(&mut self, mask: &MaskBuffer, rect: BoundingBox, color: Rgba) {
        self.push(DrawCommand::DrawMask {
            rect,
            size: [mask.width(), mask.height()],
            color,
        });
    }
}

/// Software rasterizer drawing into an RGBA image.
///
/// Shapes are axis-aligned and unantialiased; text is drawn as one block per
/// glyph, which is enough for previews.
#[derive(Debug, Clone)]
pub struct RasterCanvas {
    image: RgbaImage,
    background: Rgba,
    offset: Coordinates,
    scale: f32,
    line_width: f32,
    font_size: f32,
}

impl RasterCanvas {
    /// Create a surface of the given pixel size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            background: [0, 0, 0, 0],
            offset: [0.0, 0.0],
            scale: 1.0,
            line_width: 1.0,
            font_size: 16.0,
        }
    }

    /// Set the color used by [`Canvas::clear`].
    pub fn with_background(mut self, background: Rgba) -> Self {
        self.background = background;
        self
    }

    /// Borrow the rendered image.
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Take the rendered image.
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Encode the surface to an image file (format from the extension).
    pub fn save(&self, path: &Path) -> Result<()> {
        self.image.save(path)?;
        Ok(())
    }

    fn to_screen(&self, point: Coordinates) -> Coordinates {
        [
            self.offset[0] + self.scale * point[0],
            self.offset[1] + self.scale * point[1],
        ]
    }

    fn rect_to_screen(&self, rect: BoundingBox) -> BoundingBox {
        let [x, y] = self.to_screen([rect[0], rect[1]]);
        [x, y, rect[2] * self.scale, rect[3] * self.scale]
    }

    /// Pixel index range covered by a screen-space span, clipped to `limit`.
    fn span(start: f32, len: f32, limit: u32) -> std::ops::Range<u32> {
        let lo = start.max(0.0).floor() as u32;
        let hi = (start + len).min(limit as f32).ceil().max(0.0) as u32;
        lo.min(limit)..hi.min(limit)
    }

    fn blend(&mut self, x: u32, y: u32, color: Rgba) {
        let Some(pixel) = self.image.get_pixel_mut_checked(x, y) else {
            return;
        };
        let alpha = f32::from(color[3]) / 255.0;
        let dst_alpha = f32::from(pixel[3]) / 255.0;
        let out_alpha = alpha + dst_alpha * (1.0 - alpha);
        if out_alpha <= 0.0 {
            return;
        }
        for c in 0..3 {
            let src = f32::from(color[c]) * alpha;
            let dst = f32::from(pixel[c]) * dst_alpha * (1.0 - alpha);
            pixel[c] = ((src + dst) / out_alpha).round().clamp(0.0, 255.0) as u8;
        }
        pixel[3] = (out_alpha * 255.0).round() as u8;
    }

    fn fill_screen_rect(&mut self, rect: BoundingBox, color: Rgba) {
        let (width, height) = self.image.dimensions();
        for y in Self::span(rect[1], rect[3], height) {
            for x in Self::span(rect[0], rect[2], width) {
                self.blend(x, y, color);
            }
        }
    }
}

impl Canvas for RasterCanvas {
    fn clear(&mut self) {
        let background = Pixel(self.background);
        for pixel in self.image.pixels_mut() {
            *pixel = background;
        }
    }

    fn reset_transform(&mut self) {
        self.offset = [0.0, 0.0];
        self.scale = 1.0;
    }

    fn translate(&mut self, offset: Coordinates) {
        self.offset = self.to_screen(offset);
    }

    fn scale(&mut self, factor: f32) {
        self.scale *= factor;
    }

    fn set_line_width(&mut self, width: f32) {
        self.line_width = width;
    }

    fn set_font_size(&mut self, size: f32) {
        self.font_size = size;
    }

    fn stroke_rect(&mut self, rect: BoundingBox, color: Rgba) {
        let [x, y, w, h] = self.rect_to_screen(rect);
        let t = (self.line_width * self.scale).max(1.0);
        let half = t / 2.0;
        self.fill_screen_rect([x - half, y - half, w + t, t], color);
        self.fill_screen_rect([x - half, y + h - half, w + t, t], color);
        self.fill_screen_rect([x - half, y + half, t, h - t], color);
        self.fill_screen_rect([x + w - half, y + half, t, h - t], color);
    }

    fn fill_rect(&mut self, rect: BoundingBox, color: Rgba) {
        let screen = self.rect_to_screen(rect);
        self.fill_screen_rect(screen, color);
    }

    fn fill_circle(&mut self, center: Coordinates, radius: f32, color: Rgba) {
        let [cx, cy] = self.to_screen(center);
        let r = radius * self.scale;
        let (width, height) = self.image.dimensions();
        for y in Self::span(cy - r, 2.0 * r, height) {
            for x in Self::span(cx - r, 2.0 * r, width) {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r * r {
                    self.blend(x, y, color);
                }
            }
        }
    }

    fn stroke_line(&mut self, from: Coordinates, to: Coordinates, color: Rgba) {
        let [x0, y0] = self.to_screen(from);
        let [x1, y1] = self.to_screen(to);
        let t = (self.line_width * self.scale).max(1.0);
        let steps = (x1 - x0).abs().max((y1 - y0).abs()).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let f = i as f32 / steps as f32;
            let x = x0 + (x1 - x0) * f;
            let y = y0 + (y1 - y0) * f;
            self.fill_screen_rect([x - t / 2.0, y - t / 2.0, t, t], color);
        }
    }

    fn fill_text(&mut self, text: &str, at: Coordinates, color: Rgba) {
        let [x, y] = self.to_screen(at);
        let size = self.font_size * self.scale;
        let advance = size * GLYPH_ADVANCE;
        for (i, ch) in text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let gx = x + i as f32 * advance + advance * 0.15;
            self.fill_screen_rect([gx, y + size * 0.2, advance * 0.7, size * 0.7], color);
        }
    }

    fn draw_mask(&mut self, mask: &MaskBuffer, rect: BoundingBox, color: Rgba) {
        let [x, y, w, h] = self.rect_to_screen(rect);
        if w <= 0.0 || h <= 0.0 {
            return;
        }
        let (width, height) = self.image.dimensions();
        for py in Self::span(y, h, height) {
            for px in Self::span(x, w, width) {
                let relative = [(px as f32 + 0.5 - x) / w, (py as f32 + 0.5 - y) / h];
                if mask.sample(relative) != 0 {
                    self.blend(px, py, color);
                }
            }
        }
    }
}

/// A canvas shared with the host, which keeps a handle to read the result.
impl<C: Canvas> Canvas for Rc<RefCell<C>> {
    fn clear(&mut self) {
        self.borrow_mut().clear();
    }

    fn reset_transform(&mut self) {
        self.borrow_mut().reset_transform();
    }

    fn translate(&mut self, offset: Coordinates) {
        self.borrow_mut().translate(offset);
    }

    fn scale(&mut self, factor: f32) {
        self.borrow_mut().scale(factor);
    }

    fn set_line_width(&mut self, width: f32) {
        self.borrow_mut().set_line_width(width);
    }

    fn set_font_size(&mut self, size: f32) {
        self.borrow_mut().set_font_size(size);
    }

    fn stroke_rect(&mut self, rect: BoundingBox, color: Rgba) {
        self.borrow_mut().stroke_rect(rect, color);
    }

    fn fill_rect(&mut self, rect: BoundingBox, color: Rgba) {
        self.borrow_mut().fill_rect(rect, color);
    }

    fn fill_circle(&mut self, center: Coordinates, radius: f32, color: Rgba) {
        self.borrow_mut().fill_circle(center, radius, color);
    }

    fn stroke_line(&mut self, from: Coordinates, to: Coordinates, color: Rgba) {
        self.borrow_mut().stroke_line(from, to, color);
    }

    fn fill_text(&mut self, text: &str, at: Coordinates, color: Rgba) {
        self.borrow_mut().fill_text(text, at, color);
    }

    fn draw_mask(&mut self, mask: &MaskBuffer, rect: BoundingBox, color: Rgba) {
        self.borrow_mut().draw_mask(mask, rect, color);
    }
}

/// Approximate rendered width of `text` at `font_size`.
pub fn text_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * GLYPH_ADVANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba = [255, 0, 0, 255];

    #[test]
    fn test_recording_canvas_shares_log() {
        let canvas = RecordingCanvas::new();
        let mut handle: Box<dyn Canvas> = Box::new(canvas.clone());
        handle.clear();
        handle.fill_rect([0.0, 0.0, 1.0, 1.0], RED);
        handle.clear();

        assert_eq!(canvas.redraw_count(), 2);
        assert_eq!(canvas.last_frame(), vec![DrawCommand::Clear]);
        canvas.reset();
        assert!(canvas.commands().is_empty());
    }

    #[test]
    fn test_raster_fill_rect_respects_transform() {
        let mut canvas = RasterCanvas::new(20, 20);
        canvas.clear();
        canvas.translate([10.0, 0.0]);
        canvas.scale(2.0);
        canvas.fill_rect([0.0, 0.0, 2.0, 2.0], RED);

        let image = canvas.image();
        assert_eq!(image.get_pixel(11, 1).0, RED);
        assert_eq!(image.get_pixel(14, 1).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(9, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_raster_draw_mask_paints_nonzero_only() {
        let mut canvas = RasterCanvas::new(4, 4).with_background([0, 0, 0, 255]);
        canvas.clear();
        let mask = MaskBuffer::from_raw([2, 2], vec![1, 0, 0, 1]).unwrap();
        canvas.draw_mask(&mask, [0.0, 0.0, 4.0, 4.0], RED);

        let image = canvas.image();
        assert_eq!(image.get_pixel(0, 0).0, RED);
        assert_eq!(image.get_pixel(3, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(3, 3).0, RED);
    }

    #[test]
    fn test_shared_raster_canvas() {
        let shared = Rc::new(RefCell::new(RasterCanvas::new(2, 2)));
        let mut handle: Box<dyn Canvas> = Box::new(Rc::clone(&shared));
        handle.fill_rect([0.0, 0.0, 1.0, 1.0], RED);
        assert_eq!(shared.borrow().image().get_pixel(0, 0).0, RED);
    }

    #[test]
    fn test_raster_blend_half_alpha() {
        let mut canvas = RasterCanvas::new(1, 1).with_background([0, 0, 255, 255]);
        canvas.clear();
        canvas.fill_rect([0.0, 0.0, 1.0, 1.0], [255, 0, 0, 128]);
        let pixel = canvas.image().get_pixel(0, 0).0;
        assert!(pixel[0] > 120 && pixel[0] < 135);
        assert!(pixel[2] > 120 && pixel[2] < 135);
        assert_eq!(pixel[3], 255);
    }
}
