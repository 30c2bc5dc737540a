//! Detection overlays: a box with an optional instance mask and a label tag.

use crate::canvas::{Canvas, text_width};
use crate::color::{MASK_ALPHA, color_for_field, with_alpha};
use crate::geometry::{BoundingBox, Coordinates, distance_to_outline};
use crate::sample::DetectionLabel;
use crate::state::StateView;

use super::{Containment, Overlay, canvas_cursor, label_text, to_canvas_rect};

const TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];

/// A single object detection.
#[derive(Debug, Clone)]
pub struct DetectionOverlay {
    field: String,
    label: DetectionLabel,
}

impl DetectionOverlay {
    /// Create an overlay for one detection of `field`.
    pub fn new(field: &str, label: DetectionLabel) -> Self {
        Self {
            field: field.to_owned(),
            label,
        }
    }

    /// The detection's box in canvas space.
    fn rect(&self, canvas_bbox: &BoundingBox) -> BoundingBox {
        to_canvas_rect(canvas_bbox, &self.label.bounding_box)
    }
}

impl Overlay for DetectionOverlay {
    fn field(&self) -> &str {
        &self.field
    }

    fn contains_point(&self, state: StateView<'_>) -> Containment {
        let Some((canvas_bbox, cursor)) = canvas_cursor(state) else {
            return Containment::None;
        };
        let [x, y, w, h] = self.rect(&canvas_bbox);

        if distance_to_outline(&[x, y, w, h], cursor) <= 2.0 * state.base.stroke_width {
            Containment::Border
        } else if cursor[0] >= x && cursor[0] <= x + w && cursor[1] >= y && cursor[1] <= y + h {
            Containment::Content
        } else {
            Containment::None
        }
    }

    fn mouse_distance(&self, state: StateView<'_>) -> f32 {
        match canvas_cursor(state) {
            Some((canvas_bbox, cursor)) => distance_to_outline(&self.rect(&canvas_bbox), cursor),
            None => f32::INFINITY,
        }
    }

    fn draw(&self, canvas: &mut dyn Canvas, state: StateView<'_>) {
        let Some(canvas_bbox) = state.base.canvas_bbox else {
            return;
        };
        let color = color_for_field(&self.field);
        let rect = self.rect(&canvas_bbox);

        if let Some(mask) = &self.label.mask {
            canvas.draw_mask(mask, rect, with_alpha(color, MASK_ALPHA));
        }
        canvas.stroke_rect(rect, color);

        if let Some(text) = label_text(self.label.label.as_deref(), self.label.confidence, state.options) {
            let pad = state.base.text_pad;
            let height = state.base.font_size + 2.0 * pad;
            let width = text_width(&text, state.base.font_size) + 2.0 * pad;
            let top = rect[1] - height;
            canvas.fill_rect([rect[0], top, width, height], color);
            canvas.fill_text(&text, [rect[0] + pad, top + pad], TEXT_COLOR);
        }
    }

    fn points(&self) -> Vec<Coordinates> {
        let [x, y, w, h] = self.label.bounding_box;
        vec![[x, y], [x + w, y], [x + w, y + h], [x, y + h]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawCommand, RecordingCanvas};
    use crate::overlay::tests::measured;
    use crate::sample::MaskBuffer;

    fn overlay(mask: Option<MaskBuffer>) -> DetectionOverlay {
        DetectionOverlay::new(
            "gt",
            DetectionLabel {
                label: Some("cat".into()),
                confidence: None,
                bounding_box: [0.2, 0.2, 0.4, 0.4],
                mask,
            },
        )
    }

    #[test]
    fn test_containment_levels() {
        let det = overlay(None);
        assert_eq!(det.contains_point(measured([40.0, 40.0], false).view()), Containment::Content);
        assert_eq!(det.contains_point(measured([21.0, 40.0], false).view()), Containment::Border);
        assert_eq!(det.contains_point(measured([90.0, 90.0], false).view()), Containment::None);
    }

    #[test]
    fn test_mouse_distance_in_canvas_units() {
        let det = overlay(None);
        let distance = det.mouse_distance(measured([40.0, 30.0], false).view());
        assert!((distance - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_draw_mask_before_box() {
        let mask = MaskBuffer::from_raw([2, 2], vec![1; 4]).unwrap();
        let canvas = RecordingCanvas::new();
        overlay(Some(mask)).draw(&mut canvas.clone(), measured([0.0, 0.0], false).view());

        let commands = canvas.commands();
        assert!(matches!(commands[0], DrawCommand::DrawMask { size: [2, 2], .. }));
        assert!(matches!(commands[1], DrawCommand::StrokeRect([x, y, w, h], _)
            if (x - 20.0).abs() < 0.001 && (y - 20.0).abs() < 0.001 && (w - 40.0).abs() < 0.001 && (h - 40.0).abs() < 0.001));
        assert!(commands.iter().any(|c| matches!(c, DrawCommand::FillText(t, ..) if t == "cat")));
    }

    #[test]
    fn test_points_are_box_corners() {
        let points = overlay(None).points();
        assert_eq!(points.len(), 4);
        assert!(points.contains(&[0.2, 0.2]));
    }
}
