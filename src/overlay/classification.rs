//! Classification overlays, drawn as a label list in the media's top-left corner.

use crate::canvas::{Canvas, text_width};
use crate::color::{color_for_field, with_alpha};
use crate::geometry::{BoundingBox, Coordinates};
use crate::sample::ClassificationLabel;
use crate::state::StateView;

use super::{Containment, Overlay, canvas_cursor, label_text};

const TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];
const BACKGROUND_ALPHA: u8 = 200;

/// A list of classifications under one field.
#[derive(Debug, Clone)]
pub struct ClassificationsOverlay {
    field: String,
    labels: Vec<ClassificationLabel>,
}

impl ClassificationsOverlay {
    /// Create an overlay for `labels` of `field`.
    pub fn new(field: &str, labels: Vec<ClassificationLabel>) -> Self {
        Self {
            field: field.to_owned(),
            labels,
        }
    }

    /// Text rows with their canvas boxes.
    fn rows(&self, state: StateView<'_>) -> Vec<(String, BoundingBox)> {
        let Some(canvas_bbox) = state.base.canvas_bbox else {
            return Vec::new();
        };
        let pad = state.base.text_pad;
        let row_height = state.base.font_size + 2.0 * pad;

        self.labels
            .iter()
            .filter_map(|c| label_text(c.label.as_deref(), c.confidence, state.options))
            .enumerate()
            .map(|(i, text)| {
                let width = text_width(&text, state.base.font_size) + 2.0 * pad;
                let rect = [
                    canvas_bbox[0] + pad,
                    canvas_bbox[1] + pad + i as f32 * (row_height + pad),
                    width,
                    row_height,
                ];
                (text, rect)
            })
            .collect()
    }
}

fn inside(rect: &BoundingBox, [x, y]: Coordinates) -> bool {
    x >= rect[0] && x <= rect[0] + rect[2] && y >= rect[1] && y <= rect[1] + rect[3]
}

impl Overlay for ClassificationsOverlay {
    fn field(&self) -> &str {
        &self.field
    }

    fn contains_point(&self, state: StateView<'_>) -> Containment {
        let Some((_, cursor)) = canvas_cursor(state) else {
            return Containment::None;
        };
        if self.rows(state).iter().any(|(_, rect)| inside(rect, cursor)) {
            Containment::Content
        } else {
            Containment::None
        }
    }

    fn mouse_distance(&self, state: StateView<'_>) -> f32 {
        match self.contains_point(state) {
            Containment::None => f32::INFINITY,
            _ => 0.0,
        }
    }

    fn draw(&self, canvas: &mut dyn Canvas, state: StateView<'_>) {
        let color = with_alpha(color_for_field(&self.field), BACKGROUND_ALPHA);
        let pad = state.base.text_pad;
        for (text, rect) in self.rows(state) {
            canvas.fill_rect(rect, color);
            canvas.fill_text(&text, [rect[0] + pad, rect[1] + pad], TEXT_COLOR);
        }
    }

    fn points(&self) -> Vec<Coordinates> {
        Vec::new()
    }

    fn is_classification(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawCommand, RecordingCanvas};
    use crate::overlay::tests::measured;

    fn overlay() -> ClassificationsOverlay {
        ClassificationsOverlay::new(
            "weather",
            vec![
                ClassificationLabel {
                    label: Some("sunny".into()),
                    confidence: Some(0.9),
                },
                ClassificationLabel {
                    label: None,
                    confidence: None,
                },
            ],
        )
    }

    #[test]
    fn test_draws_one_row_per_named_label() {
        let state = measured([90.0, 90.0], false);
        let canvas = RecordingCanvas::new();
        overlay().draw(&mut canvas.clone(), state.view());

        let texts: Vec<String> = canvas
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                DrawCommand::FillText(text, ..) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, ["sunny"]);
    }

    #[test]
    fn test_contains_cursor_over_row() {
        assert_eq!(overlay().contains_point(measured([5.0, 5.0], false).view()), Containment::Content);
        assert_eq!(overlay().contains_point(measured([90.0, 90.0], false).view()), Containment::None);
    }
}
