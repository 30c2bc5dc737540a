//! Keypoint overlays.

use crate::canvas::Canvas;
use crate::color::color_for_field;
use crate::geometry::{Coordinates, to_canvas};
use crate::sample::KeypointLabel;
use crate::state::StateView;

use super::{Containment, Overlay, canvas_cursor};

/// A set of keypoints drawn as dots.
#[derive(Debug, Clone)]
pub struct KeypointOverlay {
    field: String,
    label: KeypointLabel,
}

impl KeypointOverlay {
    /// Create an overlay for one keypoint set of `field`.
    pub fn new(field: &str, label: KeypointLabel) -> Self {
        Self {
            field: field.to_owned(),
            label,
        }
    }

    fn valid_points(&self) -> impl Iterator<Item = Coordinates> + '_ {
        self.label
            .points
            .iter()
            .copied()
            .filter(|p| p[0].is_finite() && p[1].is_finite())
    }
}

impl Overlay for KeypointOverlay {
    fn field(&self) -> &str {
        &self.field
    }

    fn contains_point(&self, state: StateView<'_>) -> Containment {
        if self.mouse_distance(state) <= 2.0 * state.base.point_radius {
            Containment::Content
        } else {
            Containment::None
        }
    }

    fn mouse_distance(&self, state: StateView<'_>) -> f32 {
        let Some((canvas_bbox, [cx, cy])) = canvas_cursor(state) else {
            return f32::INFINITY;
        };
        self.valid_points()
            .map(|p| {
                let [x, y] = to_canvas(&canvas_bbox, p);
                ((x - cx).powi(2) + (y - cy).powi(2)).sqrt()
            })
            .fold(f32::INFINITY, f32::min)
    }

    fn draw(&self, canvas: &mut dyn Canvas, state: StateView<'_>) {
        let Some(canvas_bbox) = state.base.canvas_bbox else {
            return;
        };
        let color = color_for_field(&self.field);
        for point in self.valid_points() {
            canvas.fill_circle(to_canvas(&canvas_bbox, point), state.base.point_radius, color);
        }
    }

    fn points(&self) -> Vec<Coordinates> {
        self.valid_points().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::RecordingCanvas;
    use crate::overlay::tests::measured;

    fn overlay() -> KeypointOverlay {
        KeypointOverlay::new(
            "pose",
            KeypointLabel {
                label: None,
                confidence: None,
                points: vec![[0.1, 0.1], [0.5, 0.5], [f32::NAN, 0.3]],
            },
        )
    }

    #[test]
    fn test_skips_missing_points() {
        let canvas = RecordingCanvas::new();
        overlay().draw(&mut canvas.clone(), measured([0.0, 0.0], false).view());
        assert_eq!(canvas.commands().len(), 2);
        assert_eq!(overlay().points().len(), 2);
    }

    #[test]
    fn test_contains_near_point() {
        assert_eq!(overlay().contains_point(measured([50.0, 51.0], false).view()), Containment::Content);
        assert_eq!(overlay().contains_point(measured([70.0, 70.0], false).view()), Containment::None);
        assert!((overlay().mouse_distance(measured([10.0, 13.0], false).view()) - 3.0).abs() < 0.001);
    }
}
