//! Semantic segmentation overlays covering the whole media.

use crate::canvas::Canvas;
use crate::color::{MASK_ALPHA, color_for_field, with_alpha};
use crate::geometry::Coordinates;
use crate::sample::MaskBuffer;
use crate::state::StateView;

use super::{Containment, Overlay};

/// A full-frame mask.
#[derive(Debug, Clone)]
pub struct SegmentationOverlay {
    field: String,
    mask: MaskBuffer,
}

impl SegmentationOverlay {
    /// Create an overlay for the mask of `field`.
    pub fn new(field: &str, mask: MaskBuffer) -> Self {
        Self {
            field: field.to_owned(),
            mask,
        }
    }
}

impl Overlay for SegmentationOverlay {
    fn field(&self) -> &str {
        &self.field
    }

    fn contains_point(&self, state: StateView<'_>) -> Containment {
        if state.base.canvas_bbox.is_some() && self.mask.sample(state.base.relative_coordinates) != 0 {
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
        if let Some(canvas_bbox) = state.base.canvas_bbox {
            canvas.draw_mask(&self.mask, canvas_bbox, with_alpha(color_for_field(&self.field), MASK_ALPHA));
        }
    }

    fn points(&self) -> Vec<Coordinates> {
        Vec::new()
    }
}
