//! Drawable, hit-testable label overlays.
//!
//! Overlays are built once from a decoded payload and never mutated; a new
//! sample or frame always yields a fresh set. They are shared as
//! [`OverlayRef`] so the same set can live in the prefetch arena and in a
//! looker's current selection at once.

mod classification;
mod detection;
mod keypoints;
mod segmentation;

use std::fmt::Debug;
use std::sync::Arc;

pub use classification::ClassificationsOverlay;
pub use detection::DetectionOverlay;
pub use keypoints::KeypointOverlay;
pub use segmentation::SegmentationOverlay;

use crate::canvas::Canvas;
use crate::config::LookerOptions;
use crate::geometry::{BoundingBox, Coordinates, to_canvas};
use crate::sample::{DecodedPayload, Label};
use crate::state::StateView;

/// How much of an overlay lies under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Containment {
    /// Cursor is outside the overlay
    None,
    /// Cursor is on the overlay's outline
    Border,
    /// Cursor is over the overlay's content
    Content,
}

/// Capabilities shared by every overlay variant.
pub trait Overlay: Send + Sync + Debug {
    /// Label field path the overlay was built from.
    fn field(&self) -> &str;

    /// Classify the cursor position against this overlay.
    fn contains_point(&self, state: StateView<'_>) -> Containment;

    /// Distance from the cursor to the overlay in canvas units.
    fn mouse_distance(&self, state: StateView<'_>) -> f32;

    /// Draw in canvas space under the current transform.
    fn draw(&self, canvas: &mut dyn Canvas, state: StateView<'_>);

    /// Relative points spanning the overlay, used to zoom to content.
    fn points(&self) -> Vec<Coordinates>;

    /// Whether this is a classification overlay (drawn as a label list).
    fn is_classification(&self) -> bool {
        false
    }
}

/// Shared handle to an overlay.
pub type OverlayRef = Arc<dyn Overlay>;

/// Build overlays for every label of a decoded payload.
///
/// Field paths carry over unchanged, so frame overlays stay under the
/// `frames.` namespace.
pub fn load_overlays(payload: &DecodedPayload) -> Vec<OverlayRef> {
    let mut overlays: Vec<OverlayRef> = Vec::new();

    for field in &payload.labels {
        let path = field.path.as_str();
        match &field.label {
            Label::Classification(c) => {
                overlays.push(Arc::new(ClassificationsOverlay::new(path, vec![c.clone()])));
            }
            Label::Classifications { classifications } => {
                overlays.push(Arc::new(ClassificationsOverlay::new(path, classifications.clone())));
            }
            Label::Detection(d) => overlays.push(Arc::new(DetectionOverlay::new(path, d.clone()))),
            Label::Detections { detections } => {
                for d in detections {
                    overlays.push(Arc::new(DetectionOverlay::new(path, d.clone())));
                }
            }
            Label::Keypoint(k) => overlays.push(Arc::new(KeypointOverlay::new(path, k.clone()))),
            Label::Keypoints { keypoints } => {
                for k in keypoints {
                    overlays.push(Arc::new(KeypointOverlay::new(path, k.clone())));
                }
            }
            Label::Segmentation(s) => {
                overlays.push(Arc::new(SegmentationOverlay::new(path, s.mask.clone())));
            }
        }
    }

    overlays
}

/// Filter and order overlays for display.
///
/// Returns the overlays in z-order (index 0 on top) and the normalized
/// rotation. Inactive fields are dropped and classifications come first.
/// Outside thumbnails, overlays under the cursor are moved ahead of the rest,
/// ordered by containment then distance and rotated by `rotate`.
pub fn process_overlays(state: StateView<'_>, overlays: &[OverlayRef]) -> (Vec<OverlayRef>, usize) {
    let (classifications, others): (Vec<OverlayRef>, Vec<OverlayRef>) = overlays
        .iter()
        .filter(|o| state.options.is_active(o.field()))
        .cloned()
        .partition(|o| o.is_classification());

    if state.config.thumbnail || others.is_empty() {
        let mut ordered = classifications;
        ordered.extend(others);
        return (ordered, 0);
    }

    let mut contained = Vec::new();
    let mut outside = Vec::new();
    for overlay in others {
        match overlay.contains_point(state) {
            Containment::None => outside.push(overlay),
            containment => {
                let distance = overlay.mouse_distance(state);
                contained.push((containment, distance, overlay));
            }
        }
    }

    contained.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.total_cmp(&b.1)));
    let rotate = if contained.is_empty() {
        0
    } else {
        state.base.rotate % contained.len()
    };
    contained.rotate_left(rotate);

    let mut ordered = classifications;
    ordered.extend(contained.into_iter().map(|(_, _, overlay)| overlay));
    ordered.extend(outside);
    (ordered, rotate)
}

/// Relative points of every overlay, for zoom-to-content.
pub fn content_points(overlays: &[OverlayRef]) -> Vec<Coordinates> {
    overlays.iter().flat_map(|o| o.points()).collect()
}

/// Canvas box and cursor in canvas space, once geometry is measured.
pub(crate) fn canvas_cursor(state: StateView<'_>) -> Option<(BoundingBox, Coordinates)> {
    let canvas_bbox = state.base.canvas_bbox?;
    Some((canvas_bbox, to_canvas(&canvas_bbox, state.base.relative_coordinates)))
}

/// Map a relative box into canvas space.
pub(crate) fn to_canvas_rect(canvas_bbox: &BoundingBox, rect: &BoundingBox) -> BoundingBox {
    let [x, y] = to_canvas(canvas_bbox, [rect[0], rect[1]]);
    [x, y, rect[2] * canvas_bbox[2], rect[3] * canvas_bbox[3]]
}

/// Text drawn next to an overlay, if labels are shown.
pub(crate) fn label_text(label: Option<&str>, confidence: Option<f32>, options: &LookerOptions) -> Option<String> {
    if !options.show_label {
        return None;
    }
    let name = label?;
    match confidence {
        Some(confidence) if options.show_confidence => Some(format!("{name} {confidence:.2}")),
        _ => Some(name.to_owned()),
    }
}
