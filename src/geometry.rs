//! Coordinate transforms shared by every looker.
//!
//! All functions here are pure: they take the media dimensions, the window box
//! and the current pan/scale and return derived geometry. Boxes are
//! `[x, y, width, height]`.
//!
//! Screen position of a canvas point `c` is `pan + scale * c`, where canvas
//! space is the window box with its origin moved to `(0, 0)`.

use crate::config::MediaConfig;
use crate::constants::{FONT_SIZE, MAX_SCALE, MIN_SCALE, PAD, POINT_RADIUS, STROKE_WIDTH, ZOOM_CONTENT_MARGIN};
use crate::state::BaseState;

/// A point `[x, y]`.
pub type Coordinates = [f32; 2];

/// A size `[width, height]`.
pub type Dimensions = [f32; 2];

/// An axis-aligned box `[x, y, width, height]`.
pub type BoundingBox = [f32; 4];

/// Whether a window box has been measured (finite, positive extent).
pub fn is_measured(bbox: &BoundingBox) -> bool {
    bbox.iter().all(|v| v.is_finite()) && bbox[2] > 0.0 && bbox[3] > 0.0
}

fn has_extent(dimensions: &Dimensions) -> bool {
    dimensions.iter().all(|v| v.is_finite() && *v > 0.0)
}

/// Fit media of the given dimensions inside a container, preserving aspect ratio.
///
/// Wider media is letterboxed (centered vertically), taller media is
/// pillarboxed (centered horizontally).
pub fn fit_rect(media: Dimensions, container: BoundingBox) -> BoundingBox {
    let [mw, mh] = media;
    let [x, y, w, h] = container;
    let media_ratio = mw / mh;

    if media_ratio > w / h {
        let fitted_h = w / media_ratio;
        [x, y + (h - fitted_h) / 2.0, w, fitted_h]
    } else {
        let fitted_w = h * media_ratio;
        [x + (w - fitted_w) / 2.0, y, fitted_w, h]
    }
}

/// Clamp a pan offset so the scaled media cannot leave the viewport.
///
/// On an axis where the scaled media fits inside the viewport it is centered.
/// Otherwise the pan is clamped so the media covers the whole viewport extent.
pub fn snap_box(scale: f32, pan: Coordinates, viewport: Dimensions, media: Dimensions) -> Coordinates {
    let fitted = fit_rect(media, [0.0, 0.0, viewport[0], viewport[1]]);
    let mut snapped = pan;

    for axis in 0..2 {
        let offset = fitted[axis] * scale;
        let extent = fitted[axis + 2] * scale;
        let view = viewport[axis];

        snapped[axis] = if extent <= view {
            (view - extent) / 2.0 - offset
        } else {
            // media left edge must stay <= 0 and right edge >= view
            pan[axis].clamp(view - offset - extent, -offset)
        };
    }

    snapped
}

/// Compute the scale and pan that frame a set of relative points.
///
/// Points are relative media coordinates (0..1). Returns `None` when there is
/// nothing to frame.
pub fn zoom_to_content(
    points: &[Coordinates],
    media: Dimensions,
    viewport: Dimensions,
) -> Option<(f32, Coordinates)> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first[0], first[1], first[0], first[1]);
    for [x, y] in points.iter().copied() {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let [min_x, min_y] = [min_x.clamp(0.0, 1.0), min_y.clamp(0.0, 1.0)];
    let [max_x, max_y] = [max_x.clamp(0.0, 1.0), max_y.clamp(0.0, 1.0)];

    let fitted = fit_rect(media, [0.0, 0.0, viewport[0], viewport[1]]);
    let content_w = (max_x - min_x) * fitted[2];
    let content_h = (max_y - min_y) * fitted[3];
    let center = [
        fitted[0] + (min_x + max_x) / 2.0 * fitted[2],
        fitted[1] + (min_y + max_y) / 2.0 * fitted[3],
    ];

    let fill = |view: f32, content: f32| {
        if content > 0.0 {
            view * ZOOM_CONTENT_MARGIN / content
        } else {
            MAX_SCALE
        }
    };
    let scale = fill(viewport[0], content_w)
        .min(fill(viewport[1], content_h))
        .clamp(MIN_SCALE, MAX_SCALE);

    let pan = [
        viewport[0] / 2.0 - center[0] * scale,
        viewport[1] / 2.0 - center[1] * scale,
    ];
    Some((scale, pan))
}

/// Zoom to a new scale while keeping the canvas point under the cursor fixed.
///
/// `cursor` is relative to the window origin. Returns the new pan.
pub fn zoom_to_cursor(scale: f32, pan: Coordinates, new_scale: f32, cursor: Coordinates) -> Coordinates {
    // Canvas point under cursor (before zoom)
    let canvas_x = (cursor[0] - pan[0]) / scale;
    let canvas_y = (cursor[1] - pan[1]) / scale;

    [cursor[0] - canvas_x * new_scale, cursor[1] - canvas_y * new_scale]
}

/// Recompute every derived geometry field of `state`.
///
/// Order matters: each quantity consumes the previous one. Returns `false`
/// (leaving the state untouched) when the window box is not measured yet or
/// the media has no extent.
pub fn post_process(config: &MediaConfig, state: &mut BaseState) -> bool {
    let Some(window) = state.window_bbox.filter(is_measured) else {
        return false;
    };
    let dimensions = config.dimensions;
    if !has_extent(&dimensions) || !(state.scale.is_finite() && state.scale > 0.0) {
        return false;
    }
    let [tlx, tly, w, h] = window;

    state.pan = snap_box(state.scale, state.pan, [w, h], dimensions);

    let transformed_window = [
        tlx + state.pan[0],
        tly + state.pan[1],
        state.scale * w,
        state.scale * h,
    ];
    state.transformed_window_bbox = Some(transformed_window);

    let media = fit_rect(dimensions, window);
    state.media_bbox = Some(media);

    let transformed_media = fit_rect(dimensions, transformed_window);
    state.transformed_media_bbox = Some(transformed_media);

    state.canvas_bbox = Some([media[0] - tlx, media[1] - tly, media[2], media[3]]);

    state.relative_coordinates = [
        (state.cursor_coordinates[0] - transformed_media[0]) / transformed_media[2],
        (state.cursor_coordinates[1] - transformed_media[1]) / transformed_media[3],
    ];
    state.pixel_coordinates = [
        state.relative_coordinates[0] * dimensions[0],
        state.relative_coordinates[1] * dimensions[1],
    ];

    state.font_size = FONT_SIZE / state.scale;
    state.point_radius = POINT_RADIUS / state.scale;
    state.stroke_width = STROKE_WIDTH / state.scale;
    if config.thumbnail {
        state.stroke_width /= 2.0;
    }
    state.text_pad = PAD / state.scale;

    true
}

/// Map a relative media point into canvas space.
pub fn to_canvas(canvas_bbox: &BoundingBox, point: Coordinates) -> Coordinates {
    [
        canvas_bbox[0] + point[0] * canvas_bbox[2],
        canvas_bbox[1] + point[1] * canvas_bbox[3],
    ]
}

/// Distance from a point to the outline of a box (0 on the edge).
pub fn distance_to_outline(bbox: &BoundingBox, point: Coordinates) -> f32 {
    let [x, y, w, h] = *bbox;
    let [px, py] = point;
    let inside = px >= x && px <= x + w && py >= y && py <= y + h;

    if inside {
        (px - x).min(x + w - px).min(py - y).min(y + h - py)
    } else {
        let dx = (x - px).max(0.0).max(px - (x + w));
        let dy = (y - py).max(0.0).max(py - (y + h));
        (dx * dx + dy * dy).sqrt()
    }
}
