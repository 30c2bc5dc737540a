//! Render state owned by a looker and the partial updates applied to it.

use crate::config::{LookerOptions, MediaConfig, OptionsPatch};
use crate::constants::{FONT_SIZE, PAD, POINT_RADIUS, STROKE_WIDTH};
use crate::geometry::{BoundingBox, Coordinates};

/// State shared by every media kind.
///
/// Fields below `window_bbox` are derived by [`crate::geometry::post_process`]
/// and must never be set independently.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseState {
    /// Cursor position in window (page) coordinates
    pub cursor_coordinates: Coordinates,
    /// Pan offset in screen pixels
    pub pan: Coordinates,
    /// Zoom scale (1.0 = fit)
    pub scale: f32,
    /// Index rotation among overlays under the cursor
    pub rotate: usize,
    /// Whether the cursor hovers the looker
    pub hovering: bool,
    /// Whether the user is dragging the canvas
    pub panning: bool,
    /// Whether a wheel zoom is in progress
    pub wheeling: bool,
    /// Whether interaction is disabled
    pub disable_controls: bool,
    /// Whether the media itself has loaded
    pub loaded: bool,
    /// Whether decoded overlays are available
    pub overlays_prepared: bool,
    /// Pending one-shot zoom to label content
    pub set_zoom: bool,
    /// Whether wheel zoom is allowed
    pub can_zoom: bool,
    /// Whether the topmost overlay contains the cursor
    pub mouse_is_on_overlay: bool,

    /// Host element box in window coordinates
    pub window_bbox: Option<BoundingBox>,
    /// Window box shifted by pan and scaled by zoom
    pub transformed_window_bbox: Option<BoundingBox>,
    /// Media fitted inside the window box
    pub media_bbox: Option<BoundingBox>,
    /// Media fitted inside the transformed window box
    pub transformed_media_bbox: Option<BoundingBox>,
    /// Media box relative to the window origin
    pub canvas_bbox: Option<BoundingBox>,
    /// Cursor as a fraction of the transformed media box
    pub relative_coordinates: Coordinates,
    /// Cursor in media pixel space
    pub pixel_coordinates: Coordinates,
    /// Overlay stroke width in canvas units
    pub stroke_width: f32,
    /// Label font size in canvas units
    pub font_size: f32,
    /// Keypoint radius in canvas units
    pub point_radius: f32,
    /// Label text padding in canvas units
    pub text_pad: f32,
}

impl Default for BaseState {
    fn default() -> Self {
        Self {
            cursor_coordinates: [0.0, 0.0],
            pan: [0.0, 0.0],
            scale: 1.0,
            rotate: 0,
            hovering: false,
            panning: false,
            wheeling: false,
            disable_controls: false,
            loaded: false,
            overlays_prepared: false,
            set_zoom: false,
            can_zoom: false,
            mouse_is_on_overlay: false,
            window_bbox: None,
            transformed_window_bbox: None,
            media_bbox: None,
            transformed_media_bbox: None,
            canvas_bbox: None,
            relative_coordinates: [0.0, 0.0],
            pixel_coordinates: [0.0, 0.0],
            stroke_width: STROKE_WIDTH,
            font_size: FONT_SIZE,
            point_radius: POINT_RADIUS,
            text_pad: PAD,
        }
    }
}

/// Complete state of one looker: immutable config, options, shared state and
/// media-kind specific fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState<F> {
    /// Fixed at construction
    pub config: MediaConfig,
    /// Display toggles
    pub options: LookerOptions,
    /// Shared transient and derived state
    pub base: BaseState,
    /// Media-kind specific fields
    pub media: F,
}

impl<F> RenderState<F> {
    /// Borrow the parts overlays need for hit testing and drawing.
    pub fn view(&self) -> StateView<'_> {
        StateView {
            config: &self.config,
            options: &self.options,
            base: &self.base,
        }
    }
}

/// Read-only view of a render state, independent of the media kind.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    /// Media configuration
    pub config: &'a MediaConfig,
    /// Display toggles
    pub options: &'a LookerOptions,
    /// Shared state with derived geometry
    pub base: &'a BaseState,
}

/// A partial update of media-kind specific fields.
pub trait FieldPatch: Default {
    /// The fields this patch updates.
    type Target;

    /// Whether applying the patch would change nothing.
    fn is_empty(&self) -> bool;

    /// Shallow key-wise replace into `target`.
    fn apply(self, target: &mut Self::Target);
}

impl FieldPatch for () {
    type Target = ();

    fn is_empty(&self) -> bool {
        true
    }

    fn apply(self, _target: &mut ()) {}
}

/// A partial update of a [`RenderState`].
///
/// Only set fields are replaced; options are merged field-wise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate<P> {
    /// New cursor position
    pub cursor_coordinates: Option<Coordinates>,
    /// New pan offset
    pub pan: Option<Coordinates>,
    /// New zoom scale
    pub scale: Option<f32>,
    /// New overlay rotation
    pub rotate: Option<usize>,
    /// New hover flag
    pub hovering: Option<bool>,
    /// New panning flag
    pub panning: Option<bool>,
    /// New wheeling flag
    pub wheeling: Option<bool>,
    /// New disable-controls flag
    pub disable_controls: Option<bool>,
    /// New loaded flag
    pub loaded: Option<bool>,
    /// New overlays-prepared flag
    pub overlays_prepared: Option<bool>,
    /// New zoom-to-content request
    pub set_zoom: Option<bool>,
    /// Option changes
    pub options: Option<OptionsPatch>,
    /// Media-kind specific changes
    pub media: P,
}

impl<P> StateUpdate<P>
where
    P: Default,
{
    /// An update that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// An update of media-kind fields only.
    pub fn media(media: P) -> Self {
        Self {
            media,
            ..Self::new()
        }
    }

    /// Set the cursor position.
    pub fn cursor(mut self, cursor: Coordinates) -> Self {
        self.cursor_coordinates = Some(cursor);
        self
    }

    /// Set the pan offset.
    pub fn pan(mut self, pan: Coordinates) -> Self {
        self.pan = Some(pan);
        self
    }

    /// Set the zoom scale.
    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set the hover flag.
    pub fn hovering(mut self, hovering: bool) -> Self {
        self.hovering = Some(hovering);
        self
    }

    /// Set the loaded flag.
    pub fn loaded(mut self, loaded: bool) -> Self {
        self.loaded = Some(loaded);
        self
    }

    /// Set the overlays-prepared flag.
    pub fn overlays_prepared(mut self, prepared: bool) -> Self {
        self.overlays_prepared = Some(prepared);
        self
    }

    /// Set option changes.
    pub fn options(mut self, options: OptionsPatch) -> Self {
        self.options = Some(options);
        self
    }
}

impl StateUpdate<()> {
    /// Carry the shared changes over to an update of another media kind.
    pub fn with_media<P>(self, media: P) -> StateUpdate<P> {
        StateUpdate {
            cursor_coordinates: self.cursor_coordinates,
            pan: self.pan,
            scale: self.scale,
            rotate: self.rotate,
            hovering: self.hovering,
            panning: self.panning,
            wheeling: self.wheeling,
            disable_controls: self.disable_controls,
            loaded: self.loaded,
            overlays_prepared: self.overlays_prepared,
            set_zoom: self.set_zoom,
            options: self.options,
            media,
        }
    }
}

impl<P: FieldPatch> StateUpdate<P> {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.cursor_coordinates.is_none()
            && self.pan.is_none()
            && self.scale.is_none()
            && self.rotate.is_none()
            && self.hovering.is_none()
            && self.panning.is_none()
            && self.wheeling.is_none()
            && self.disable_controls.is_none()
            && self.loaded.is_none()
            && self.overlays_prepared.is_none()
            && self.set_zoom.is_none()
            && self.options.as_ref().is_none_or(OptionsPatch::is_empty)
            && self.media.is_empty()
    }

    /// Merge into `state`.
    pub fn apply_to(self, state: &mut RenderState<P::Target>) {
        let base = &mut state.base;
        if let Some(v) = self.cursor_coordinates {
            base.cursor_coordinates = v;
        }
        if let Some(v) = self.pan {
            base.pan = v;
        }
        if let Some(v) = self.scale {
            base.scale = v;
        }
        if let Some(v) = self.rotate {
            base.rotate = v;
        }
        if let Some(v) = self.hovering {
            base.hovering = v;
        }
        if let Some(v) = self.panning {
            base.panning = v;
        }
        if let Some(v) = self.wheeling {
            base.wheeling = v;
        }
        if let Some(v) = self.disable_controls {
            base.disable_controls = v;
        }
        if let Some(v) = self.loaded {
            base.loaded = v;
        }
        if let Some(v) = self.overlays_prepared {
            base.overlays_prepared = v;
        }
        if let Some(v) = self.set_zoom {
            base.set_zoom = v;
        }
        if let Some(options) = self.options {
            state.options.apply(options);
        }
        self.media.apply(&mut state.media);
    }
}
