//! A single video frame shown as a still.

use super::{Looker, MediaKind};
use crate::config::{LookerOptions, MediaConfig};
use crate::overlay::{OverlayRef, load_overlays};
use crate::sample::DecodedSample;
use crate::state::{FieldPatch, RenderState};
use crate::worker::Services;

/// Fields of a frame looker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameFields {
    /// Duration of the source video in seconds, when known
    pub duration: Option<f32>,
}

/// Partial update of [`FrameFields`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramePatch {
    /// New duration
    pub duration: Option<Option<f32>>,
}

impl FieldPatch for FramePatch {
    type Target = FrameFields;

    fn is_empty(&self) -> bool {
        self.duration.is_none()
    }

    fn apply(self, target: &mut FrameFields) {
        if let Some(duration) = self.duration {
            target.duration = duration;
        }
    }
}

/// Frame media: sample overlays plus the labels of frame 1.
#[derive(Debug, Default)]
pub struct FrameMedia {
    overlays: Vec<OverlayRef>,
}

/// A looker over one frame.
pub type FrameLooker = Looker<FrameMedia>;

impl MediaKind for FrameMedia {
    type Fields = FrameFields;
    type Patch = FramePatch;

    fn initial_fields(&self, config: &MediaConfig, _options: &LookerOptions) -> FrameFields {
        FrameFields {
            duration: config.duration(),
        }
    }

    fn load_overlays(&mut self, sample: &DecodedSample) {
        let mut overlays = load_overlays(&sample.sample);
        if let Some(frame) = &sample.first_frame {
            overlays.extend(load_overlays(frame));
        }
        self.overlays = overlays;
    }

    fn pluck_overlays(
        &mut self,
        _services: &Services,
        _state: &mut RenderState<FrameFields>,
        _previous: &RenderState<FrameFields>,
        _plucked: &[OverlayRef],
    ) -> Vec<OverlayRef> {
        self.overlays.clone()
    }
}
