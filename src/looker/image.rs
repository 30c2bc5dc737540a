//! Still images.

use super::{Looker, MediaKind};
use crate::config::{LookerOptions, MediaConfig};
use crate::overlay::{OverlayRef, load_overlays};
use crate::sample::DecodedSample;
use crate::state::RenderState;
use crate::worker::Services;

/// Image media: one fixed set of sample overlays.
#[derive(Debug, Default)]
pub struct ImageMedia {
    overlays: Vec<OverlayRef>,
}

/// A looker over a still image.
pub type ImageLooker = Looker<ImageMedia>;

impl MediaKind for ImageMedia {
    type Fields = ();
    type Patch = ();

    fn initial_fields(&self, _config: &MediaConfig, _options: &LookerOptions) {}

    fn load_overlays(&mut self, sample: &DecodedSample) {
        self.overlays = load_overlays(&sample.sample);
    }

    fn pluck_overlays(
        &mut self,
        _services: &Services,
        _state: &mut RenderState<()>,
        _previous: &RenderState<()>,
        _plucked: &[OverlayRef],
    ) -> Vec<OverlayRef> {
        self.overlays.clone()
    }
}
