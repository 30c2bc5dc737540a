//! Construction of a looker from a runtime media type.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use super::{FrameLooker, FrameMedia, HostElement, ImageLooker, ImageMedia, Looker, VideoLooker, VideoMedia};
use crate::canvas::Canvas;
use crate::config::{LookerOptions, MediaConfig, OptionsPatch};
use crate::error::{LookerError, Result};
use crate::events::{ListenerId, LookerEvent};
use crate::geometry::Coordinates;
use crate::overlay::OverlayRef;
use crate::state::{BaseState, StateUpdate};
use crate::worker::Services;

/// Media kinds a looker can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Still image
    Image,
    /// One frame of a video
    Frame,
    /// Video with streamed frame labels
    Video,
}

impl MediaType {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Frame => "frame",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = LookerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaType::Image),
            "frame" | "frames" => Ok(MediaType::Frame),
            "video" => Ok(MediaType::Video),
            other => Err(LookerError::unsupported(format!("unsupported media type '{other}'"))),
        }
    }
}

/// A looker of any media type.
#[derive(Debug)]
pub enum AnyLooker {
    /// Image looker
    Image(ImageLooker),
    /// Frame looker
    Frame(FrameLooker),
    /// Video looker
    Video(VideoLooker),
}

/// Run the same expression on whichever looker is inside.
macro_rules! each {
    ($self:expr, $looker:ident => $body:expr) => {
        match $self {
            AnyLooker::Image($looker) => $body,
            AnyLooker::Frame($looker) => $body,
            AnyLooker::Video($looker) => $body,
        }
    };
}

impl AnyLooker {
    /// Create the looker matching `media_type`.
    pub fn new(
        media_type: MediaType,
        sample: Value,
        config: MediaConfig,
        options: OptionsPatch,
        canvas: Box<dyn Canvas>,
        services: Services,
    ) -> Result<Self> {
        log::debug!("Creating {} looker for {}", media_type, config.sample_id);
        Ok(match media_type {
            MediaType::Image => {
                AnyLooker::Image(Looker::new(ImageMedia::default(), sample, config, options, canvas, services)?)
            }
            MediaType::Frame => {
                AnyLooker::Frame(Looker::new(FrameMedia::default(), sample, config, options, canvas, services)?)
            }
            MediaType::Video => {
                let kind = VideoMedia::with_settings(&services);
                AnyLooker::Video(Looker::new(kind, sample, config, options, canvas, services)?)
            }
        })
    }

    /// Media type of the looker.
    pub fn media_type(&self) -> MediaType {
        match self {
            AnyLooker::Image(_) => MediaType::Image,
            AnyLooker::Frame(_) => MediaType::Frame,
            AnyLooker::Video(_) => MediaType::Video,
        }
    }

    /// Apply an update of the shared state.
    pub fn update(&mut self, update: StateUpdate<()>) {
        match self {
            AnyLooker::Image(looker) => looker.update(update),
            AnyLooker::Frame(looker) => looker.update(update.with_media(Default::default())),
            AnyLooker::Video(looker) => looker.update(update.with_media(Default::default())),
        }
    }

    /// Shared state.
    pub fn base(&self) -> &BaseState {
        each!(self, looker => &looker.state().base)
    }

    /// Media configuration.
    pub fn config(&self) -> &MediaConfig {
        each!(self, looker => &looker.state().config)
    }

    /// Current options.
    pub fn options(&self) -> &LookerOptions {
        each!(self, looker => &looker.state().options)
    }

    /// Overlays in hit-test order.
    pub fn overlays(&self) -> &[OverlayRef] {
        each!(self, looker => looker.overlays())
    }

    /// See [`Looker::update_options`].
    pub fn update_options(&mut self, options: OptionsPatch) {
        each!(self, looker => looker.update_options(options))
    }

    /// See [`Looker::update_sample`].
    pub fn update_sample(&mut self, sample: Value) -> Result<()> {
        each!(self, looker => looker.update_sample(sample))
    }

    /// See [`Looker::process_messages`].
    pub fn process_messages(&mut self) -> usize {
        each!(self, looker => looker.process_messages())
    }

    /// See [`Looker::wait_for_messages`].
    pub fn wait_for_messages(&mut self, timeout: Duration) -> usize {
        each!(self, looker => looker.wait_for_messages(timeout))
    }

    /// See [`Looker::attach`].
    pub fn attach(&mut self, host: Box<dyn HostElement>) {
        each!(self, looker => looker.attach(host))
    }

    /// See [`Looker::detach`].
    pub fn detach(&mut self) {
        each!(self, looker => looker.detach())
    }

    /// See [`Looker::notify_resize`].
    pub fn notify_resize(&mut self) {
        each!(self, looker => looker.notify_resize())
    }

    /// See [`Looker::on_animation_frame`].
    pub fn on_animation_frame(&mut self) -> bool {
        each!(self, looker => looker.on_animation_frame())
    }

    /// See [`Looker::zoom_at`].
    pub fn zoom_at(&mut self, cursor: Coordinates, factor: f32) {
        each!(self, looker => looker.zoom_at(cursor, factor))
    }

    /// See [`Looker::add_event_listener`].
    pub fn add_event_listener(&mut self, name: &str, handler: impl FnMut(&LookerEvent) + 'static) -> ListenerId {
        each!(self, looker => looker.add_event_listener(name, handler))
    }

    /// See [`Looker::remove_event_listener`].
    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        each!(self, looker => looker.remove_event_listener(id))
    }

    /// The video looker, if this is one.
    pub fn as_video_mut(&mut self) -> Option<&mut VideoLooker> {
        match self {
            AnyLooker::Video(looker) => Some(looker),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::RecordingCanvas;
    use crate::looker::tests::{TIMEOUT, TestHost};
    use crate::worker::tests::{FakeSource, services};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_media_type_parsing() {
        assert_eq!("image".parse::<MediaType>().unwrap(), MediaType::Image);
        assert_eq!("Frames".parse::<MediaType>().unwrap(), MediaType::Frame);
        assert_eq!("video".parse::<MediaType>().unwrap(), MediaType::Video);
        for unsupported in ["point_cloud", "group", "3d"] {
            assert!(matches!(
                unsupported.parse::<MediaType>(),
                Err(LookerError::UnsupportedData(_))
            ));
        }
    }

    #[test]
    fn test_factory_builds_matching_looker() {
        let services = services(Arc::new(FakeSource::default()));
        for media_type in [MediaType::Image, MediaType::Frame, MediaType::Video] {
            let mut looker = AnyLooker::new(
                media_type,
                json!({ "kp": { "_cls": "Keypoint", "points": [[0.5, 0.5]] } }),
                MediaConfig::new("s", [100.0, 100.0]).with_frame_count(10),
                OptionsPatch::default(),
                Box::new(RecordingCanvas::new()),
                services.clone(),
            )
            .unwrap();
            assert_eq!(looker.media_type(), media_type);

            looker.attach(TestHost::measured());
            assert!(looker.wait_for_messages(TIMEOUT) > 0);
            assert_eq!(looker.overlays().len(), 1, "{media_type}");

            looker.update(StateUpdate::new().cursor([50.0, 50.0]));
            assert!(looker.base().mouse_is_on_overlay, "{media_type}");
        }
    }
}
