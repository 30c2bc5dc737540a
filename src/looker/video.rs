//! Video playback over streamed frames.
//!
//! Frame labels arrive through the shared [`crate::worker::FrameReader`] and
//! are kept as overlays in a per-looker [`PrefetchArena`]. A frame is only
//! shown once its overlays are resident; until then the looker stays on the
//! previous frame, flags `buffering` and resumes when the frame arrives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use uuid::Uuid;
use web_time::Instant;

use super::{Looker, MediaKind};
use crate::cache::{PrefetchArena, Prefetched};
use crate::config::{LookerOptions, MediaConfig};
use crate::error::LookerError;
use crate::events::LookerEvent;
use crate::overlay::{OverlayRef, load_overlays};
use crate::sample::DecodedSample;
use crate::state::{FieldPatch, RenderState, StateUpdate};
use crate::worker::{FrameDelivery, FrameSubscriber, Services};

/// Fields of a video looker.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFields {
    /// Duration in seconds, when known
    pub duration: Option<f32>,
    /// Whether a seek is waiting for its frame
    pub seeking: bool,
    /// Whether playback is locked to the fragment
    pub locked: bool,
    /// Inclusive frame range playback can be locked to
    pub fragment: Option<(u32, u32)>,
    /// Whether the video is playing
    pub playing: bool,
    /// Frame shown, starting at 1
    pub frame_number: u32,
    /// Whether the requested frame is not resident yet
    pub buffering: bool,
}

/// Partial update of [`VideoFields`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoPatch {
    /// New duration
    pub duration: Option<Option<f32>>,
    /// New seeking flag
    pub seeking: Option<bool>,
    /// New fragment lock
    pub locked: Option<bool>,
    /// New fragment
    pub fragment: Option<Option<(u32, u32)>>,
    /// New playing flag
    pub playing: Option<bool>,
    /// New frame number
    pub frame_number: Option<u32>,
    /// New buffering flag
    pub buffering: Option<bool>,
}

impl VideoPatch {
    /// Move to `frame_number`.
    pub fn frame(frame_number: u32) -> Self {
        Self {
            frame_number: Some(frame_number),
            ..Self::default()
        }
    }

    /// Start or stop playback.
    pub fn playing(playing: bool) -> Self {
        Self {
            playing: Some(playing),
            ..Self::default()
        }
    }
}

impl FieldPatch for VideoPatch {
    type Target = VideoFields;

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn apply(self, target: &mut VideoFields) {
        if let Some(v) = self.duration {
            target.duration = v;
        }
        if let Some(v) = self.seeking {
            target.seeking = v;
        }
        if let Some(v) = self.locked {
            target.locked = v;
        }
        if let Some(v) = self.fragment {
            target.fragment = v;
        }
        if let Some(v) = self.playing {
            target.playing = v;
        }
        if let Some(v) = self.frame_number {
            target.frame_number = v;
        }
        if let Some(v) = self.buffering {
            target.buffering = v;
        }
    }
}

/// Video media.
#[derive(Debug)]
pub struct VideoMedia {
    sample_overlays: Vec<OverlayRef>,
    arena: PrefetchArena,
    frames: (Sender<FrameDelivery>, Receiver<FrameDelivery>),
    /// Last frame shown, read by the frame reader to bound look-ahead
    current_frame: Arc<AtomicU32>,
    /// Live frame stream and the frame it started at
    subscription: Option<(Uuid, u32)>,
    /// Frame waiting to become resident
    pending_frame: Option<u32>,
    last_tick: Option<Instant>,
}

/// A looker over a video.
pub type VideoLooker = Looker<VideoMedia>;

impl VideoMedia {
    /// Create video media keeping at most `prefetch_capacity` frames of overlays.
    pub fn new(prefetch_capacity: usize) -> Self {
        Self {
            sample_overlays: Vec::new(),
            arena: PrefetchArena::new(prefetch_capacity),
            frames: channel::unbounded(),
            current_frame: Arc::new(AtomicU32::new(1)),
            subscription: None,
            pending_frame: None,
            last_tick: None,
        }
    }

    /// Video media sized by the services' settings.
    pub fn with_settings(services: &Services) -> Self {
        Self::new(services.settings().prefetch_capacity)
    }

    /// The prefetch arena.
    pub fn arena(&self) -> &PrefetchArena {
        &self.arena
    }

    /// Frame waiting to become resident.
    pub fn pending_frame(&self) -> Option<u32> {
        self.pending_frame
    }

    /// Overlays of a frame, promoting it from the frame cache if needed.
    fn resident(&mut self, services: &Services, sample_id: &str, frame_number: u32) -> Option<Arc<[OverlayRef]>> {
        if let Prefetched::Resident(overlays) = self.arena.lookup(frame_number) {
            return Some(overlays);
        }
        let payload = services.reader().cached(sample_id, frame_number)?;
        let overlays: Arc<[OverlayRef]> = load_overlays(&payload).into();
        self.arena.insert(frame_number, Arc::clone(&overlays));
        Some(overlays)
    }

    /// Our stream, if the reader still serves it.
    ///
    /// Forgets a stream that was superseded by another looker or stalled.
    fn live_subscription(&mut self, services: &Services) -> Option<(Uuid, u32)> {
        let (id, start) = self.subscription?;
        if services.reader().current_id() != Some(id) {
            log::debug!("Frame stream {} is no longer live", id);
            self.subscription = None;
            return None;
        }
        Some((id, start))
    }

    /// Start streaming from `frame_number` unless a live stream already started there.
    fn prefetch(&mut self, services: &Services, config: &MediaConfig, frame_number: u32) {
        if self
            .live_subscription(services)
            .is_some_and(|(_, start)| start == frame_number)
        {
            return;
        }
        let Some(frame_count) = config.frame_count else {
            log::warn!("Cannot stream frames of {}: frame count unknown", config.sample_id);
            return;
        };
        let subscriber = FrameSubscriber {
            sample_id: config.sample_id.clone(),
            frame_number,
            frame_count,
            sink: self.frames.0.clone(),
            current_frame: Arc::clone(&self.current_frame),
        };
        match services.reader().acquire(subscriber) {
            Ok(id) => self.subscription = Some((id, frame_number)),
            Err(e) => log::error!("Failed to stream frames of {}: {}", config.sample_id, e),
        }
    }
}

impl MediaKind for VideoMedia {
    type Fields = VideoFields;
    type Patch = VideoPatch;

    fn default_options(&self) -> LookerOptions {
        LookerOptions {
            loop_video: true,
            ..LookerOptions::default()
        }
    }

    fn initial_fields(&self, config: &MediaConfig, _options: &LookerOptions) -> VideoFields {
        VideoFields {
            duration: config.duration(),
            seeking: false,
            locked: false,
            fragment: config.support,
            playing: false,
            frame_number: 1,
            buffering: true,
        }
    }

    fn load_overlays(&mut self, sample: &DecodedSample) {
        self.sample_overlays = load_overlays(&sample.sample);
        self.arena.clear();
        let first_frame = sample.first_frame.as_ref().map(load_overlays).unwrap_or_default();
        self.arena.insert(1, first_frame);
    }

    fn pluck_overlays(
        &mut self,
        services: &Services,
        state: &mut RenderState<VideoFields>,
        previous: &RenderState<VideoFields>,
        plucked: &[OverlayRef],
    ) -> Vec<OverlayRef> {
        let frame_number = state.media.frame_number;
        if let Some(frame) = self.resident(services, &state.config.sample_id, frame_number) {
            self.current_frame.store(frame_number, Ordering::Release);
            if self.pending_frame == Some(frame_number) {
                self.pending_frame = None;
            }
            state.media.buffering = false;
            let mut overlays = self.sample_overlays.clone();
            overlays.extend(frame.iter().cloned());
            return overlays;
        }

        let stream = state.config.thumbnail || state.options.stream_while_playing;
        if state.media.playing && stream {
            self.prefetch(services, &state.config, frame_number);
        }
        log::trace!("Frame {} of {} not resident", frame_number, state.config.sample_id);
        self.pending_frame = Some(frame_number);
        state.media.frame_number = previous.media.frame_number;
        state.media.buffering = true;
        plucked.to_vec()
    }

    fn on_overlays_prepared(&mut self, state: &RenderState<VideoFields>) -> VideoPatch {
        if state.options.autoplay && !state.config.thumbnail {
            VideoPatch::playing(true)
        } else {
            VideoPatch::default()
        }
    }

    fn poll(&mut self, services: &Services, state: &RenderState<VideoFields>) -> Option<VideoPatch> {
        let ours = self.subscription.map(|(id, _)| id);
        for delivery in self.frames.1.try_iter() {
            if ours != Some(delivery.id) {
                log::debug!("Discarding frame {} of stale stream {}", delivery.frame_number, delivery.id);
                continue;
            }
            self.arena.insert(delivery.frame_number, load_overlays(&delivery.payload));
        }
        self.live_subscription(services);

        let pending = self.pending_frame?;
        if !self.arena.contains(pending) {
            return None;
        }
        Some(VideoPatch {
            frame_number: Some(pending),
            seeking: state.media.seeking.then_some(false),
            ..VideoPatch::default()
        })
    }

    fn teardown(&mut self, services: &Services) {
        if let Some((id, _)) = self.subscription.take() {
            services.reader().release(id);
        }
    }
}

impl Looker<VideoMedia> {
    /// Start playback. No-op while already playing.
    pub fn play(&mut self) {
        if self.state.media.playing {
            return;
        }
        self.kind.last_tick = None;
        self.update(StateUpdate::media(VideoPatch::playing(true)));
    }

    /// Pause playback. No-op while paused.
    pub fn pause(&mut self) {
        if !self.state.media.playing {
            return;
        }
        self.update(StateUpdate::media(VideoPatch::playing(false)));
    }

    /// Jump to the start of the fragment and lock playback to it.
    ///
    /// Dispatches an error event and leaves the state untouched when the
    /// video has no fragment.
    pub fn reset_to_fragment(&mut self) {
        let Some((start, _)) = self.state.media.fragment else {
            self.dispatch(LookerEvent::Error(LookerError::NoFragment));
            return;
        };
        self.request_frame(start);
        self.update(StateUpdate::media(VideoPatch {
            locked: Some(true),
            frame_number: Some(start),
            ..VideoPatch::default()
        }));
    }

    /// Show `frame`, streaming it first if needed.
    ///
    /// Out of range frames dispatch an error event instead.
    pub fn seek(&mut self, frame: u32) {
        let frame_count = self.state.config.frame_count.unwrap_or(0);
        if frame == 0 || frame > frame_count {
            self.dispatch(LookerEvent::Error(LookerError::InvalidSeek { frame, frame_count }));
            return;
        }
        let waiting = !self.request_frame(frame);
        self.update(StateUpdate::media(VideoPatch {
            frame_number: Some(frame),
            seeking: Some(waiting),
            ..VideoPatch::default()
        }));
    }

    /// Make `frame` resident or start streaming it. Returns whether it is resident.
    fn request_frame(&mut self, frame: u32) -> bool {
        let sample_id = &self.state.config.sample_id;
        if self.kind.resident(&self.services, sample_id, frame).is_some() {
            return true;
        }
        self.kind.prefetch(&self.services, &self.state.config, frame);
        false
    }

    /// Advance playback to `now`.
    ///
    /// Frames advance at the configured frame rate. At the end of the range
    /// playback loops (when locked to the fragment or when looping is on) or
    /// stops. Returns whether the frame changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let last = self.kind.last_tick.replace(now);
        let media = &self.state.media;
        if !media.playing || media.buffering {
            return false;
        }
        let (Some(last), Some(frame_rate)) = (last, self.state.config.frame_rate.filter(|r| *r > 0.0)) else {
            return false;
        };

        let elapsed = now.saturating_duration_since(last).as_secs_f32();
        let frames = (elapsed * frame_rate).floor() as u32;
        if frames == 0 {
            self.kind.last_tick = Some(last);
            return false;
        }
        self.kind.last_tick = Some(last + Duration::from_secs_f32(frames as f32 / frame_rate));

        let frame_count = self.state.config.frame_count.unwrap_or(u32::MAX);
        let (first, end) = match (media.locked, media.fragment) {
            (true, Some(fragment)) => fragment,
            _ => (1, frame_count),
        };

        let mut patch = VideoPatch::frame(media.frame_number.saturating_add(frames));
        if patch.frame_number > Some(end) {
            if media.locked || self.state.options.loop_video {
                patch.frame_number = Some(first);
            } else {
                patch.frame_number = Some(end);
                patch.playing = Some(false);
            }
        }
        let before = media.frame_number;
        self.update(StateUpdate::media(patch));
        self.state.media.frame_number != before
    }
}
