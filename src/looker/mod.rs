//! Lookers: the per-sample state machine that turns state updates into redraws.
//!
//! A [`Looker`] owns a [`RenderState`], the overlays decoded for its sample and
//! a drawing surface. Every call to [`Looker::update`] runs the same pipeline:
//!
//! 1. merge the update into the state
//! 2. pluck the overlays for the current media position
//! 3. order them by cursor containment
//! 4. recompute derived geometry
//! 5. redraw, unless the host element is not measured yet
//!
//! What differs between images, single frames and videos lives behind
//! [`MediaKind`].

mod any;
pub mod frame;
pub mod image;
pub mod video;

use std::fmt::Debug;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use serde_json::Value;
use uuid::Uuid;
use web_time::Instant;

pub use any::{AnyLooker, MediaType};
pub use frame::{FrameFields, FrameLooker, FrameMedia, FramePatch};
pub use image::{ImageLooker, ImageMedia};
pub use video::{VideoFields, VideoLooker, VideoMedia, VideoPatch};

use crate::canvas::Canvas;
use crate::config::{LookerOptions, MediaConfig, OptionsPatch};
use crate::constants::{MAX_SCALE, MIN_SCALE};
use crate::error::Result;
use crate::events::{EventTarget, ListenerId, LookerEvent};
use crate::geometry::{self, BoundingBox, Coordinates, is_measured, zoom_to_content, zoom_to_cursor};
use crate::overlay::{Containment, OverlayRef, content_points, process_overlays};
use crate::sample::DecodedSample;
use crate::state::{BaseState, FieldPatch, RenderState, StateUpdate};
use crate::worker::{Services, WorkerResponse};

/// How long [`Looker::wait_for_messages`] sleeps between polls of the frame reader.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The element a looker is mounted in.
pub trait HostElement {
    /// Current box of the element in window coordinates, if laid out.
    fn bounding_box(&self) -> Option<BoundingBox>;

    /// Start reporting size changes (see [`Looker::notify_resize`]).
    fn observe(&mut self) {}

    /// Stop reporting size changes.
    fn unobserve(&mut self) {}

    /// Insert the looker's drawing surface into the element.
    fn append_surface(&mut self) {}

    /// Remove the looker's drawing surface from the element.
    fn remove_surface(&mut self) {}
}

/// Behavior specific to one kind of media.
pub trait MediaKind {
    /// Media-specific state fields.
    type Fields: Clone + Debug + PartialEq;
    /// Partial update of [`MediaKind::Fields`].
    type Patch: FieldPatch<Target = Self::Fields> + Clone + Debug;

    /// Options before the caller's overrides are applied.
    fn default_options(&self) -> LookerOptions {
        LookerOptions::default()
    }

    /// Media fields of a freshly constructed looker.
    fn initial_fields(&self, config: &MediaConfig, options: &LookerOptions) -> Self::Fields;

    /// Complete initial state.
    fn initial_state(&self, config: MediaConfig, options: OptionsPatch) -> RenderState<Self::Fields> {
        let mut resolved = self.default_options();
        resolved.apply(options);
        let base = BaseState {
            set_zoom: resolved.zoom,
            can_zoom: !config.thumbnail,
            ..BaseState::default()
        };
        let media = self.initial_fields(&config, &resolved);
        RenderState {
            config,
            options: resolved,
            base,
            media,
        }
    }

    /// Take ownership of the overlays decoded for the sample.
    fn load_overlays(&mut self, sample: &DecodedSample);

    /// Overlays to show for `state`.
    ///
    /// May adjust media fields of `state`; `previous` is the state before the
    /// update and `plucked` the overlays it showed.
    fn pluck_overlays(
        &mut self,
        services: &Services,
        state: &mut RenderState<Self::Fields>,
        previous: &RenderState<Self::Fields>,
        plucked: &[OverlayRef],
    ) -> Vec<OverlayRef>;

    /// Hook run before derived geometry is recomputed.
    fn post_process(&mut self, state: &mut RenderState<Self::Fields>, overlays: &[OverlayRef]) {
        zoom_to_overlays(&mut state.base, &state.config, overlays);
    }

    /// Media changes applied together with `overlays_prepared`.
    fn on_overlays_prepared(&mut self, _state: &RenderState<Self::Fields>) -> Self::Patch {
        Self::Patch::default()
    }

    /// Check for asynchronous progress; a returned patch is applied as an update.
    fn poll(&mut self, _services: &Services, _state: &RenderState<Self::Fields>) -> Option<Self::Patch> {
        None
    }

    /// Release shared resources held by this looker.
    fn teardown(&mut self, _services: &Services) {}
}

/// Apply a pending zoom-to-content once overlays and geometry are known.
pub(crate) fn zoom_to_overlays(base: &mut BaseState, config: &MediaConfig, overlays: &[OverlayRef]) {
    if !(base.set_zoom && base.overlays_prepared) {
        return;
    }
    let Some([_, _, width, height]) = base.window_bbox.filter(is_measured) else {
        return;
    };
    if let Some((scale, pan)) = zoom_to_content(&content_points(overlays), config.dimensions, [width, height]) {
        base.scale = scale;
        base.pan = pan;
    }
    base.set_zoom = false;
}

/// Renders one sample.
pub struct Looker<K: MediaKind> {
    kind: K,
    state: RenderState<K::Fields>,
    /// Overlays for the current media position, unordered
    plucked: Vec<OverlayRef>,
    /// Plucked overlays ordered for hit testing; drawn back to front
    current: Vec<OverlayRef>,
    canvas: Box<dyn Canvas>,
    host: Option<Box<dyn HostElement>>,
    events: EventTarget,
    services: Services,
    inbox: Sender<WorkerResponse>,
    replies: Receiver<WorkerResponse>,
    /// Correlation id of the outstanding `processSample` request
    sample_subscription: Option<Uuid>,
    resize_pending: bool,
}

impl<K: MediaKind> Debug for Looker<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Looker")
            .field("state", &self.state)
            .field("overlays", &self.current.len())
            .field("attached", &self.host.is_some())
            .finish_non_exhaustive()
    }
}

impl<K: MediaKind> Looker<K> {
    /// Create a looker and post its sample for decoding.
    ///
    /// Nothing is drawn until the looker is attached and the decoded overlays
    /// arrive through [`Looker::process_messages`].
    pub fn new(
        kind: K,
        sample: Value,
        config: MediaConfig,
        options: OptionsPatch,
        canvas: Box<dyn Canvas>,
        services: Services,
    ) -> Result<Self> {
        let state = kind.initial_state(config, options);
        let (inbox, replies) = channel::unbounded();
        let mut looker = Self {
            kind,
            state,
            plucked: Vec::new(),
            current: Vec::new(),
            canvas,
            host: None,
            events: EventTarget::new(),
            services,
            inbox,
            replies,
            sample_subscription: None,
            resize_pending: false,
        };
        looker.update_sample(sample)?;
        Ok(looker)
    }

    /// Apply a partial update and redraw.
    ///
    /// An empty update is dropped without a redraw.
    pub fn update(&mut self, update: StateUpdate<K::Patch>) {
        self.apply(update, None::<fn(&RenderState<K::Fields>, &[OverlayRef])>);
    }

    /// Apply an update computed from the current state.
    pub fn update_with<F>(&mut self, f: F)
    where
        F: FnOnce(&RenderState<K::Fields>) -> StateUpdate<K::Patch>,
    {
        let update = f(&self.state);
        self.update(update);
    }

    /// Apply an update computed from the current state, then run `on_applied`
    /// with the new state and ordered overlays before the redraw.
    pub fn update_and_then<F, C>(&mut self, f: F, on_applied: C)
    where
        F: FnOnce(&RenderState<K::Fields>) -> StateUpdate<K::Patch>,
        C: FnOnce(&RenderState<K::Fields>, &[OverlayRef]),
    {
        let update = f(&self.state);
        self.apply(update, Some(on_applied));
    }

    fn apply<C>(&mut self, update: StateUpdate<K::Patch>, on_applied: Option<C>)
    where
        C: FnOnce(&RenderState<K::Fields>, &[OverlayRef]),
    {
        if update.is_empty() && on_applied.is_none() {
            return;
        }

        let previous = self.state.clone();
        update.apply_to(&mut self.state);

        self.plucked = self
            .kind
            .pluck_overlays(&self.services, &mut self.state, &previous, &self.plucked);
        let (current, rotate) = process_overlays(self.state.view(), &self.plucked);
        self.current = current;
        self.state.base.rotate = rotate;

        let measured = self.refresh_geometry();
        self.state.base.mouse_is_on_overlay = self
            .current
            .first()
            .is_some_and(|overlay| overlay.contains_point(self.state.view()) == Containment::Content);

        if let Some(on_applied) = on_applied {
            on_applied(&self.state, &self.current);
        }
        if measured {
            self.redraw();
        } else {
            log::trace!("Skipping redraw of {}: host not measured", self.state.config.sample_id);
        }
    }

    /// Re-read the host box and recompute derived geometry.
    fn refresh_geometry(&mut self) -> bool {
        if let Some(host) = &self.host {
            self.state.base.window_bbox = host.bounding_box();
        }
        self.kind.post_process(&mut self.state, &self.current);
        geometry::post_process(&self.state.config, &mut self.state.base)
    }

    fn redraw(&mut self) {
        let base = &self.state.base;
        let canvas = self.canvas.as_mut();
        canvas.clear();
        canvas.reset_transform();
        canvas.set_line_width(base.stroke_width);
        canvas.set_font_size(base.font_size);
        canvas.translate(base.pan);
        canvas.scale(base.scale);
        for overlay in self.current.iter().rev() {
            overlay.draw(canvas, self.state.view());
        }
    }

    /// Merge option changes.
    pub fn update_options(&mut self, options: OptionsPatch) {
        self.update(StateUpdate::new().options(options));
    }

    /// Replace the sample; replies to earlier samples are discarded.
    pub fn update_sample(&mut self, sample: Value) -> Result<()> {
        let uuid = Uuid::new_v4();
        self.sample_subscription = Some(uuid);
        log::debug!("Posting sample {} as {}", self.state.config.sample_id, uuid);
        self.services.process_sample(sample, uuid, &self.inbox)
    }

    /// Handle every worker reply received so far. Never blocks.
    ///
    /// Returns the number of replies and state changes handled.
    pub fn process_messages(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(response) = self.replies.try_recv() {
            self.handle_response(response);
            handled += 1;
        }
        handled += self.services.reader().pump();
        if let Some(patch) = self.kind.poll(&self.services, &self.state) {
            self.update(StateUpdate::media(patch));
            handled += 1;
        }
        handled
    }

    /// Process messages, waiting up to `timeout` for at least one.
    pub fn wait_for_messages(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let handled = self.process_messages();
            let now = Instant::now();
            if handled > 0 || now >= deadline {
                return handled;
            }
            if let Ok(response) = self.replies.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                self.handle_response(response);
                return 1 + self.process_messages();
            }
        }
    }

    fn handle_response(&mut self, response: WorkerResponse) {
        match response {
            WorkerResponse::ProcessSample { uuid, result } if self.sample_subscription == Some(uuid) => {
                self.sample_subscription = None;
                match result {
                    Ok(sample) => {
                        log::debug!(
                            "Sample {} decoded with {} masks",
                            self.state.config.sample_id,
                            sample.mask_count()
                        );
                        self.kind.load_overlays(&sample);
                        let patch = self.kind.on_overlays_prepared(&self.state);
                        self.update(StateUpdate::media(patch).overlays_prepared(true));
                        self.events.dispatch(&LookerEvent::OverlaysPrepared);
                    }
                    Err(e) => {
                        log::error!("Failed to decode sample {}: {}", self.state.config.sample_id, e);
                        self.events.dispatch(&LookerEvent::Error(e));
                    }
                }
            }
            WorkerResponse::ProcessSample { uuid, .. } => {
                log::debug!("Discarding stale sample reply {}", uuid);
            }
            other => log::warn!("Looker ignoring unexpected {} reply", other.method()),
        }
    }

    /// Mount the looker in `host`, replacing any previous host.
    ///
    /// Geometry is computed immediately; nothing is drawn until the next update.
    pub fn attach(&mut self, host: Box<dyn HostElement>) {
        self.detach();
        self.host = Some(host);
        self.refresh_geometry();
        if let Some(host) = self.host.as_mut() {
            host.observe();
            host.append_surface();
        }
    }

    /// Unmount from the host, if attached.
    pub fn detach(&mut self) {
        if let Some(mut host) = self.host.take() {
            host.unobserve();
            host.remove_surface();
        }
    }

    /// Detach and release shared resources.
    pub fn destroy(mut self) {
        self.detach();
    }

    /// Record that the host element changed size.
    ///
    /// Calls coalesce until the next [`Looker::on_animation_frame`].
    pub fn notify_resize(&mut self) {
        self.resize_pending = true;
    }

    /// Run coalesced work. Returns whether a resize was handled.
    pub fn on_animation_frame(&mut self) -> bool {
        if !std::mem::take(&mut self.resize_pending) {
            return false;
        }
        self.update_with(|state| StateUpdate::new().loaded(state.base.loaded));
        true
    }

    /// Zoom by `factor` around `cursor` (window coordinates).
    pub fn zoom_at(&mut self, cursor: Coordinates, factor: f32) {
        let base = &self.state.base;
        if !base.can_zoom || base.disable_controls || !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let Some(window) = base.window_bbox.filter(is_measured) else {
            return;
        };
        let scale = (base.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        let local = [cursor[0] - window[0], cursor[1] - window[1]];
        let pan = zoom_to_cursor(base.scale, base.pan, scale, local);
        self.update(StateUpdate::new().cursor(cursor).scale(scale).pan(pan));
    }

    /// Subscribe to events named `name`.
    pub fn add_event_listener(
        &mut self,
        name: &str,
        handler: impl FnMut(&LookerEvent) + 'static,
    ) -> ListenerId {
        self.events.add_event_listener(name, handler)
    }

    /// Unsubscribe a listener.
    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        self.events.remove_event_listener(id)
    }

    pub(crate) fn dispatch(&mut self, event: LookerEvent) {
        self.events.dispatch(&event);
    }

    /// Current state.
    pub fn state(&self) -> &RenderState<K::Fields> {
        &self.state
    }

    /// Overlays in hit-test order (topmost first).
    pub fn overlays(&self) -> &[OverlayRef] {
        &self.current
    }

    /// Media-kind specific data.
    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Services the looker talks to.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Whether a host element is attached.
    pub fn is_attached(&self) -> bool {
        self.host.is_some()
    }
}

impl<K: MediaKind> Drop for Looker<K> {
    fn drop(&mut self) {
        self.detach();
        self.kind.teardown(&self.services);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::canvas::{DrawCommand, RecordingCanvas};
    use crate::worker::tests::{FakeSource, services};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

    /// Host with a fixed box that logs lifecycle calls.
    pub(crate) struct TestHost {
        pub(crate) bbox: Option<BoundingBox>,
        pub(crate) log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl TestHost {
        pub(crate) fn measured() -> Box<Self> {
            Box::new(Self {
                bbox: Some([0.0, 0.0, 100.0, 100.0]),
                log: Rc::default(),
            })
        }
    }

    impl HostElement for TestHost {
        fn bounding_box(&self) -> Option<BoundingBox> {
            self.bbox
        }

        fn observe(&mut self) {
            self.log.borrow_mut().push("observe");
        }

        fn unobserve(&mut self) {
            self.log.borrow_mut().push("unobserve");
        }

        fn append_surface(&mut self) {
            self.log.borrow_mut().push("append");
        }

        fn remove_surface(&mut self) {
            self.log.borrow_mut().push("remove");
        }
    }

    fn sample() -> Value {
        json!({
            "id": "img",
            "gt": {
                "_cls": "Detections",
                "detections": [
                    { "label": "cat", "bounding_box": [0.1, 0.1, 0.3, 0.3] },
                    { "label": "dog", "bounding_box": [0.5, 0.5, 0.4, 0.4] }
                ]
            }
        })
    }

    fn looker(options: OptionsPatch) -> (ImageLooker, RecordingCanvas) {
        let canvas = RecordingCanvas::new();
        let looker = Looker::new(
            ImageMedia::default(),
            sample(),
            MediaConfig::new("img", [100.0, 100.0]),
            options,
            Box::new(canvas.clone()),
            services(Arc::new(FakeSource::default())),
        )
        .unwrap();
        (looker, canvas)
    }

    /// An attached looker whose overlays have arrived.
    fn prepared() -> (ImageLooker, RecordingCanvas) {
        let (mut looker, canvas) = looker(OptionsPatch::default());
        looker.attach(TestHost::measured());
        assert!(looker.wait_for_messages(TIMEOUT) > 0);
        assert!(looker.state().base.overlays_prepared);
        (looker, canvas)
    }

    #[test]
    fn test_one_redraw_per_update() {
        let (mut looker, canvas) = prepared();
        assert_eq!(canvas.redraw_count(), 1);
        assert_eq!(looker.overlays().len(), 2);

        looker.update(StateUpdate::new());
        looker.update_with(|_| StateUpdate::new());
        assert_eq!(canvas.redraw_count(), 1);

        looker.update(StateUpdate::new().cursor([20.0, 20.0]));
        assert_eq!(canvas.redraw_count(), 2);

        let mut seen = 0;
        looker.update_and_then(
            |_| StateUpdate::new(),
            |_, overlays| seen = overlays.len(),
        );
        assert_eq!(seen, 2);
        assert_eq!(canvas.redraw_count(), 3);
    }

    #[test]
    fn test_overlays_drawn_back_to_front() {
        let (mut looker, canvas) = prepared();
        // cursor inside the cat box puts it first
        looker.update(StateUpdate::new().cursor([25.0, 25.0]));
        assert!(looker.state().base.mouse_is_on_overlay);

        let strokes: Vec<BoundingBox> = canvas
            .last_frame()
            .into_iter()
            .filter_map(|c| match c {
                DrawCommand::StrokeRect(rect, _) => Some(rect),
                _ => None,
            })
            .collect();
        assert_eq!(strokes.len(), 2);
        // the topmost overlay is stroked last
        let cat = strokes.iter().rposition(|r| (r[2] - 30.0).abs() < 1e-3);
        let dog = strokes.iter().rposition(|r| (r[2] - 40.0).abs() < 1e-3);
        assert!(cat > dog, "{strokes:?}");
    }

    #[test]
    fn test_stale_sample_reply_is_ignored() {
        let (mut looker, canvas) = prepared();
        let before = looker.state().clone();

        looker
            .inbox
            .send(WorkerResponse::ProcessSample {
                uuid: Uuid::new_v4(),
                result: Err(crate::error::LookerError::NoFragment),
            })
            .unwrap();
        let errors = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&errors);
        looker.add_event_listener(crate::events::ERROR_EVENT, move |_| *counter.borrow_mut() += 1);

        assert_eq!(looker.process_messages(), 1);
        assert_eq!(looker.state(), &before);
        assert_eq!(*errors.borrow(), 0);
        assert_eq!(canvas.redraw_count(), 1);
    }

    #[test]
    fn test_update_sample_replaces_overlays() {
        let (mut looker, canvas) = prepared();
        let prepared = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&prepared);
        looker.add_event_listener(crate::events::OVERLAYS_PREPARED_EVENT, move |_| {
            *counter.borrow_mut() += 1;
        });

        looker
            .update_sample(json!({ "kp": { "_cls": "Keypoint", "points": [[0.5, 0.5]] } }))
            .unwrap();
        assert!(looker.wait_for_messages(TIMEOUT) > 0);
        assert_eq!(*prepared.borrow(), 1);
        assert_eq!(looker.overlays().len(), 1);
        assert_eq!(looker.overlays()[0].field(), "kp");
        assert_eq!(canvas.redraw_count(), 2);
    }

    #[test]
    fn test_unmeasured_host_skips_redraw() {
        let (mut looker, canvas) = looker(OptionsPatch::default());
        looker.attach(Box::new(TestHost {
            bbox: None,
            log: Rc::default(),
        }));
        assert!(looker.wait_for_messages(TIMEOUT) > 0);
        looker.update(StateUpdate::new().cursor([1.0, 1.0]));
        assert_eq!(canvas.redraw_count(), 0);
        assert_eq!(looker.state().base.media_bbox, None);
    }

    #[test]
    fn test_attach_then_detach_order() {
        let (mut looker, canvas) = looker(OptionsPatch::default());
        let host = TestHost::measured();
        let log = Rc::clone(&host.log);

        looker.attach(host);
        assert!(looker.is_attached());
        assert_eq!(looker.state().base.media_bbox, Some([0.0, 0.0, 100.0, 100.0]));
        assert_eq!(canvas.redraw_count(), 0);

        looker.destroy();
        assert_eq!(*log.borrow(), ["observe", "append", "unobserve", "remove"]);
    }

    #[test]
    fn test_resize_is_coalesced() {
        let (mut looker, canvas) = prepared();
        looker.notify_resize();
        looker.notify_resize();
        looker.notify_resize();

        assert!(looker.on_animation_frame());
        assert!(!looker.on_animation_frame());
        assert_eq!(canvas.redraw_count(), 2);
    }

    #[test]
    fn test_zoom_keeps_point_under_cursor() {
        let (mut looker, _canvas) = prepared();
        looker.zoom_at([50.0, 50.0], 2.0);
        let base = &looker.state().base;
        assert_eq!(base.scale, 2.0);
        assert_eq!(base.pan, [-50.0, -50.0]);

        looker.zoom_at([50.0, 50.0], 100.0);
        assert_eq!(looker.state().base.scale, MAX_SCALE);
    }

    #[test]
    fn test_thumbnail_cannot_zoom() {
        let canvas = RecordingCanvas::new();
        let mut looker = Looker::new(
            ImageMedia::default(),
            sample(),
            MediaConfig::new("img", [100.0, 100.0]).thumbnail(true),
            OptionsPatch::default(),
            Box::new(canvas),
            services(Arc::new(FakeSource::default())),
        )
        .unwrap();
        looker.attach(TestHost::measured());
        looker.zoom_at([50.0, 50.0], 2.0);
        assert_eq!(looker.state().base.scale, 1.0);
    }

    #[test]
    fn test_zoom_option_frames_labels() {
        let (mut looker, _canvas) = looker(OptionsPatch {
            zoom: Some(true),
            ..OptionsPatch::default()
        });
        assert!(looker.state().base.set_zoom);
        looker.attach(TestHost::measured());
        assert!(looker.wait_for_messages(TIMEOUT) > 0);

        let base = &looker.state().base;
        assert!(!base.set_zoom);
        assert!(base.scale > 1.0);
    }
}
