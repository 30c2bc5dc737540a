//! Consumer side of the frame stream.
//!
//! The [`FrameReader`] lives on the UI thread. It opens streams on the stream
//! worker, caches every received frame, forwards frames to the looker that
//! subscribed, and decides whether to ask for the next chunk.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use uuid::Uuid;

use super::{DecodedChunk, Worker, WorkerRequest, WorkerResponse};
use crate::cache::FrameCache;
use crate::config::LookerSettings;
use crate::error::Result;
use crate::sample::DecodedPayload;

/// A decoded frame handed to a subscribing looker.
#[derive(Debug, Clone)]
pub struct FrameDelivery {
    /// Stream subscription the frame belongs to
    pub id: Uuid,
    /// Frame number
    pub frame_number: u32,
    /// Decoded frame labels
    pub payload: Arc<DecodedPayload>,
}

/// Who wants frames, and from where.
#[derive(Debug, Clone)]
pub struct FrameSubscriber {
    /// Sample whose frames are streamed
    pub sample_id: String,
    /// First frame to stream
    pub frame_number: u32,
    /// Total frames of the video
    pub frame_count: u32,
    /// Where decoded frames are sent
    pub sink: Sender<FrameDelivery>,
    /// Playback position of the subscriber, read to bound look-ahead
    pub current_frame: Arc<AtomicU32>,
}

#[derive(Debug)]
struct Subscription {
    id: Uuid,
    subscriber: FrameSubscriber,
    /// Frames received since the subscription started
    stream_count: u32,
}

/// Process-wide frame reader; at most one subscription is live.
#[derive(Debug)]
pub struct FrameReader {
    worker: Arc<Worker>,
    origin: String,
    cache: FrameCache,
    replies: (Sender<WorkerResponse>, Receiver<WorkerResponse>),
    subscription: Option<Subscription>,
}

impl FrameReader {
    /// Create a reader driving `worker`.
    pub fn new(worker: Arc<Worker>, settings: &LookerSettings) -> Self {
        Self {
            worker,
            origin: settings.origin.clone(),
            cache: FrameCache::new(settings.frame_cache_size),
            replies: channel::unbounded(),
            subscription: None,
        }
    }

    /// Start streaming for `subscriber`, superseding any live subscription.
    ///
    /// Returns the new stream id.
    pub fn acquire(&mut self, subscriber: FrameSubscriber) -> Result<Uuid> {
        let id = Uuid::new_v4();
        if let Some(previous) = self.subscription.take() {
            log::debug!("Stream {} superseded by {}", previous.id, id);
        }
        log::debug!(
            "Acquiring frame reader {} for {} from frame {}",
            id,
            subscriber.sample_id,
            subscriber.frame_number
        );

        self.worker.post(
            WorkerRequest::SetReader {
                origin: self.origin.clone(),
                sample_id: subscriber.sample_id.clone(),
                frame_number: subscriber.frame_number,
                frame_count: subscriber.frame_count,
                id,
            },
            self.replies.0.clone(),
        )?;
        self.subscription = Some(Subscription {
            id,
            subscriber,
            stream_count: 0,
        });
        Ok(id)
    }

    /// Drop the subscription `id` if it is still live.
    pub fn release(&mut self, id: Uuid) {
        if self.subscription.as_ref().is_some_and(|s| s.id == id) {
            log::debug!("Releasing frame reader {}", id);
            self.subscription = None;
        }
    }

    /// Id of the live subscription.
    pub fn current_id(&self) -> Option<Uuid> {
        self.subscription.as_ref().map(|s| s.id)
    }

    /// Handle every reply already received. Never blocks.
    ///
    /// Returns the number of replies handled.
    pub fn pump(&mut self) -> usize {
        let pending: Vec<WorkerResponse> = self.replies.1.try_iter().collect();
        let handled = pending.len();
        for response in pending {
            self.handle(response);
        }
        handled
    }

    /// Wait up to `timeout` for a reply, then handle everything received.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.replies.1.recv_timeout(timeout) {
            Ok(response) => {
                self.handle(response);
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Cached payload of a frame, if any.
    pub fn cached(&mut self, sample_id: &str, frame_number: u32) -> Option<Arc<DecodedPayload>> {
        self.cache.get(sample_id, frame_number)
    }

    /// The frame cache.
    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub(crate) fn handle(&mut self, response: WorkerResponse) {
        match response {
            WorkerResponse::FrameChunk { id, result } => {
                let Some(subscription) = self.subscription.as_mut().filter(|s| s.id == id) else {
                    log::debug!("Discarding chunk of stale stream {}", id);
                    return;
                };
                match result {
                    Ok(chunk) => {
                        let request_more = Self::accept(&mut self.cache, subscription, chunk);
                        if request_more {
                            if let Err(e) = self
                                .worker
                                .post(WorkerRequest::RequestFrameChunk { id }, self.replies.0.clone())
                            {
                                log::error!("Failed to request next chunk of {}: {}", id, e);
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("Frame stream {} stalled: {}", id, e);
                        // the worker closed the stream; the next acquire starts over
                        self.subscription = None;
                    }
                }
            }
            other => log::warn!("Frame reader ignoring unexpected {} reply", other.method()),
        }
    }

    /// Cache and forward a chunk. Returns whether the next chunk should be requested.
    fn accept(cache: &mut FrameCache, subscription: &mut Subscription, chunk: DecodedChunk) -> bool {
        let subscriber = &subscription.subscriber;
        for (frame_number, payload) in chunk.frames {
            cache.insert(&subscriber.sample_id, frame_number, Arc::clone(&payload));
            subscription.stream_count += 1;
            let delivery = FrameDelivery {
                id: subscription.id,
                frame_number,
                payload,
            };
            if subscriber.sink.send(delivery).is_err() {
                log::debug!("Subscriber of stream {} went away", subscription.id);
            }
        }

        let (_, end) = chunk.range;
        let current = subscriber.current_frame.load(Ordering::Acquire);
        i64::from(subscription.stream_count) < i64::from(end) - i64::from(current)
            && end < subscriber.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::decode_frame;
    use crate::worker::tests::{FakeSource, services};
    use std::collections::BTreeMap;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn subscriber(frame_count: u32) -> (FrameSubscriber, Receiver<FrameDelivery>) {
        let (sink, frames) = channel::unbounded();
        let subscriber = FrameSubscriber {
            sample_id: "sample".into(),
            frame_number: 1,
            frame_count,
            sink,
            current_frame: Arc::new(AtomicU32::new(1)),
        };
        (subscriber, frames)
    }

    #[test]
    fn test_short_video_is_fetched_in_one_chunk() {
        let source = Arc::new(FakeSource::default());
        let services = services(Arc::clone(&source));
        let (subscriber, frames) = subscriber(10);

        let mut reader = services.reader();
        reader.acquire(subscriber).unwrap();
        assert_eq!(reader.pump_timeout(TIMEOUT), 1);

        let requests = source.request_log();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].num_frames, 30);
        assert_eq!(requests[0].frame_number, 1);
        assert_eq!(requests[0].frame_count, 10);

        for n in 1..=10 {
            assert!(reader.cache().contains("sample", n), "frame {n} missing");
        }
        assert!(!reader.cache().contains("sample", 11));
        assert_eq!(frames.try_iter().count(), 10);
    }

    #[test]
    fn test_stale_chunks_are_discarded() {
        let services = services(Arc::default());
        let (subscriber, frames) = subscriber(10);
        let mut reader = services.reader();
        reader.subscription = Some(Subscription {
            id: Uuid::new_v4(),
            subscriber,
            stream_count: 0,
        });

        let payload = Arc::new(decode_frame(serde_json::json!({})).unwrap());
        reader.handle(WorkerResponse::FrameChunk {
            id: Uuid::new_v4(),
            result: Ok(DecodedChunk {
                frames: BTreeMap::from([(1, payload)]),
                range: (1, 1),
            }),
        });

        assert!(reader.cache().is_empty());
        assert!(frames.try_recv().is_err());
    }

    #[test]
    fn test_look_ahead_is_bounded_by_playback_position() {
        let (subscriber, _frames) = subscriber(300);
        let mut subscription = Subscription {
            id: Uuid::new_v4(),
            subscriber,
            stream_count: 0,
        };
        let mut cache = FrameCache::new(100);
        let chunk = |start: u32, end: u32| DecodedChunk {
            frames: (start..=end).map(|n| (n, Arc::new(DecodedPayload::empty()))).collect(),
            range: (start, end),
        };

        // 30 frames streamed, playback at frame 1, chunk ends at 30
        assert!(!FrameReader::accept(&mut cache, &mut subscription, chunk(1, 30)));

        // a later session far behind the chunk end keeps streaming
        subscription.stream_count = 0;
        subscription.subscriber.current_frame.store(1, Ordering::Release);
        assert!(FrameReader::accept(&mut cache, &mut subscription, chunk(61, 70)));

        // never past the last frame
        subscription.stream_count = 0;
        assert!(!FrameReader::accept(&mut cache, &mut subscription, chunk(291, 300)));
    }

    #[test]
    fn test_release_only_matching_subscription() {
        let services = services(Arc::default());
        let (subscriber, _frames) = subscriber(10);
        let mut reader = services.reader();
        let id = reader.acquire(subscriber).unwrap();

        reader.release(Uuid::new_v4());
        assert_eq!(reader.current_id(), Some(id));
        reader.release(id);
        assert_eq!(reader.current_id(), None);
    }

    #[test]
    fn test_stalled_stream_is_released() {
        let source = Arc::new(FakeSource::default());
        source.fail.store(true, Ordering::SeqCst);
        let services = services(Arc::clone(&source));
        let (subscriber, frames) = subscriber(10);
        let mut reader = services.reader();
        reader.acquire(subscriber.clone()).unwrap();

        assert_eq!(reader.pump_timeout(TIMEOUT), 1);
        assert_eq!(reader.current_id(), None);
        assert!(frames.try_recv().is_err());

        source.fail.store(false, Ordering::SeqCst);
        let id = reader.acquire(subscriber).unwrap();
        assert_eq!(reader.pump_timeout(TIMEOUT), 1);
        assert_eq!(reader.current_id(), Some(id));
        assert_eq!(frames.try_iter().count(), 10);
    }
}
