//! The worker thread serving [`WorkerRequest`]s.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, RecvError, Sender};
use uuid::Uuid;

use super::stream::{ChunkRequest, ChunkSource, FrameStream};
use super::{DecodedChunk, FrameChunk, WorkerRequest, WorkerResponse};
use crate::config::LookerSettings;
use crate::error::{LookerError, Result};
use crate::sample::decode_sample;

/// Message sent to the worker thread.
enum Mailbox {
    /// A request with the channel its reply goes to
    Request(WorkerRequest, Sender<WorkerResponse>),
    /// Shutdown the thread
    Shutdown,
}

/// The stream owned by the worker, with where its chunks go.
struct ActiveStream {
    id: Uuid,
    stream: FrameStream,
    reply: Sender<WorkerResponse>,
    /// A chunk was asked for and not forwarded yet
    awaiting: bool,
}

/// State living on the worker thread.
struct WorkerState {
    /// Frames endpoint; decode-only workers have none
    source: Option<Arc<dyn ChunkSource>>,
    chunk_size: u32,
    high_water_mark: usize,
    active: Option<ActiveStream>,
}

/// Handle to a named worker thread.
///
/// Dropping the handle shuts the thread down and joins it.
pub struct Worker {
    name: String,
    mailbox: Sender<Mailbox>,
    thread_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("name", &self.name).finish()
    }
}

impl Worker {
    /// Spawn a worker answering `processSample` only.
    pub fn decoder(name: &str) -> Result<Self> {
        Self::start(
            name,
            WorkerState {
                source: None,
                chunk_size: 1,
                high_water_mark: 1,
                active: None,
            },
        )
    }

    /// Spawn a worker that also streams frame chunks from `source`.
    pub fn streamer(name: &str, source: Arc<dyn ChunkSource>, settings: &LookerSettings) -> Result<Self> {
        Self::start(
            name,
            WorkerState {
                source: Some(source),
                chunk_size: settings.chunk_size.max(1),
                high_water_mark: settings.high_water_mark,
                active: None,
            },
        )
    }

    fn start(name: &str, state: WorkerState) -> Result<Self> {
        let (mailbox, inbox) = channel::unbounded::<Mailbox>();
        let thread_name = name.to_owned();
        let thread_handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                log::info!("Worker '{}' started", thread_name);
                state.run(inbox);
                log::info!("Worker '{}' exiting", thread_name);
            })
            .map_err(|e| LookerError::WorkerUnavailable(format!("failed to spawn '{name}': {e}")))?;

        Ok(Self {
            name: name.to_owned(),
            mailbox,
            thread_handle: Some(thread_handle),
        })
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a request; the reply is sent on `reply`.
    pub fn post(&self, request: WorkerRequest, reply: Sender<WorkerResponse>) -> Result<()> {
        log::debug!("Posting {} to worker '{}'", request.method(), self.name);
        self.mailbox
            .send(Mailbox::Request(request, reply))
            .map_err(|_| LookerError::WorkerUnavailable(format!("worker '{}' has shut down", self.name)))
    }

    /// Parse and post a JSON request.
    ///
    /// Unknown methods are rejected here and never reach the thread.
    pub fn post_json(&self, json: &str, reply: Sender<WorkerResponse>) -> Result<()> {
        let request = WorkerRequest::from_json(json)?;
        self.post(request, reply)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        log::debug!("Shutting down worker '{}'", self.name);
        let _ = self.mailbox.send(Mailbox::Shutdown);

        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                log::warn!("Worker '{}' panicked: {:?}", self.name, e);
            }
        }
    }
}

impl WorkerState {
    /// Serve the mailbox, forwarding chunks of the active stream as they arrive.
    ///
    /// The thread never blocks on a fetch, so a new `setReader` always
    /// reaches it while the previous stream is still fetching.
    fn run(mut self, inbox: Receiver<Mailbox>) {
        loop {
            let message = match self.awaited_chunks() {
                Some(chunks) => crossbeam::select! {
                    recv(inbox) -> message => message,
                    recv(chunks) -> chunk => {
                        self.forward_chunk(chunk);
                        continue;
                    }
                },
                None => inbox.recv(),
            };
            match message {
                Ok(Mailbox::Request(request, reply)) => self.handle(request, reply),
                Ok(Mailbox::Shutdown) => {
                    log::debug!("Received shutdown signal");
                    break;
                }
                Err(_) => {
                    log::debug!("Mailbox closed, worker exiting");
                    break;
                }
            }
        }
        if let Some(mut active) = self.active.take() {
            active.stream.cancel();
        }
    }

    /// Chunk channel of the active stream, while a chunk is owed.
    fn awaited_chunks(&self) -> Option<Receiver<Result<FrameChunk>>> {
        self.active
            .as_ref()
            .filter(|active| active.awaiting)
            .and_then(|active| active.stream.chunks().cloned())
    }

    fn handle(&mut self, request: WorkerRequest, reply: Sender<WorkerResponse>) {
        match request {
            WorkerRequest::ProcessSample { sample, uuid } => {
                let result = decode_sample(sample);
                if let Err(e) = &result {
                    log::warn!("Failed to decode sample for request {}: {}", uuid, e);
                }
                if reply.send(WorkerResponse::ProcessSample { uuid, result }).is_err() {
                    log::debug!("Reply channel for {} closed", uuid);
                }
            }
            WorkerRequest::SetReader {
                origin,
                sample_id,
                frame_number,
                frame_count,
                id,
            } => {
                if let Some(mut previous) = self.active.take() {
                    log::debug!("Cancelling frame stream {}", previous.id);
                    previous.stream.cancel();
                }
                let request = ChunkRequest {
                    origin,
                    sample_id,
                    frame_number,
                    num_frames: self.chunk_size,
                    frame_count,
                };
                let opened = match &self.source {
                    Some(source) => FrameStream::open(Arc::clone(source), request, self.high_water_mark),
                    None => Err(LookerError::WorkerUnavailable("worker has no frame source".into())),
                };
                match opened {
                    Ok(stream) => {
                        self.active = Some(ActiveStream {
                            id,
                            stream,
                            reply,
                            awaiting: true,
                        });
                    }
                    Err(e) => {
                        log::error!("Failed to open frame stream {}: {}", id, e);
                        if reply.send(WorkerResponse::FrameChunk { id, result: Err(e) }).is_err() {
                            log::debug!("Reply channel for stream {} closed", id);
                        }
                    }
                }
            }
            WorkerRequest::RequestFrameChunk { id } => match self.active.as_mut() {
                Some(active) if active.id == id && !active.stream.is_closed() => active.awaiting = true,
                _ => log::debug!("Ignoring chunk request for inactive stream {}", id),
            },
        }
    }

    /// Decode a chunk received from the active stream and forward it.
    fn forward_chunk(&mut self, received: std::result::Result<Result<FrameChunk>, RecvError>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.awaiting = false;
        let result = match active.stream.accept(received) {
            Some(Ok(chunk)) => Ok(DecodedChunk::decode(chunk)),
            Some(Err(e)) => Err(e),
            None => {
                log::debug!("Frame stream {} is closed", active.id);
                return;
            }
        };
        if let Err(e) = &result {
            log::error!("Frame stream {} stalled: {}", active.id, e);
        }
        if active
            .reply
            .send(WorkerResponse::FrameChunk { id: active.id, result })
            .is_err()
        {
            log::debug!("Reply channel for stream {} closed", active.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::FakeSource;
    use serde_json::json;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn worker(source: Arc<dyn ChunkSource>) -> Worker {
        Worker::streamer("test-worker", source, &LookerSettings::default()).unwrap()
    }

    fn set_reader(sample_id: &str, id: Uuid) -> WorkerRequest {
        WorkerRequest::SetReader {
            origin: String::new(),
            sample_id: sample_id.into(),
            frame_number: 1,
            frame_count: 10,
            id,
        }
    }

    /// Holds fetches of sample "slow" until `release` is dropped.
    struct GatedSource {
        release: Receiver<()>,
        frames: FakeSource,
    }

    impl ChunkSource for GatedSource {
        fn fetch(&self, request: &ChunkRequest) -> Result<FrameChunk> {
            if request.sample_id == "slow" {
                let _ = self.release.recv();
            }
            self.frames.fetch(request)
        }
    }

    #[test]
    fn test_process_sample_echoes_uuid() {
        let worker = Worker::decoder("test-decoder").unwrap();
        let (tx, rx) = channel::unbounded();
        let uuid = Uuid::new_v4();
        let sample = json!({
            "seg": { "_cls": "Segmentation", "mask": { "shape": [1, 2], "data": [0, 1] } }
        });
        worker.post(WorkerRequest::ProcessSample { sample, uuid }, tx).unwrap();

        match rx.recv_timeout(TIMEOUT).unwrap() {
            WorkerResponse::ProcessSample { uuid: echoed, result } => {
                assert_eq!(echoed, uuid);
                assert_eq!(result.unwrap().mask_count(), 1);
            }
            other => panic!("unexpected reply {:?}", other.method()),
        }
    }

    #[test]
    fn test_post_json_rejects_unknown_method() {
        let worker = Worker::decoder("test-decoder").unwrap();
        let (tx, _rx) = channel::unbounded();
        let err = worker.post_json(r#"{ "method": "resize" }"#, tx).unwrap_err();
        assert!(matches!(err, LookerError::UnknownMethod(_)));
    }

    #[test]
    fn test_set_reader_sends_first_chunk_and_ignores_stale_requests() {
        let source = Arc::new(FakeSource::default());
        let worker = worker(source.clone());
        let (tx, rx) = channel::unbounded();
        let id = Uuid::new_v4();
        worker
            .post(
                WorkerRequest::SetReader {
                    origin: "http://frames".into(),
                    sample_id: "s".into(),
                    frame_number: 1,
                    frame_count: 100,
                    id,
                },
                tx.clone(),
            )
            .unwrap();

        match rx.recv_timeout(TIMEOUT).unwrap() {
            WorkerResponse::FrameChunk { id: echoed, result } => {
                assert_eq!(echoed, id);
                assert_eq!(result.unwrap().range, (1, 30));
            }
            other => panic!("unexpected reply {:?}", other.method()),
        }

        worker
            .post(WorkerRequest::RequestFrameChunk { id: Uuid::new_v4() }, tx.clone())
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        worker.post(WorkerRequest::RequestFrameChunk { id }, tx).unwrap();
        match rx.recv_timeout(TIMEOUT).unwrap() {
            WorkerResponse::FrameChunk { result, .. } => assert_eq!(result.unwrap().range, (31, 60)),
            other => panic!("unexpected reply {:?}", other.method()),
        }
    }

    #[test]
    fn test_transport_error_is_forwarded() {
        let source = Arc::new(FakeSource::default());
        source.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let worker = worker(source);
        let (tx, rx) = channel::unbounded();
        let id = Uuid::new_v4();
        worker
            .post(
                WorkerRequest::SetReader {
                    origin: String::new(),
                    sample_id: "s".into(),
                    frame_number: 1,
                    frame_count: 10,
                    id,
                },
                tx.clone(),
            )
            .unwrap();

        match rx.recv_timeout(TIMEOUT).unwrap() {
            WorkerResponse::FrameChunk { result, .. } => {
                assert!(matches!(result, Err(LookerError::Transport(_))));
            }
            other => panic!("unexpected reply {:?}", other.method()),
        }

        // stalled stream is closed; further requests are ignored
        worker.post(WorkerRequest::RequestFrameChunk { id }, tx).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_decoder_cannot_stream() {
        let worker = Worker::decoder("test-decoder").unwrap();
        let (tx, rx) = channel::unbounded();
        let id = Uuid::new_v4();
        worker.post(set_reader("s", id), tx).unwrap();

        match rx.recv_timeout(TIMEOUT).unwrap() {
            WorkerResponse::FrameChunk { id: echoed, result } => {
                assert_eq!(echoed, id);
                assert!(matches!(result, Err(LookerError::WorkerUnavailable(_))));
            }
            other => panic!("unexpected reply {:?}", other.method()),
        }
    }

    #[test]
    fn test_set_reader_supersedes_stream_with_fetch_in_flight() {
        let (gate, release) = channel::unbounded::<()>();
        let source = Arc::new(GatedSource {
            release,
            frames: FakeSource::default(),
        });
        let worker = worker(source);
        let (tx, rx) = channel::unbounded();
        let slow = Uuid::new_v4();
        let fast = Uuid::new_v4();
        worker.post(set_reader("slow", slow), tx.clone()).unwrap();
        worker.post(set_reader("fast", fast), tx).unwrap();

        match rx.recv_timeout(TIMEOUT).unwrap() {
            WorkerResponse::FrameChunk { id, result } => {
                assert_eq!(id, fast);
                assert_eq!(result.unwrap().range, (1, 10));
            }
            other => panic!("unexpected reply {:?}", other.method()),
        }

        // the cancelled stream never replies, even once its fetch completes
        drop(gate);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
