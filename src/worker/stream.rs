//! Chunked frame fetching with a bounded look-ahead queue.
//!
//! A [`FrameStream`] runs a fetch thread that pulls consecutive chunks from a
//! [`ChunkSource`] into a bounded channel. When the channel holds
//! `high_water_mark` chunks the fetch thread blocks until the consumer reads
//! one, so look-ahead never exceeds that many chunks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvError, Sender};

use super::FrameChunk;
use crate::error::{LookerError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters of one chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Origin of the frames endpoint
    pub origin: String,
    /// Sample whose frames are requested
    pub sample_id: String,
    /// First frame of the chunk
    pub frame_number: u32,
    /// Frames requested
    pub num_frames: u32,
    /// Total frames of the video
    pub frame_count: u32,
}

/// Something that can serve frame chunks.
pub trait ChunkSource: Send + Sync {
    /// Fetch one chunk. The returned range may be shorter than requested.
    fn fetch(&self, request: &ChunkRequest) -> Result<FrameChunk>;
}

/// Frames endpoint over HTTP:
/// `GET {origin}/frames?frameNumber&numFrames&frameCount&sampleId`.
#[derive(Debug, Clone)]
pub struct HttpChunkSource {
    agent: ureq::Agent,
}

impl HttpChunkSource {
    /// Create a source with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(CONNECT_TIMEOUT)
                .timeout_read(READ_TIMEOUT)
                .build(),
        }
    }
}

impl Default for HttpChunkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkSource for HttpChunkSource {
    fn fetch(&self, request: &ChunkRequest) -> Result<FrameChunk> {
        let url = format!("{}/frames", request.origin.trim_end_matches('/'));
        log::debug!(
            "Fetching frames {}+{} of {} for {}",
            request.frame_number,
            request.num_frames,
            request.frame_count,
            request.sample_id
        );

        let response = self
            .agent
            .get(&url)
            .query("frameNumber", &request.frame_number.to_string())
            .query("numFrames", &request.num_frames.to_string())
            .query("frameCount", &request.frame_count.to_string())
            .query("sampleId", &request.sample_id)
            .call()
            .map_err(|e| LookerError::transport(format!("GET {url}: {e}")))?;

        serde_json::from_reader(response.into_reader())
            .map_err(|e| LookerError::transport(format!("invalid chunk from {url}: {e}")))
    }
}

/// A cancellable stream of chunks starting at one frame.
pub struct FrameStream {
    receiver: Option<Receiver<Result<FrameChunk>>>,
    cancelled: Arc<AtomicBool>,
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FrameStream {
    /// Start fetching from `request.frame_number` onwards.
    pub fn open(source: Arc<dyn ChunkSource>, request: ChunkRequest, high_water_mark: usize) -> Result<Self> {
        let (sender, receiver) = channel::bounded(high_water_mark.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancelled);
        thread::Builder::new()
            .name("frame-stream".to_string())
            .spawn(move || Self::fetch_loop(source.as_ref(), request, &sender, &flag))
            .map_err(|e| LookerError::WorkerUnavailable(format!("failed to spawn frame stream: {e}")))?;

        Ok(Self {
            receiver: Some(receiver),
            cancelled,
        })
    }

    fn fetch_loop(
        source: &dyn ChunkSource,
        request: ChunkRequest,
        sender: &Sender<Result<FrameChunk>>,
        cancelled: &AtomicBool,
    ) {
        let mut next = request.frame_number;

        while !cancelled.load(Ordering::Acquire) && next <= request.frame_count {
            let chunk_request = ChunkRequest {
                frame_number: next,
                ..request.clone()
            };
            match source.fetch(&chunk_request).and_then(FrameChunk::normalized) {
                Ok(chunk) => {
                    next = (chunk.range.1 + 1).max(next + 1);
                    // blocks while the queue is full
                    if sender.send(Ok(chunk)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Frame fetch failed for {}: {}", request.sample_id, e);
                    let _ = sender.send(Err(e));
                    break;
                }
            }
        }
        log::debug!("Frame stream for {} finished at frame {}", request.sample_id, next);
    }

    /// Block until the next chunk is available.
    ///
    /// Returns `None` once the stream is closed. An error closes the stream.
    pub fn read(&mut self) -> Option<Result<FrameChunk>> {
        let received = self.receiver.as_ref()?.recv();
        self.accept(received)
    }

    /// Channel the chunks arrive on, while the stream is open.
    ///
    /// Whatever is received from it must be passed to [`FrameStream::accept`].
    pub fn chunks(&self) -> Option<&Receiver<Result<FrameChunk>>> {
        self.receiver.as_ref()
    }

    /// Take a message received from [`FrameStream::chunks`].
    ///
    /// An error or a finished fetch thread closes the stream.
    pub fn accept(&mut self, received: std::result::Result<Result<FrameChunk>, RecvError>) -> Option<Result<FrameChunk>> {
        if self.receiver.is_none() {
            return None;
        }
        match received {
            Ok(Ok(chunk)) => Some(Ok(chunk)),
            Ok(Err(e)) => {
                self.receiver = None;
                Some(Err(e))
            }
            Err(_) => {
                self.receiver = None;
                None
            }
        }
    }

    /// Whether the stream can yield no more chunks.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Stop fetching and close the stream.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        self.receiver = None;
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::FakeSource;

    fn request(frame_number: u32, frame_count: u32) -> ChunkRequest {
        ChunkRequest {
            origin: "http://frames".into(),
            sample_id: "s".into(),
            frame_number,
            num_frames: 30,
            frame_count,
        }
    }

    #[test]
    fn test_stream_reads_consecutive_chunks_then_closes() {
        let source = Arc::new(FakeSource::default());
        let mut stream = FrameStream::open(source.clone(), request(1, 70), 2).unwrap();

        let ranges: Vec<(u32, u32)> = std::iter::from_fn(|| stream.read())
            .map(|chunk| chunk.unwrap().range)
            .collect();
        assert_eq!(ranges, [(1, 30), (31, 60), (61, 70)]);
        assert!(stream.is_closed());

        let starts: Vec<u32> = source.request_log().iter().map(|r| r.frame_number).collect();
        assert_eq!(starts, [1, 31, 61]);
    }

    #[test]
    fn test_cancel_closes_stream() {
        let mut stream = FrameStream::open(Arc::new(FakeSource::default()), request(1, 1000), 1).unwrap();
        assert!(stream.read().is_some());
        stream.cancel();
        assert!(stream.is_closed());
        assert!(stream.read().is_none());
    }

    #[test]
    fn test_nothing_to_fetch_past_frame_count() {
        let source = Arc::new(FakeSource::default());
        let mut stream = FrameStream::open(source.clone(), request(11, 10), 1).unwrap();
        assert!(stream.read().is_none());
        assert!(source.request_log().is_empty());
    }
}
