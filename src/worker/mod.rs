//! Off-thread sample decoding and frame streaming.
//!
//! Two long-lived workers serve every looker in the process:
//! - the decode worker answers `processSample` requests
//! - the stream worker owns the single active [`stream::FrameStream`] and
//!   answers `setReader` / `requestFrameChunk`
//!
//! Both speak the same [`WorkerRequest`] / [`WorkerResponse`] protocol over
//! `crossbeam` mailboxes. Every request carries a correlation id and every
//! reply echoes it; consumers discard replies whose id is no longer current.

pub mod reader;
pub mod stream;
mod thread;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use reader::{FrameDelivery, FrameReader, FrameSubscriber};
pub use stream::{ChunkRequest, ChunkSource, FrameStream, HttpChunkSource};
pub use thread::Worker;

use crate::config::LookerSettings;
use crate::error::{LookerError, Result};
use crate::sample::{DecodedPayload, DecodedSample, decode_frame};

/// Methods understood by the workers.
pub const METHODS: &[&str] = &["processSample", "setReader", "requestFrameChunk"];

/// A request posted to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerRequest {
    /// Decode a sample payload
    ProcessSample {
        /// Raw sample JSON
        sample: Value,
        /// Correlation id echoed in the reply
        uuid: Uuid,
    },
    /// Replace the active frame stream
    SetReader {
        /// Origin of the frames endpoint
        origin: String,
        /// Sample whose frames are streamed
        sample_id: String,
        /// First frame to fetch
        frame_number: u32,
        /// Total frames of the video
        frame_count: u32,
        /// Stream id echoed in every chunk
        id: Uuid,
    },
    /// Ask for the next chunk of the active stream
    RequestFrameChunk {
        /// Stream id the caller believes is live
        id: Uuid,
    },
}

impl WorkerRequest {
    /// Parse a request, rejecting unknown methods.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| LookerError::malformed("missing method"))?;
        if !METHODS.contains(&method) {
            return Err(LookerError::UnknownMethod(method.to_owned()));
        }
        serde_json::from_value(value).map_err(|e| LookerError::malformed(e.to_string()))
    }

    /// Protocol name of the request's method.
    pub fn method(&self) -> &'static str {
        match self {
            WorkerRequest::ProcessSample { .. } => "processSample",
            WorkerRequest::SetReader { .. } => "setReader",
            WorkerRequest::RequestFrameChunk { .. } => "requestFrameChunk",
        }
    }
}

/// A reply from a worker.
#[derive(Debug)]
pub enum WorkerResponse {
    /// Result of `processSample`
    ProcessSample {
        /// Correlation id of the request
        uuid: Uuid,
        /// Decoded sample, or why it could not be decoded
        result: Result<DecodedSample>,
    },
    /// A chunk of the stream `id`
    FrameChunk {
        /// Stream id the chunk belongs to
        id: Uuid,
        /// Decoded frames, or the transport error that stalled the stream
        result: Result<DecodedChunk>,
    },
}

impl WorkerResponse {
    /// Protocol name of the reply's method.
    pub fn method(&self) -> &'static str {
        match self {
            WorkerResponse::ProcessSample { .. } => "processSample",
            WorkerResponse::FrameChunk { .. } => "frameChunk",
        }
    }
}

/// A chunk as returned by the frames endpoint.
///
/// After [`FrameChunk::normalized`], `range` is inclusive and every frame in
/// it has an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameChunk {
    /// Frame number -> raw frame payload
    pub frames: BTreeMap<u32, Value>,
    /// Inclusive `[start, end]`
    pub range: (u32, u32),
}

impl FrameChunk {
    /// Fill missing frames with empty placeholders and drop frames outside `range`.
    pub fn normalized(mut self) -> Result<Self> {
        let (start, end) = self.range;
        if start > end {
            return Err(LookerError::malformed(format!("invalid chunk range [{start}, {end}]")));
        }
        self.frames.retain(|n, _| (start..=end).contains(n));
        for n in start..=end {
            self.frames
                .entry(n)
                .or_insert_with(|| Value::Object(Default::default()));
        }
        Ok(self)
    }

    /// Number of frames in `range`.
    pub fn span(&self) -> usize {
        let (start, end) = self.range;
        (end.saturating_sub(start) + 1) as usize
    }
}

/// A chunk whose frames have been decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    /// Frame number -> decoded payload
    pub frames: BTreeMap<u32, Arc<DecodedPayload>>,
    /// Inclusive `[start, end]`
    pub range: (u32, u32),
}

impl DecodedChunk {
    /// Decode every frame of a normalized chunk.
    ///
    /// A frame that fails to decode is replaced by an empty one so the rest
    /// of the chunk stays playable.
    pub fn decode(chunk: FrameChunk) -> Self {
        let frames = chunk
            .frames
            .into_iter()
            .map(|(n, frame)| {
                let payload = decode_frame(frame).unwrap_or_else(|e| {
                    log::warn!("Replacing undecodable frame {} with an empty one: {}", n, e);
                    DecodedPayload::empty()
                });
                (n, Arc::new(payload))
            })
            .collect();
        Self {
            frames,
            range: chunk.range,
        }
    }
}

/// The workers and frame reader shared by lookers.
#[derive(Clone)]
pub struct Services {
    decode: Arc<Worker>,
    stream: Arc<Worker>,
    reader: Arc<Mutex<FrameReader>>,
    settings: Arc<LookerSettings>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("origin", &self.settings.origin)
            .finish_non_exhaustive()
    }
}

static SHARED: OnceLock<Services> = OnceLock::new();

impl Services {
    /// Start a decode worker, a stream worker and a frame reader.
    pub fn start(source: Arc<dyn ChunkSource>, settings: LookerSettings) -> Result<Self> {
        let decode = Arc::new(Worker::decoder("looker-decode")?);
        let stream = Arc::new(Worker::streamer("looker-stream", source, &settings)?);
        let reader = FrameReader::new(Arc::clone(&stream), &settings);

        Ok(Self {
            decode,
            stream,
            reader: Arc::new(Mutex::new(reader)),
            settings: Arc::new(settings),
        })
    }

    /// The process-wide services, started over HTTP on first use.
    pub fn shared() -> Result<Self> {
        Self::shared_with(LookerSettings::default())
    }

    /// The process-wide services; `settings` apply only if they are not running yet.
    pub fn shared_with(settings: LookerSettings) -> Result<Self> {
        if let Some(services) = SHARED.get() {
            return Ok(services.clone());
        }
        let services = Self::start(Arc::new(HttpChunkSource::new()), settings)?;
        Ok(SHARED.get_or_init(|| services).clone())
    }

    /// Settings the services were started with.
    pub fn settings(&self) -> &LookerSettings {
        &self.settings
    }

    /// Post a `processSample` request to the decode worker.
    pub fn process_sample(&self, sample: Value, uuid: Uuid, reply: &crossbeam::channel::Sender<WorkerResponse>) -> Result<()> {
        self.decode
            .post(WorkerRequest::ProcessSample { sample, uuid }, reply.clone())
    }

    /// Handle to the stream worker.
    pub fn stream_worker(&self) -> &Arc<Worker> {
        &self.stream
    }

    /// Lock the frame reader.
    ///
    /// Only the UI thread takes this lock.
    pub fn reader(&self) -> MutexGuard<'_, FrameReader> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory frames endpoint: frame `n` carries one classification
    /// labelled `"frame-n"`.
    #[derive(Debug, Default)]
    pub(crate) struct FakeSource {
        pub(crate) requests: Mutex<Vec<ChunkRequest>>,
        pub(crate) fail: AtomicBool,
    }

    impl FakeSource {
        pub(crate) fn request_log(&self) -> Vec<ChunkRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ChunkSource for FakeSource {
        fn fetch(&self, request: &ChunkRequest) -> Result<FrameChunk> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(LookerError::transport("connection refused"));
            }
            let start = request.frame_number;
            let end = (start + request.num_frames - 1).min(request.frame_count);
            let frames = (start..=end)
                .map(|n| {
                    (
                        n,
                        json!({ "weather": { "_cls": "Classification", "label": format!("frame-{n}") } }),
                    )
                })
                .collect();
            Ok(FrameChunk {
                frames,
                range: (start, end),
            })
        }
    }

    pub(crate) fn services(source: Arc<FakeSource>) -> Services {
        Services::start(source, LookerSettings::default()).unwrap()
    }

    #[test]
    fn test_request_json_uses_method_tag() {
        let id = Uuid::new_v4();
        let request = WorkerRequest::SetReader {
            origin: "http://localhost".into(),
            sample_id: "s".into(),
            frame_number: 1,
            frame_count: 10,
            id,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "setReader");
        assert_eq!(json["sampleId"], "s");
        assert_eq!(json["frameCount"], 10);

        let parsed = WorkerRequest::from_json(&json.to_string()).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.method(), "setReader");
    }

    #[test]
    fn test_unknown_method_is_protocol_error() {
        let err = WorkerRequest::from_json(r#"{ "method": "frobnicate", "id": "x" }"#).unwrap_err();
        assert!(matches!(err, LookerError::UnknownMethod(ref m) if m == "frobnicate"));
        assert!(err.is_protocol());

        let err = WorkerRequest::from_json(r#"{ "uuid": "x" }"#).unwrap_err();
        assert!(matches!(err, LookerError::MalformedMessage { .. }));
    }

    #[test]
    fn test_chunk_normalization_fills_placeholders() {
        let chunk = FrameChunk {
            frames: BTreeMap::from([(2, json!({ "a": 1 })), (9, json!({}))]),
            range: (1, 4),
        }
        .normalized()
        .unwrap();

        let (start, end) = chunk.range;
        assert_eq!((end - start + 1) as usize, chunk.frames.len());
        assert_eq!(chunk.span(), 4);
        for n in start..=end {
            assert!(chunk.frames.contains_key(&n));
        }
        assert_eq!(chunk.frames[&2], json!({ "a": 1 }));
        assert_eq!(chunk.frames[&3], json!({}));
        assert!(!chunk.frames.contains_key(&9));
    }

    #[test]
    fn test_chunk_parses_string_keys() {
        let chunk: FrameChunk =
            serde_json::from_str(r#"{ "frames": { "1": {}, "2": {} }, "range": [1, 2] }"#).unwrap();
        assert_eq!(chunk.frames.len(), 2);
        assert!(
            FrameChunk {
                frames: BTreeMap::new(),
                range: (5, 4)
            }
            .normalized()
            .is_err()
        );
    }

    #[test]
    fn test_decoded_chunk_keeps_range() {
        let chunk = FakeSource::default()
            .fetch(&ChunkRequest {
                origin: String::new(),
                sample_id: "s".into(),
                frame_number: 3,
                num_frames: 2,
                frame_count: 10,
            })
            .unwrap();
        let decoded = DecodedChunk::decode(chunk);
        assert_eq!(decoded.range, (3, 4));
        assert_eq!(decoded.frames[&3].labels[0].path, "frames.weather");
    }

    #[test]
    fn test_corrupt_frame_does_not_spoil_chunk() {
        let chunk = FrameChunk {
            frames: BTreeMap::from([
                (1, json!({ "weather": { "_cls": "Classification", "label": "sunny" } })),
                (2, json!("truncated")),
                (3, json!({ "weather": { "_cls": "Classification", "label": "rain" } })),
            ]),
            range: (1, 3),
        };
        let decoded = DecodedChunk::decode(chunk);
        assert_eq!(decoded.frames.len(), 3);
        assert!(decoded.frames[&2].labels.is_empty());
        assert_eq!(decoded.frames[&1].labels.len(), 1);
        assert_eq!(decoded.frames[&3].labels.len(), 1);
    }
}
