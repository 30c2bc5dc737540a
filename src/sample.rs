//! Decoding of raw sample and frame payloads into typed labels.
//!
//! Payloads arrive as JSON objects whose label fields carry a `_cls` tag
//! (`Detection`, `Detections`, `Classification`, ...). Decoding runs on a
//! worker thread: masks are unpacked into [`MaskBuffer`]s there and the
//! decoded payload is moved to the renderer without copying pixel data.
//!
//! Mask JSON layout: `{"shape": [height, width], "data": [u8, ...]}` in row-major order.

use std::sync::Arc;

use ndarray::Array2;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::constants::FRAME_FIELD_PREFIX;
use crate::error::{LookerError, Result};
use crate::geometry::{BoundingBox, Coordinates};

/// Label classes the overlay model knows how to render.
pub const KNOWN_LABEL_CLASSES: &[&str] = &[
    "Classification",
    "Classifications",
    "Detection",
    "Detections",
    "Keypoint",
    "Keypoints",
    "Segmentation",
];

/// Key under which video samples carry their first frame.
const FRAMES_KEY: &str = "frames";

/// Shared, immutable 8-bit mask.
///
/// Cloning shares the underlying buffer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMask")]
pub struct MaskBuffer(Arc<Array2<u8>>);

#[derive(Deserialize)]
struct RawMask {
    shape: [usize; 2],
    data: Vec<u8>,
}

impl TryFrom<RawMask> for MaskBuffer {
    type Error = LookerError;

    fn try_from(raw: RawMask) -> Result<Self> {
        Self::from_raw(raw.shape, raw.data)
    }
}

impl MaskBuffer {
    /// Wrap an existing array.
    pub fn new(array: Array2<u8>) -> Self {
        Self(Arc::new(array))
    }

    /// Build a mask from `[height, width]` and row-major bytes.
    pub fn from_raw(shape: [usize; 2], data: Vec<u8>) -> Result<Self> {
        let [height, width] = shape;
        let len = data.len();
        Array2::from_shape_vec((height, width), data)
            .map(Self::new)
            .map_err(|_| {
                LookerError::unsupported(format!(
                    "mask of shape {height}x{width} cannot hold {len} bytes"
                ))
            })
    }

    /// Mask height in pixels.
    pub fn height(&self) -> usize {
        self.0.nrows()
    }

    /// Mask width in pixels.
    pub fn width(&self) -> usize {
        self.0.ncols()
    }

    /// Borrow the underlying array.
    pub fn array(&self) -> &Array2<u8> {
        &self.0
    }

    /// Nearest mask value at a relative position (0..1 on both axes).
    pub fn sample(&self, relative: Coordinates) -> u8 {
        let [rx, ry] = relative;
        if !(0.0..1.0).contains(&rx) || !(0.0..1.0).contains(&ry) {
            return 0;
        }
        let col = ((rx * self.width() as f32) as usize).min(self.width().saturating_sub(1));
        let row = ((ry * self.height() as f32) as usize).min(self.height().saturating_sub(1));
        self.0.get((row, col)).copied().unwrap_or(0)
    }

    /// Whether two handles share the same buffer.
    pub fn shares_buffer(&self, other: &MaskBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A single classification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassificationLabel {
    /// Class name
    #[serde(default)]
    pub label: Option<String>,
    /// Prediction confidence
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// An object detection with a relative bounding box and optional instance mask.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionLabel {
    /// Class name
    #[serde(default)]
    pub label: Option<String>,
    /// Prediction confidence
    #[serde(default)]
    pub confidence: Option<f32>,
    /// `[x, y, width, height]` relative to the media
    pub bounding_box: BoundingBox,
    /// Instance mask spanning the bounding box
    #[serde(default)]
    pub mask: Option<MaskBuffer>,
}

/// A set of relative keypoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeypointLabel {
    /// Class name
    #[serde(default)]
    pub label: Option<String>,
    /// Prediction confidence
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Points relative to the media
    #[serde(default)]
    pub points: Vec<Coordinates>,
}

/// A semantic segmentation mask spanning the whole media.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SegmentationLabel {
    /// Per-pixel class mask
    pub mask: MaskBuffer,
}

/// A decoded label value, tagged by `_cls`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "_cls")]
pub enum Label {
    /// Single classification
    Classification(ClassificationLabel),
    /// List of classifications
    Classifications {
        /// The classifications
        classifications: Vec<ClassificationLabel>,
    },
    /// Single detection
    Detection(DetectionLabel),
    /// List of detections
    Detections {
        /// The detections
        detections: Vec<DetectionLabel>,
    },
    /// Single keypoint set
    Keypoint(KeypointLabel),
    /// List of keypoint sets
    Keypoints {
        /// The keypoint sets
        keypoints: Vec<KeypointLabel>,
    },
    /// Segmentation mask
    Segmentation(SegmentationLabel),
}

impl Label {
    /// Number of mask buffers carried by this label.
    pub fn mask_count(&self) -> usize {
        match self {
            Label::Detection(d) => usize::from(d.mask.is_some()),
            Label::Detections { detections } => detections.iter().filter(|d| d.mask.is_some()).count(),
            Label::Segmentation(_) => 1,
            _ => 0,
        }
    }
}

/// A label with the field path it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelField {
    /// Field path, `frames.`-prefixed for frame labels
    pub path: String,
    /// The decoded label
    pub label: Label,
}

/// Decoded labels of one sample or one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPayload {
    /// Labels in field-name order
    pub labels: Vec<LabelField>,
}

impl DecodedPayload {
    /// A payload without labels (placeholder for frames the server omitted).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the payload has no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of mask buffers across all labels.
    pub fn mask_count(&self) -> usize {
        self.labels.iter().map(|f| f.label.mask_count()).sum()
    }
}

/// A decoded sample: sample-level labels plus the decoded first frame, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedSample {
    /// Sample id, when the payload carries one
    pub id: Option<String>,
    /// Sample-level labels
    pub sample: DecodedPayload,
    /// Labels of frame 1 (videos only)
    pub first_frame: Option<DecodedPayload>,
}

impl DecodedSample {
    /// Number of mask buffers across sample and first frame.
    pub fn mask_count(&self) -> usize {
        self.sample.mask_count() + self.first_frame.as_ref().map_or(0, DecodedPayload::mask_count)
    }
}

/// Decode a whole sample payload.
///
/// The `frames` field is not decoded as a label; its frame `1` entry becomes
/// [`DecodedSample::first_frame`] with `frames.`-prefixed field paths.
pub fn decode_sample(sample: Value) -> Result<DecodedSample> {
    let Value::Object(mut fields) = sample else {
        return Err(LookerError::unsupported("sample payload must be a JSON object"));
    };

    let id = fields
        .get("id")
        .or_else(|| fields.get("_id"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let first_frame = match fields.remove(FRAMES_KEY) {
        Some(Value::Object(mut frames)) => match frames.remove("1") {
            Some(frame) => Some(decode_frame(frame)?),
            None => None,
        },
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(LookerError::unsupported(format!(
                "unexpected frames value: {}",
                type_name(&other)
            )));
        }
    };

    let decoded = DecodedSample {
        id,
        sample: decode_fields(fields, "")?,
        first_frame,
    };
    log::debug!(
        "Decoded sample {:?}: {} labels, {} masks",
        decoded.id,
        decoded.sample.labels.len(),
        decoded.mask_count()
    );
    Ok(decoded)
}

/// Decode a single frame payload; field paths are `frames.`-prefixed.
///
/// `null` decodes to an empty payload.
pub fn decode_frame(frame: Value) -> Result<DecodedPayload> {
    match frame {
        Value::Object(fields) => decode_fields(fields, FRAME_FIELD_PREFIX),
        Value::Null => Ok(DecodedPayload::empty()),
        other => Err(LookerError::unsupported(format!(
            "frame payload must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn decode_fields(fields: Map<String, Value>, prefix: &str) -> Result<DecodedPayload> {
    let mut labels = Vec::new();

    for (name, value) in fields {
        let Some(cls) = value.get("_cls").and_then(Value::as_str) else {
            continue;
        };
        if !KNOWN_LABEL_CLASSES.contains(&cls) {
            log::debug!("Skipping field '{}' with unsupported label class '{}'", name, cls);
            continue;
        }

        let path = format!("{prefix}{name}");
        let label = serde_json::from_value::<Label>(value)
            .map_err(|e| LookerError::unsupported(format!("field '{path}': {e}")))?;
        labels.push(LabelField { path, label });
    }

    Ok(DecodedPayload { labels })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_sample_labels_and_first_frame() {
        let sample = json!({
            "id": "s1",
            "filepath": "/data/a.mp4",
            "ground_truth": {
                "_cls": "Detections",
                "detections": [
                    { "label": "cat", "bounding_box": [0.1, 0.1, 0.2, 0.2] },
                    { "label": "dog", "bounding_box": [0.5, 0.5, 0.2, 0.2],
                      "mask": { "shape": [2, 2], "data": [0, 1, 1, 0] } }
                ]
            },
            "frames": {
                "1": {
                    "frame_number": 1,
                    "people": { "_cls": "Keypoints", "keypoints": [ { "points": [[0.1, 0.2]] } ] }
                }
            }
        });

        let decoded = decode_sample(sample).unwrap();
        assert_eq!(decoded.id.as_deref(), Some("s1"));
        assert_eq!(decoded.sample.labels.len(), 1);
        assert_eq!(decoded.sample.labels[0].path, "ground_truth");
        assert_eq!(decoded.mask_count(), 1);

        let frame = decoded.first_frame.unwrap();
        assert_eq!(frame.labels.len(), 1);
        assert_eq!(frame.labels[0].path, "frames.people");
    }

    #[test]
    fn test_unknown_label_classes_are_skipped() {
        let decoded = decode_sample(json!({
            "lines": { "_cls": "Polylines", "polylines": [] },
            "weather": { "_cls": "Classification", "label": "sunny" }
        }))
        .unwrap();
        assert_eq!(decoded.sample.labels.len(), 1);
        assert_eq!(decoded.sample.labels[0].path, "weather");
    }

    #[test]
    fn test_mask_shape_mismatch_is_unsupported_data() {
        let err = decode_sample(json!({
            "seg": { "_cls": "Segmentation", "mask": { "shape": [3, 3], "data": [1, 2] } }
        }))
        .unwrap_err();
        assert!(matches!(err, LookerError::UnsupportedData(_)));
    }

    #[test]
    fn test_non_object_payloads_are_rejected() {
        assert!(decode_sample(json!([1, 2, 3])).is_err());
        assert!(decode_frame(json!("frame")).is_err());
        assert!(decode_frame(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_mask_sampling() {
        let mask = MaskBuffer::from_raw([2, 2], vec![0, 1, 2, 3]).unwrap();
        assert_eq!(mask.sample([0.25, 0.25]), 0);
        assert_eq!(mask.sample([0.75, 0.25]), 1);
        assert_eq!(mask.sample([0.25, 0.75]), 2);
        assert_eq!(mask.sample([0.75, 0.75]), 3);
        assert_eq!(mask.sample([1.5, 0.5]), 0);

        let shared = mask.clone();
        assert!(shared.shares_buffer(&mask));
    }
}
