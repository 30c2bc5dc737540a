//! Global constants for the looker renderer

/// Base label font size in screen pixels (divided by zoom scale)
pub const FONT_SIZE: f32 = 16.0;

/// Base overlay stroke width in screen pixels (divided by zoom scale)
pub const STROKE_WIDTH: f32 = 3.0;

/// Padding around label text in screen pixels
pub const PAD: f32 = 3.0;

/// Base keypoint radius in screen pixels
pub const POINT_RADIUS: f32 = 2.0;

/// Maximum number of raw decoded frames kept in the process-wide frame cache
pub const MAX_FRAME_CACHE_SIZE: usize = 500;

/// Maximum number of per-frame overlay sets kept by one video looker
pub const MAX_PREFETCH_FRAMES: usize = 1024;

/// Number of frames requested from the frames endpoint per chunk
pub const CHUNK_SIZE: u32 = 30;

/// Number of fetched chunks that may wait in the stream queue before fetching pauses
pub const HIGH_WATER_MARK: usize = 6;

/// Default frames endpoint origin
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5151";

/// Upper bound for zoom scale
pub const MAX_SCALE: f32 = 20.0;

/// Lower bound for zoom scale
pub const MIN_SCALE: f32 = 1.0;

/// Fraction of the viewport that zoom-to-content fills with the label bounds
pub const ZOOM_CONTENT_MARGIN: f32 = 0.9;

/// Field prefix for labels decoded from a frame payload
pub const FRAME_FIELD_PREFIX: &str = "frames.";
