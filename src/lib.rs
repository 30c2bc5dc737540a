//! Looker - state-driven media renderer
//!
//! Draws label overlays (classifications, detections, keypoints, segmentation
//! masks) on top of images, single frames and videos. Sample decoding and
//! frame streaming run on worker threads; video frames are cached and
//! prefetched so playback only shows frames whose labels are resident.

pub mod cache;
pub mod canvas;
pub mod color;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod geometry;
pub mod looker;
pub mod overlay;
pub mod sample;
pub mod state;
pub mod worker;

pub use canvas::{Canvas, RasterCanvas, RecordingCanvas};
pub use config::{LookerOptions, LookerSettings, MediaConfig, OptionsPatch};
#[cfg(not(target_arch = "wasm32"))]
pub use config::init_logging;
pub use error::{LookerError, Result};
pub use events::{ERROR_EVENT, LookerEvent, OVERLAYS_PREPARED_EVENT};
pub use looker::{AnyLooker, HostElement, ImageLooker, Looker, MediaKind, MediaType, VideoLooker};
pub use state::{RenderState, StateUpdate};
pub use worker::Services;
