//! Configuration for lookers and the shared streaming services.
//!
//! Three layers of configuration exist:
//! - [`MediaConfig`]: per-looker, fixed at construction (dimensions, sample id, frame rate)
//! - [`LookerOptions`]: per-looker display toggles, changed through [`OptionsPatch`]
//! - [`LookerSettings`]: process-wide settings for the decode/stream workers

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CHUNK_SIZE, DEFAULT_ORIGIN, HIGH_WATER_MARK, MAX_FRAME_CACHE_SIZE, MAX_PREFETCH_FRAMES,
};
use crate::error::Result;
use crate::geometry::Dimensions;

/// Log level setting for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Immutable per-looker media configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    /// Identifier of the sample being rendered
    pub sample_id: String,
    /// Media width and height in pixels
    pub dimensions: Dimensions,
    /// Video frame rate (frames per second)
    #[serde(default)]
    pub frame_rate: Option<f32>,
    /// Total number of frames, when known up front
    #[serde(default)]
    pub frame_count: Option<u32>,
    /// Whether the looker renders a grid thumbnail
    #[serde(default)]
    pub thumbnail: bool,
    /// Inclusive frame range a video is locked to, if any
    #[serde(default)]
    pub support: Option<(u32, u32)>,
}

impl MediaConfig {
    /// Create a config for still media.
    pub fn new(sample_id: impl Into<String>, dimensions: Dimensions) -> Self {
        Self {
            sample_id: sample_id.into(),
            dimensions,
            frame_rate: None,
            frame_count: None,
            thumbnail: false,
            support: None,
        }
    }

    /// Set the frame rate.
    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Set the total frame count.
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = Some(frame_count);
        self
    }

    /// Mark the looker as a thumbnail.
    pub fn thumbnail(mut self, thumbnail: bool) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    /// Lock a video to an inclusive frame range.
    pub fn with_support(mut self, first: u32, last: u32) -> Self {
        self.support = Some((first, last));
        self
    }

    /// Video duration in seconds, when frame rate and count are known.
    pub fn duration(&self) -> Option<f32> {
        match (self.frame_count, self.frame_rate) {
            (Some(count), Some(rate)) if rate > 0.0 => Some(count as f32 / rate),
            _ => None,
        }
    }
}

/// Display toggles of a looker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LookerOptions {
    /// Label fields to render, in z-order. `None` renders every field.
    pub active_paths: Option<Vec<String>>,
    /// Draw label names next to overlays
    pub show_label: bool,
    /// Append confidences to label names
    pub show_confidence: bool,
    /// Zoom to label content once overlays are prepared
    pub zoom: bool,
    /// Restart video playback at the end
    pub loop_video: bool,
    /// Start video playback as soon as overlays are prepared
    pub autoplay: bool,
    /// Stream missing frames during playback outside thumbnails too
    pub stream_while_playing: bool,
}

impl Default for LookerOptions {
    fn default() -> Self {
        Self {
            active_paths: None,
            show_label: true,
            show_confidence: false,
            zoom: false,
            loop_video: false,
            autoplay: false,
            stream_while_playing: false,
        }
    }
}

impl LookerOptions {
    /// Whether a label field is rendered under these options.
    pub fn is_active(&self, field: &str) -> bool {
        match &self.active_paths {
            None => true,
            Some(paths) => paths.iter().any(|p| p == field),
        }
    }

    /// Merge a partial update into these options.
    pub fn apply(&mut self, patch: OptionsPatch) {
        if let Some(active_paths) = patch.active_paths {
            self.active_paths = active_paths;
        }
        if let Some(show_label) = patch.show_label {
            self.show_label = show_label;
        }
        if let Some(show_confidence) = patch.show_confidence {
            self.show_confidence = show_confidence;
        }
        if let Some(zoom) = patch.zoom {
            self.zoom = zoom;
        }
        if let Some(loop_video) = patch.loop_video {
            self.loop_video = loop_video;
        }
        if let Some(autoplay) = patch.autoplay {
            self.autoplay = autoplay;
        }
        if let Some(stream_while_playing) = patch.stream_while_playing {
            self.stream_while_playing = stream_while_playing;
        }
    }
}

/// Partial update of [`LookerOptions`]; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsPatch {
    /// Replacement for `active_paths`
    pub active_paths: Option<Option<Vec<String>>>,
    /// Replacement for `show_label`
    pub show_label: Option<bool>,
    /// Replacement for `show_confidence`
    pub show_confidence: Option<bool>,
    /// Replacement for `zoom`
    pub zoom: Option<bool>,
    /// Replacement for `loop_video`
    pub loop_video: Option<bool>,
    /// Replacement for `autoplay`
    pub autoplay: Option<bool>,
    /// Replacement for `stream_while_playing`
    pub stream_while_playing: Option<bool>,
}

impl OptionsPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Current settings file format version.
pub const SETTINGS_VERSION: u32 = 1;

/// Process-wide settings for the shared decode and stream workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookerSettings {
    /// Version of the settings file format
    pub version: u32,
    /// Origin of the frames endpoint, e.g. `http://localhost:5151`
    pub origin: String,
    /// Frames requested per chunk
    pub chunk_size: u32,
    /// Fetched chunks queued before the fetcher pauses
    pub high_water_mark: usize,
    /// Capacity of the raw frame cache
    pub frame_cache_size: usize,
    /// Capacity of each video looker's overlay arena
    pub prefetch_capacity: usize,
    /// Log verbosity level
    pub log_level: LogLevel,
}

impl Default for LookerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            origin: DEFAULT_ORIGIN.to_string(),
            chunk_size: CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            frame_cache_size: MAX_FRAME_CACHE_SIZE,
            prefetch_capacity: MAX_PREFETCH_FRAMES,
            log_level: LogLevel::default(),
        }
    }
}

impl LookerSettings {
    /// Parse settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        if settings.version != SETTINGS_VERSION {
            log::warn!(
                "Settings version {} differs from supported version {}",
                settings.version,
                SETTINGS_VERSION
            );
        }
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize settings to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Initialize `env_logger` at the configured level.
///
/// Safe to call more than once; later calls are ignored.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging(level: LogLevel) {
    let _ = env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings = LookerSettings::from_json(r#"{ "origin": "http://frames" }"#).unwrap();
        assert_eq!(settings.origin, "http://frames");
        assert_eq!(settings.chunk_size, CHUNK_SIZE);
        assert_eq!(settings.high_water_mark, HIGH_WATER_MARK);
        assert_eq!(settings.log_level, LogLevel::Info);
    }

    #[test]
    fn test_settings_json_roundtrip() {
        let settings = LookerSettings {
            log_level: LogLevel::Debug,
            chunk_size: 12,
            ..LookerSettings::default()
        };
        let parsed = LookerSettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_log_level_filters() {
        assert_eq!(LogLevel::Warn.to_level_filter(), log::LevelFilter::Warn);
        assert_eq!(LogLevel::Trace.to_level_filter(), log::LevelFilter::Trace);
    }

    #[test]
    fn test_media_config_camel_case() {
        let config: MediaConfig = serde_json::from_str(
            r#"{ "sampleId": "abc", "dimensions": [640, 480], "frameRate": 30, "thumbnail": true }"#,
        )
        .unwrap();
        assert_eq!(config.sample_id, "abc");
        assert_eq!(config.dimensions, [640.0, 480.0]);
        assert_eq!(config.frame_rate, Some(30.0));
        assert_eq!(config.frame_count, None);
        assert_eq!(config.support, None);
        assert!(config.thumbnail);
        assert_eq!(config.clone().with_frame_count(60).duration(), Some(2.0));
    }

    #[test]
    fn test_options_patch_merges_fieldwise() {
        let mut options = LookerOptions::default();
        options.apply(OptionsPatch {
            show_confidence: Some(true),
            active_paths: Some(Some(vec!["ground_truth".into()])),
            ..OptionsPatch::default()
        });
        assert!(options.show_label);
        assert!(options.show_confidence);
        assert!(options.is_active("ground_truth"));
        assert!(!options.is_active("predictions"));
        assert!(OptionsPatch::default().is_empty());
    }
}
