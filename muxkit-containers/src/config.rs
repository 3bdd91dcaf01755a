//! Muxer factory configuration files.
//!
//! A JSON document selects the backend and its options:
//!
//! ```json
//! { "backend": "mp4", "video_duration_us": 5000000 }
//! { "backend": "noop", "audio_mime_types": ["audio/mp4a-latm"], "video_mime_types": [] }
//! ```

use crate::default::DefaultMuxerFactory;
use crate::mp4::LastSampleDuration;
use crate::noop::NoOpMuxerFactory;
use crate::traits::MuxerFactory;
use muxkit_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Muxer backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// MP4 files through the default backend.
    #[default]
    Mp4,
    /// No output at all.
    Noop,
}

/// Serializable factory configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxerConfig {
    /// Backend to create.
    pub backend: Backend,
    /// Enforced video track duration in microseconds (mp4 only).
    pub video_duration_us: Option<i64>,
    /// Last sample duration policy (mp4 only).
    pub last_sample_duration: LastSampleDuration,
    /// Rewrite start-code H.264/H.265 samples with length prefixes (mp4
    /// only, on when unset).
    pub convert_annex_b: Option<bool>,
    /// Audio MIME types to report (noop only).
    pub audio_mime_types: Option<Vec<String>>,
    /// Video MIME types to report (noop only).
    pub video_mime_types: Option<Vec<String>>,
}

impl MuxerConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse muxer config: {}", e)))
    }

    /// Load a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Serialize the configuration to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize muxer config: {}", e)))
    }

    /// Create the configured factory.
    pub fn build_factory(&self) -> Result<Box<dyn MuxerFactory>> {
        debug!(backend = ?self.backend, "Building muxer factory");
        match self.backend {
            Backend::Mp4 => {
                if self.audio_mime_types.is_some() || self.video_mime_types.is_some() {
                    return Err(Error::Config(
                        "MIME type lists can only be set for the noop backend".into(),
                    ));
                }
                let mut builder =
                    DefaultMuxerFactory::builder().last_sample_duration(self.last_sample_duration);
                if let Some(duration_us) = self.video_duration_us {
                    builder = builder.video_duration_us(duration_us);
                }
                if let Some(convert) = self.convert_annex_b {
                    builder = builder.convert_annex_b(convert);
                }
                Ok(Box::new(builder.build()?))
            }
            Backend::Noop => {
                if self.video_duration_us.is_some() {
                    return Err(Error::Config(
                        "video_duration_us can only be set for the mp4 backend".into(),
                    ));
                }
                if self.last_sample_duration != LastSampleDuration::default() {
                    return Err(Error::Config(
                        "last_sample_duration can only be set for the mp4 backend".into(),
                    ));
                }
                if self.convert_annex_b.is_some() {
                    return Err(Error::Config(
                        "convert_annex_b can only be set for the mp4 backend".into(),
                    ));
                }
                Ok(Box::new(NoOpMuxerFactory::new(
                    self.audio_mime_types.clone().unwrap_or_default(),
                    self.video_mime_types.clone().unwrap_or_default(),
                )))
            }
        }
    }
}
