//! MP4/ISOBMFF muxer backend.
//!
//! Writes progressive (non-fragmented) MP4 files with H.264, H.265, VP9
//! or AV1 video and AAC or Opus audio, and reads back the headers it
//! produces.

mod annexb;
mod atoms;
pub mod inspect;
mod metadata;
mod muxer;

pub use atoms::AtomHeader;
pub use inspect::{Mp4Info, Mp4TrackInfo};
pub use muxer::Mp4Muxer;

use crate::traits::{Muxer, MuxerFactory};
use muxkit_core::error::{Error, MuxerError, Result};
use muxkit_core::format::{mime, TrackType};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// Timescale of the movie header and track headers.
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Timescale of video tracks.
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Maximum number of consecutive samples of one track in a chunk.
pub const MAX_SAMPLES_PER_CHUNK: usize = 10;

/// Video sample MIME types the MP4 backend accepts, in preference order.
pub const SUPPORTED_VIDEO_MIME_TYPES: &[&str] = &[
    mime::VIDEO_H264,
    mime::VIDEO_H265,
    mime::VIDEO_AV1,
    mime::VIDEO_VP9,
];

/// Audio sample MIME types the MP4 backend accepts, in preference order.
pub const SUPPORTED_AUDIO_MIME_TYPES: &[&str] = &[mime::AUDIO_AAC, mime::AUDIO_OPUS];

/// MP4 brand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mp4Brand {
    /// ISO Base Media File.
    #[default]
    Isom,
    /// ISO Base Media File version 2.
    Iso2,
    /// AVC file.
    Avc1,
    /// MP4 version 1.
    Mp41,
    /// MP4 version 2.
    Mp42,
}

impl Mp4Brand {
    /// Parse brand from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Option<Self> {
        match bytes {
            b"isom" => Some(Mp4Brand::Isom),
            b"iso2" => Some(Mp4Brand::Iso2),
            b"avc1" => Some(Mp4Brand::Avc1),
            b"mp41" => Some(Mp4Brand::Mp41),
            b"mp42" => Some(Mp4Brand::Mp42),
            _ => None,
        }
    }

    /// Convert to bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        match self {
            Mp4Brand::Isom => *b"isom",
            Mp4Brand::Iso2 => *b"iso2",
            Mp4Brand::Avc1 => *b"avc1",
            Mp4Brand::Mp41 => *b"mp41",
            Mp4Brand::Mp42 => *b"mp42",
        }
    }
}

/// Sample entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEntryType {
    /// AVC/H.264.
    Avc1,
    /// HEVC/H.265.
    Hvc1,
    /// VP9.
    Vp09,
    /// AV1.
    Av01,
    /// AAC.
    Mp4a,
    /// Opus.
    Opus,
}

impl SampleEntryType {
    /// Sample entry for a sample MIME type, if the backend supports it.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        match mime_type {
            mime::VIDEO_H264 => Some(SampleEntryType::Avc1),
            mime::VIDEO_H265 => Some(SampleEntryType::Hvc1),
            mime::VIDEO_VP9 => Some(SampleEntryType::Vp09),
            mime::VIDEO_AV1 => Some(SampleEntryType::Av01),
            mime::AUDIO_AAC => Some(SampleEntryType::Mp4a),
            mime::AUDIO_OPUS => Some(SampleEntryType::Opus),
            _ => None,
        }
    }

    /// Convert to bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        match self {
            SampleEntryType::Avc1 => *b"avc1",
            SampleEntryType::Hvc1 => *b"hvc1",
            SampleEntryType::Vp09 => *b"vp09",
            SampleEntryType::Av01 => *b"av01",
            SampleEntryType::Mp4a => *b"mp4a",
            SampleEntryType::Opus => *b"Opus",
        }
    }

    /// Type of the decoder configuration atom that carries the codec
    /// specific data verbatim. AAC and Opus build theirs instead.
    pub fn config_box_type(&self) -> Option<[u8; 4]> {
        match self {
            SampleEntryType::Avc1 => Some(*b"avcC"),
            SampleEntryType::Hvc1 => Some(*b"hvcC"),
            SampleEntryType::Vp09 => Some(*b"vpcC"),
            SampleEntryType::Av01 => Some(*b"av1C"),
            SampleEntryType::Mp4a | SampleEntryType::Opus => None,
        }
    }

    /// Check if samples are NAL units with 4-byte length prefixes.
    pub fn is_nal_length_prefixed(&self) -> bool {
        matches!(self, SampleEntryType::Avc1 | SampleEntryType::Hvc1)
    }

    /// Check if this is a video type.
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            SampleEntryType::Avc1 | SampleEntryType::Hvc1 | SampleEntryType::Vp09 | SampleEntryType::Av01
        )
    }
}

/// Duration given to the last sample of a track that has no end of stream
/// marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastSampleDuration {
    /// The last sample lasts zero ticks.
    Zero,
    /// The last sample lasts as long as the one before it.
    #[default]
    DuplicatePrevious,
}

/// Configuration shared by every muxer a [`Mp4MuxerFactory`] creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp4MuxerConfig {
    /// When set, every video track ends this long after the presentation
    /// start (the earliest first sample across tracks).
    pub video_duration_us: Option<i64>,
    /// Last sample duration policy.
    pub last_sample_duration: LastSampleDuration,
    /// Major brand written to `ftyp`.
    pub brand: Mp4Brand,
    /// Rewrite start-code delimited H.264/H.265 samples with length
    /// prefixes before writing them.
    pub convert_annex_b: bool,
}

impl Default for Mp4MuxerConfig {
    fn default() -> Self {
        Self {
            video_duration_us: None,
            last_sample_duration: LastSampleDuration::default(),
            brand: Mp4Brand::default(),
            convert_annex_b: true,
        }
    }
}

impl Mp4MuxerConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        match self.video_duration_us {
            Some(d) if d < 0 => Err(Error::invalid_param(format!(
                "video duration must not be negative, got {} us",
                d
            ))),
            _ => Ok(()),
        }
    }
}

/// Factory for [`Mp4Muxer`] writing to files.
#[derive(Debug, Clone, Default)]
pub struct Mp4MuxerFactory {
    config: Mp4MuxerConfig,
}

impl Mp4MuxerFactory {
    /// Create a factory with the given configuration.
    pub fn new(config: Mp4MuxerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration applied to every muxer.
    pub fn config(&self) -> &Mp4MuxerConfig {
        &self.config
    }
}

impl MuxerFactory for Mp4MuxerFactory {
    fn name(&self) -> &str {
        "mp4"
    }

    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String> {
        let list = match track_type {
            TrackType::Video => SUPPORTED_VIDEO_MIME_TYPES,
            TrackType::Audio => SUPPORTED_AUDIO_MIME_TYPES,
            _ => &[],
        };
        list.iter().map(|m| m.to_string()).collect()
    }

    fn create(&self, path: &Path) -> std::result::Result<Box<dyn Muxer>, MuxerError> {
        let open_failed = |source| MuxerError::OpenFailed {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(open_failed)?;
        let muxer = Mp4Muxer::new(BufWriter::new(file), self.config).map_err(open_failed)?;
        debug!(path = %path.display(), "Created MP4 muxer");
        Ok(Box::new(muxer))
    }
}

/// Read a 16-bit big-endian integer.
fn read_u16_be(data: &[u8]) -> Result<u16> {
    match data.get(..2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(Error::Container("Not enough data for u16".into())),
    }
}

/// Read a 32-bit big-endian integer.
fn read_u32_be(data: &[u8]) -> Result<u32> {
    match data.get(..4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(Error::Container("Not enough data for u32".into())),
    }
}

/// Read a 64-bit big-endian integer.
fn read_u64_be(data: &[u8]) -> Result<u64> {
    match data.get(..8) {
        Some(b) => Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
        None => Err(Error::Container("Not enough data for u64".into())),
    }
}

/// Write a 32-bit big-endian integer.
fn write_u32_be(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Write a 64-bit big-endian integer.
fn write_u64_be(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}
