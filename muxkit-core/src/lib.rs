//! # Muxkit Core
//!
//! Core types shared by every muxkit component.
//!
//! This crate provides the value types that cross the muxer boundary:
//! - Error handling types
//! - Track formats and the sample MIME type registry
//! - Sample timing and flags
//! - Container-level metadata entries
//! - Encoder settings passed through alongside tracks
//! - Speed curves and the timestamp adjustment stage

pub mod error;
pub mod format;
pub mod sample;
pub mod metadata;
pub mod encoder;
pub mod speed;
pub mod effect;

pub use error::{Error, MuxerError, MuxerResult, Result};
pub use format::{mime, Format, TrackType};
pub use sample::{BufferInfo, SampleFlags, TrackId};
pub use metadata::{MdtaValue, MetadataEntry};
pub use encoder::{BitrateMode, EncoderSettings, EncoderSettingsBuilder, NO_VALUE};
pub use speed::{
    duration_after_speed_provider_applied, ConstantSpeedProvider, SegmentSpeedProvider,
    SpeedProvider,
};
pub use effect::{TimestampAdjustment, VideoEffect};
