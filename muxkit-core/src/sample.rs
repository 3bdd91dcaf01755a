//! Encoded sample metadata.
//!
//! A muxer receives each access unit as a borrowed byte buffer plus a
//! [`BufferInfo`] describing where the payload sits and how it is timed.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Flags for sample properties.
    ///
    /// Values match the ones platform encoders attach to their output
    /// buffers, so they can be passed through unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SampleFlags: u32 {
        /// The sample is a sync sample (keyframe).
        const KEY_FRAME = 0x0001;
        /// The sample carries codec configuration, not media data.
        const CODEC_CONFIG = 0x0002;
        /// The sample marks the end of the stream.
        const END_OF_STREAM = 0x0004;
        /// The sample holds only part of a frame.
        const PARTIAL_FRAME = 0x0008;
    }
}

/// Handle for a track registered on a muxer.
///
/// Only meaningful for the muxer instance that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

impl TrackId {
    /// Get the raw id.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Get the id as an index into a track list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timing and layout of one encoded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    /// Sample flags.
    pub flags: SampleFlags,
    /// Offset of the payload in the buffer.
    pub offset: usize,
    /// Payload size in bytes.
    pub size: usize,
}

impl BufferInfo {
    /// Create info for a payload that starts at offset zero.
    pub fn new(presentation_time_us: i64, size: usize, flags: SampleFlags) -> Self {
        Self {
            presentation_time_us,
            flags,
            offset: 0,
            size,
        }
    }

    /// Info for an empty end-of-stream marker at the given time.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(presentation_time_us, 0, SampleFlags::END_OF_STREAM)
    }

    /// Set the payload offset.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Check if this is a keyframe.
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(SampleFlags::KEY_FRAME)
    }

    /// Check if this marks the end of the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }

    /// Check if this carries codec configuration.
    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(SampleFlags::CODEC_CONFIG)
    }

    /// Get the payload described by this info, or `None` if the range does
    /// not fit in `buffer`.
    pub fn payload<'a>(&self, buffer: &'a [u8]) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(self.size)?;
        buffer.get(self.offset..end)
    }
}
