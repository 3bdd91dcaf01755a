//! Muxer backend that performs no I/O.
//!
//! Useful for probing format negotiation or for pipelines with output
//! disabled. The factory reports caller-supplied MIME type lists.

use crate::traits::{Muxer, MuxerFactory};
use muxkit_core::error::{MuxerError, MuxerResult};
use muxkit_core::format::{Format, TrackType};
use muxkit_core::metadata::MetadataEntry;
use muxkit_core::sample::{BufferInfo, TrackId};
use std::path::Path;
use tracing::{debug, warn};

/// Factory for [`NoOpMuxer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoOpMuxerFactory {
    audio_mime_types: Vec<String>,
    video_mime_types: Vec<String>,
}

impl NoOpMuxerFactory {
    /// Create a factory that reports the given lists for audio and video.
    pub fn new<A, V>(audio_mime_types: A, video_mime_types: V) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self {
            audio_mime_types: audio_mime_types.into_iter().map(Into::into).collect(),
            video_mime_types: video_mime_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl MuxerFactory for NoOpMuxerFactory {
    fn name(&self) -> &str {
        "noop"
    }

    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String> {
        match track_type {
            TrackType::Audio => self.audio_mime_types.clone(),
            TrackType::Video => self.video_mime_types.clone(),
            _ => Vec::new(),
        }
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, MuxerError> {
        debug!(path = %path.display(), "Creating no-op muxer");
        Ok(Box::new(NoOpMuxer::new()))
    }
}

/// A muxer that discards everything it is given.
#[derive(Debug, Default)]
pub struct NoOpMuxer {
    closed: bool,
}

impl NoOpMuxer {
    /// Track id returned for every track.
    pub const TRACK_ID: TrackId = TrackId(0);

    /// Create an open no-op muxer.
    pub fn new() -> Self {
        Self { closed: false }
    }

    /// Whether [`Muxer::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Muxer for NoOpMuxer {
    fn add_track(&mut self, _format: &Format) -> MuxerResult<TrackId> {
        if self.closed {
            return Err(MuxerError::add_track("muxer is closed"));
        }
        Ok(Self::TRACK_ID)
    }

    fn write_sample_data(&mut self, _track_id: TrackId, _data: &[u8], info: &BufferInfo) -> MuxerResult<()> {
        if self.closed {
            return Err(MuxerError::write(info.presentation_time_us, info.size, "muxer is closed"));
        }
        Ok(())
    }

    fn add_metadata_entry(&mut self, entry: MetadataEntry) -> bool {
        if self.closed {
            warn!(kind = entry.kind(), "Metadata entry rejected, muxer is closed");
        }
        false
    }

    fn close(&mut self) -> MuxerResult<()> {
        if self.closed {
            return Err(MuxerError::close("muxer is already closed"));
        }
        self.closed = true;
        Ok(())
    }
}
