//! Muxer and muxer factory traits.

use muxkit_core::error::{MuxerError, MuxerResult};
use muxkit_core::format::{Format, TrackType};
use muxkit_core::metadata::MetadataEntry;
use muxkit_core::sample::{BufferInfo, TrackId};
use std::path::Path;

/// Muxer trait for writing encoded samples into one container.
///
/// A muxer starts open, accepts tracks, samples and metadata, and is closed
/// exactly once. Every operation after [`Muxer::close`] fails or is
/// rejected.
pub trait Muxer: Send {
    /// Register an elementary stream and return its id.
    ///
    /// Ids are unique per instance unless the backend documents otherwise.
    fn add_track(&mut self, format: &Format) -> MuxerResult<TrackId>;

    /// Append one encoded access unit to a track.
    ///
    /// `data` is only read during the call. The payload is the range
    /// described by `info.offset` and `info.size`.
    fn write_sample_data(&mut self, track_id: TrackId, data: &[u8], info: &BufferInfo) -> MuxerResult<()>;

    /// Attach a container-level metadata entry.
    ///
    /// Returns `true` if the entry was retained. Entries the backend cannot
    /// represent are dropped, which is never an error.
    fn add_metadata_entry(&mut self, entry: MetadataEntry) -> bool;

    /// Finalize the container and release the output.
    fn close(&mut self) -> MuxerResult<()>;
}

impl<M: Muxer + ?Sized> Muxer for Box<M> {
    fn add_track(&mut self, format: &Format) -> MuxerResult<TrackId> {
        (**self).add_track(format)
    }

    fn write_sample_data(&mut self, track_id: TrackId, data: &[u8], info: &BufferInfo) -> MuxerResult<()> {
        (**self).write_sample_data(track_id, data, info)
    }

    fn add_metadata_entry(&mut self, entry: MetadataEntry) -> bool {
        (**self).add_metadata_entry(entry)
    }

    fn close(&mut self) -> MuxerResult<()> {
        (**self).close()
    }
}

/// Creates muxers and answers capability queries for one backend.
///
/// A factory is a configuration template: every muxer it creates sees the
/// same configuration, and its capability answers never change.
pub trait MuxerFactory: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Sample MIME types accepted for `track_type`, in preference order.
    ///
    /// Empty for track types the backend has no list for.
    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String>;

    /// Check whether `mime_type` is accepted for its track type.
    fn supports_sample_mime_type(&self, mime_type: &str) -> bool {
        self.supported_sample_mime_types(TrackType::of_mime(mime_type))
            .iter()
            .any(|m| m == mime_type)
    }

    /// Open (create or truncate) the output at `path` and return an open muxer.
    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, MuxerError>;
}

impl<F: MuxerFactory + ?Sized> MuxerFactory for Box<F> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String> {
        (**self).supported_sample_mime_types(track_type)
    }

    fn supports_sample_mime_type(&self, mime_type: &str) -> bool {
        (**self).supports_sample_mime_type(mime_type)
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, MuxerError> {
        (**self).create(path)
    }
}
