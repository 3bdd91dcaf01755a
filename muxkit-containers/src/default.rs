//! Default muxer backend.
//!
//! Delegates every call to an MP4 muxer. The factory adds the options
//! that are applied to every muxer it creates, such as an enforced video
//! track duration.

use crate::mp4::{LastSampleDuration, Mp4MuxerConfig, Mp4MuxerFactory};
use crate::traits::{Muxer, MuxerFactory};
use muxkit_core::error::{MuxerError, MuxerResult, Result};
use muxkit_core::format::{Format, TrackType};
use muxkit_core::metadata::MetadataEntry;
use muxkit_core::sample::{BufferInfo, TrackId};
use std::path::Path;

/// Factory for [`DefaultMuxer`].
#[derive(Debug, Clone, Default)]
pub struct DefaultMuxerFactory {
    inner: Mp4MuxerFactory,
}

impl DefaultMuxerFactory {
    /// Create a factory with no enforced duration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a factory.
    pub fn builder() -> DefaultMuxerFactoryBuilder {
        DefaultMuxerFactoryBuilder::default()
    }

    /// Enforced video track duration in microseconds, if any.
    pub fn video_duration_us(&self) -> Option<i64> {
        self.inner.config().video_duration_us
    }
}

impl MuxerFactory for DefaultMuxerFactory {
    fn name(&self) -> &str {
        "default"
    }

    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String> {
        self.inner.supported_sample_mime_types(track_type)
    }

    fn create(&self, path: &Path) -> std::result::Result<Box<dyn Muxer>, MuxerError> {
        let muxer = self.inner.create(path)?;
        Ok(Box::new(DefaultMuxer { inner: muxer }))
    }
}

/// Builder for [`DefaultMuxerFactory`].
#[derive(Debug, Clone, Default)]
pub struct DefaultMuxerFactoryBuilder {
    config: Mp4MuxerConfig,
}

impl DefaultMuxerFactoryBuilder {
    /// Make every video track end at exactly `duration_us`.
    ///
    /// Samples presented at or after it are dropped. Only meaningful once
    /// a video track is added; audio tracks are unaffected.
    #[must_use]
    pub fn video_duration_us(mut self, duration_us: i64) -> Self {
        self.config.video_duration_us = Some(duration_us);
        self
    }

    /// Set the last sample duration policy.
    #[must_use]
    pub fn last_sample_duration(mut self, policy: LastSampleDuration) -> Self {
        self.config.last_sample_duration = policy;
        self
    }

    /// Enable or disable Annex-B to length-prefixed sample conversion for
    /// H.264 and H.265 tracks. Enabled by default.
    #[must_use]
    pub fn convert_annex_b(mut self, enabled: bool) -> Self {
        self.config.convert_annex_b = enabled;
        self
    }

    /// Build the factory.
    ///
    /// Fails if the enforced duration is negative.
    pub fn build(self) -> Result<DefaultMuxerFactory> {
        Ok(DefaultMuxerFactory {
            inner: Mp4MuxerFactory::new(self.config)?,
        })
    }
}

/// A muxer forwarding every call to the wrapped backend.
pub struct DefaultMuxer {
    inner: Box<dyn Muxer>,
}

impl Muxer for DefaultMuxer {
    fn add_track(&mut self, format: &Format) -> MuxerResult<TrackId> {
        self.inner.add_track(format)
    }

    fn write_sample_data(&mut self, track_id: TrackId, data: &[u8], info: &BufferInfo) -> MuxerResult<()> {
        self.inner.write_sample_data(track_id, data, info)
    }

    fn add_metadata_entry(&mut self, entry: MetadataEntry) -> bool {
        self.inner.add_metadata_entry(entry)
    }

    fn close(&mut self) -> MuxerResult<()> {
        self.inner.close()
    }
}
