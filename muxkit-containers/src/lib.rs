//! Container muxers.
//!
//! A [`MuxerFactory`] reports which sample MIME types it accepts and
//! creates [`Muxer`] instances bound to an output path. Three backends are
//! provided:
//!
//! - [`Mp4MuxerFactory`] writes ISO base media files directly.
//! - [`DefaultMuxerFactory`] delegates to the MP4 backend and can enforce a
//!   fixed video track duration.
//! - [`NoOpMuxerFactory`] accepts everything and produces no output.
//!
//! [`MuxerConfig`] selects and configures a backend from JSON, and
//! [`with_muxer`] scopes a muxer so that it is always closed.

pub mod config;
pub mod default;
pub mod mp4;
pub mod noop;
pub mod scoped;
pub mod traits;

pub use config::{Backend, MuxerConfig};
pub use default::{DefaultMuxer, DefaultMuxerFactory, DefaultMuxerFactoryBuilder};
pub use mp4::{
    LastSampleDuration, Mp4Brand, Mp4Info, Mp4Muxer, Mp4MuxerConfig, Mp4MuxerFactory, Mp4TrackInfo,
};
pub use noop::{NoOpMuxer, NoOpMuxerFactory};
pub use scoped::with_muxer;
pub use traits::{Muxer, MuxerFactory};
