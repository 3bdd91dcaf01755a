//! Track type, sample MIME type and track format definitions.

use std::fmt;

/// Sample MIME types understood by the bundled backends.
pub mod mime {
    /// H.264 / AVC video.
    pub const VIDEO_H264: &str = "video/avc";
    /// H.265 / HEVC video.
    pub const VIDEO_H265: &str = "video/hevc";
    /// AV1 video.
    pub const VIDEO_AV1: &str = "video/av01";
    /// VP9 video.
    pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
    /// VP8 video.
    pub const VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
    /// H.263 video.
    pub const VIDEO_H263: &str = "video/3gpp";
    /// MPEG-4 part 2 video.
    pub const VIDEO_MP4V: &str = "video/mp4v-es";
    /// AAC audio (any profile).
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    /// Opus audio.
    pub const AUDIO_OPUS: &str = "audio/opus";
    /// Vorbis audio.
    pub const AUDIO_VORBIS: &str = "audio/vorbis";
    /// AMR narrow band audio.
    pub const AUDIO_AMR_NB: &str = "audio/3gpp";
    /// AMR wide band audio.
    pub const AUDIO_AMR_WB: &str = "audio/amr-wb";
    /// Raw PCM audio.
    pub const AUDIO_RAW: &str = "audio/raw";
    /// WebVTT text.
    pub const TEXT_VTT: &str = "text/vtt";
    /// Camera motion metadata.
    pub const APPLICATION_CAMERA_MOTION: &str = "application/x-camera-motion";
    /// Emsg metadata.
    pub const APPLICATION_EMSG: &str = "application/x-emsg";
    /// ID3 metadata.
    pub const APPLICATION_ID3: &str = "application/id3";
}

/// Track type in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// Audio track.
    Audio,
    /// Video track.
    Video,
    /// Text/subtitle track.
    Text,
    /// Still image track.
    Image,
    /// Timed metadata track.
    Metadata,
    /// Unknown track type.
    Unknown,
}

impl TrackType {
    /// Derive the track type from a sample MIME type.
    ///
    /// Only the top-level type is inspected, so `video/anything` is a video
    /// track even when no backend supports it.
    pub fn of_mime(mime_type: &str) -> Self {
        let top_level = match mime_type.split_once('/') {
            Some((top, sub)) if !sub.is_empty() => top,
            _ => return TrackType::Unknown,
        };
        match top_level.to_ascii_lowercase().as_str() {
            "audio" => TrackType::Audio,
            "video" => TrackType::Video,
            "text" => TrackType::Text,
            "image" => TrackType::Image,
            "application" if is_metadata_application_type(mime_type) => TrackType::Metadata,
            _ => TrackType::Unknown,
        }
    }
}

fn is_metadata_application_type(mime_type: &str) -> bool {
    matches!(
        mime_type,
        mime::APPLICATION_CAMERA_MOTION | mime::APPLICATION_EMSG | mime::APPLICATION_ID3
    )
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "Audio"),
            Self::Video => write!(f, "Video"),
            Self::Text => write!(f, "Text"),
            Self::Image => write!(f, "Image"),
            Self::Metadata => write!(f, "Metadata"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Description of one elementary stream handed to a muxer.
///
/// The muxer abstraction only looks at [`Format::sample_mime_type`]; the
/// remaining fields are read by whichever backend needs them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Format {
    /// Sample MIME type, e.g. `video/avc`.
    pub sample_mime_type: String,
    /// Width in pixels (video).
    pub width: Option<u32>,
    /// Height in pixels (video).
    pub height: Option<u32>,
    /// Frame rate in frames per second (video).
    pub frame_rate: Option<f32>,
    /// Sample rate in Hz (audio).
    pub sample_rate: Option<u32>,
    /// Number of channels (audio).
    pub channel_count: Option<u16>,
    /// ISO 639-2 or BCP 47 language tag.
    pub language: Option<String>,
    /// Decoder configuration record (avcC, hvcC, AudioSpecificConfig, ...).
    pub codec_specific_data: Option<Vec<u8>>,
}

impl Format {
    /// Create a format with the given sample MIME type.
    pub fn new(sample_mime_type: impl Into<String>) -> Self {
        Self {
            sample_mime_type: sample_mime_type.into(),
            ..Self::default()
        }
    }

    /// Convenience constructor for a video format.
    pub fn video(sample_mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(sample_mime_type).with_dimensions(width, height)
    }

    /// Convenience constructor for an audio format.
    pub fn audio(sample_mime_type: impl Into<String>, sample_rate: u32, channel_count: u16) -> Self {
        Self::new(sample_mime_type).with_audio(sample_rate, channel_count)
    }

    /// Set the video dimensions.
    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set the frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Set the audio sample rate and channel count.
    #[must_use]
    pub fn with_audio(mut self, sample_rate: u32, channel_count: u16) -> Self {
        self.sample_rate = Some(sample_rate);
        self.channel_count = Some(channel_count);
        self
    }

    /// Set the language tag.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the decoder configuration record.
    #[must_use]
    pub fn with_codec_specific_data(mut self, data: Vec<u8>) -> Self {
        self.codec_specific_data = Some(data);
        self
    }

    /// Track type derived from the sample MIME type.
    pub fn track_type(&self) -> TrackType {
        TrackType::of_mime(&self.sample_mime_type)
    }
}
