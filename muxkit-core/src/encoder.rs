//! Encoder settings passed through to encoders.
//!
//! Muxers never read these; they travel alongside a track so that whatever
//! produces the samples can be configured consistently.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Reserved raw value meaning "unset, let the encoder decide".
///
/// Shared by every field of [`EncoderSettings`]. Never a valid profile,
/// level or bitrate.
pub const NO_VALUE: i32 = -1;

/// Bitrate control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitrateMode {
    /// Constant quality.
    ConstantQuality,
    /// Variable bitrate.
    Variable,
    /// Constant bitrate.
    Constant,
}

impl BitrateMode {
    /// Raw platform value.
    pub fn to_raw(self) -> i32 {
        match self {
            BitrateMode::ConstantQuality => 0,
            BitrateMode::Variable => 1,
            BitrateMode::Constant => 2,
        }
    }

    /// Parse a raw platform value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(BitrateMode::ConstantQuality),
            1 => Some(BitrateMode::Variable),
            2 => Some(BitrateMode::Constant),
            _ => None,
        }
    }
}

/// Requested encoder configuration. Every field is optional; `None` lets
/// the encoder pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Codec profile.
    pub profile: Option<u32>,
    /// Codec level. Only meaningful together with a profile.
    pub level: Option<u32>,
    /// Target bitrate in bits per second.
    pub bitrate: Option<u32>,
    /// Bitrate control mode.
    pub bitrate_mode: Option<BitrateMode>,
}

/// Raw form of [`EncoderSettings`] using [`NO_VALUE`] for unset fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEncoderSettings {
    /// Profile or [`NO_VALUE`].
    pub profile: i32,
    /// Level or [`NO_VALUE`].
    pub level: i32,
    /// Bitrate or [`NO_VALUE`].
    pub bitrate: i32,
    /// Bitrate mode or [`NO_VALUE`].
    pub bitrate_mode: i32,
}

impl EncoderSettings {
    /// Settings with every field unset.
    pub const DEFAULT: EncoderSettings = EncoderSettings {
        profile: None,
        level: None,
        bitrate: None,
        bitrate_mode: None,
    };

    /// Start building settings.
    pub fn builder() -> EncoderSettingsBuilder {
        EncoderSettingsBuilder::new()
    }

    /// Builder pre-populated with these settings.
    pub fn to_builder(&self) -> EncoderSettingsBuilder {
        EncoderSettingsBuilder { settings: *self }
    }

    /// Encode into the sentinel-based raw form.
    pub fn to_raw(&self) -> RawEncoderSettings {
        fn raw(value: Option<u32>) -> i32 {
            value.map_or(NO_VALUE, |v| i32::try_from(v).unwrap_or(i32::MAX))
        }
        RawEncoderSettings {
            profile: raw(self.profile),
            level: raw(self.level),
            bitrate: raw(self.bitrate),
            bitrate_mode: self.bitrate_mode.map_or(NO_VALUE, BitrateMode::to_raw),
        }
    }

    /// Decode from the sentinel-based raw form.
    pub fn from_raw(raw: RawEncoderSettings) -> Result<Self> {
        fn field(name: &str, value: i32) -> Result<Option<u32>> {
            match value {
                NO_VALUE => Ok(None),
                v if v > 0 => Ok(Some(v as u32)),
                v => Err(Error::invalid_param(format!("{} must be positive, got {}", name, v))),
            }
        }
        let bitrate_mode = match raw.bitrate_mode {
            NO_VALUE => None,
            v => Some(
                BitrateMode::from_raw(v)
                    .ok_or_else(|| Error::invalid_param(format!("unknown bitrate mode {}", v)))?,
            ),
        };
        Self::builder()
            .apply_profile(field("profile", raw.profile)?, field("level", raw.level)?)
            .apply_bitrate(field("bitrate", raw.bitrate)?)
            .apply_bitrate_mode(bitrate_mode)
            .try_build()
    }
}

/// Builder for [`EncoderSettings`].
#[derive(Debug, Clone, Default)]
pub struct EncoderSettingsBuilder {
    settings: EncoderSettings,
}

impl EncoderSettingsBuilder {
    /// Create a builder with every field unset.
    pub fn new() -> Self {
        Self {
            settings: EncoderSettings::DEFAULT,
        }
    }

    /// Set the codec profile and optionally a level.
    #[must_use]
    pub fn profile(self, profile: u32, level: Option<u32>) -> Self {
        self.apply_profile(Some(profile), level)
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn bitrate(self, bitrate: u32) -> Self {
        self.apply_bitrate(Some(bitrate))
    }

    /// Set the bitrate control mode.
    #[must_use]
    pub fn bitrate_mode(self, mode: BitrateMode) -> Self {
        self.apply_bitrate_mode(Some(mode))
    }

    fn apply_profile(mut self, profile: Option<u32>, level: Option<u32>) -> Self {
        self.settings.profile = profile;
        self.settings.level = level;
        self
    }

    fn apply_bitrate(mut self, bitrate: Option<u32>) -> Self {
        self.settings.bitrate = bitrate;
        self
    }

    fn apply_bitrate_mode(mut self, mode: Option<BitrateMode>) -> Self {
        self.settings.bitrate_mode = mode;
        self
    }

    /// Validate and build the settings.
    pub fn try_build(self) -> Result<EncoderSettings> {
        let s = self.settings;
        if s.profile == Some(0) || s.level == Some(0) || s.bitrate == Some(0) {
            return Err(Error::invalid_param("profile, level and bitrate must be positive"));
        }
        if s.level.is_some() && s.profile.is_none() {
            return Err(Error::invalid_param("level requires a profile"));
        }
        Ok(s)
    }

    /// Build the settings, discarding fields that fail validation.
    pub fn build(self) -> EncoderSettings {
        let mut s = self.settings;
        s.profile = s.profile.filter(|&p| p > 0);
        s.level = s.level.filter(|&l| l > 0 && s.profile.is_some());
        s.bitrate = s.bitrate.filter(|&b| b > 0);
        s
    }
}
