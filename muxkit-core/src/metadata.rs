//! Container-level metadata entries.
//!
//! Entries are not tied to a track. Backends keep the ones they can
//! represent and drop the rest; losing an entry is never an error.

use std::fmt;

/// Well-known mdta type indicators.
pub mod type_indicator {
    /// UTF-8 string.
    pub const STRING: u32 = 1;
    /// Big-endian IEEE 754 32-bit float.
    pub const FLOAT32: u32 = 23;
    /// Big-endian signed 32-bit integer.
    pub const INT32: u32 = 67;
    /// Big-endian unsigned 64-bit integer.
    pub const UNSIGNED_INT64: u32 = 78;
}

/// Value of a key/value (mdta) metadata entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MdtaValue {
    /// String value.
    String(String),
    /// 32-bit float value.
    Float32(f32),
    /// Raw bytes with an explicit type indicator.
    Raw {
        /// Type indicator, see [`type_indicator`].
        type_indicator: u32,
        /// Encoded value.
        data: Vec<u8>,
    },
}

impl MdtaValue {
    /// Type indicator for this value.
    pub fn type_indicator(&self) -> u32 {
        match self {
            MdtaValue::String(_) => type_indicator::STRING,
            MdtaValue::Float32(_) => type_indicator::FLOAT32,
            MdtaValue::Raw { type_indicator, .. } => *type_indicator,
        }
    }

    /// Encoded value bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MdtaValue::String(s) => s.as_bytes().to_vec(),
            MdtaValue::Float32(v) => v.to_be_bytes().to_vec(),
            MdtaValue::Raw { data, .. } => data.clone(),
        }
    }
}

/// A container-level metadata entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEntry {
    /// Display rotation in degrees, clockwise.
    Orientation {
        /// One of 0, 90, 180 or 270.
        rotation_degrees: u16,
    },
    /// Recording location.
    Location {
        /// Latitude in degrees, -90 to 90.
        latitude: f32,
        /// Longitude in degrees, -180 to 180.
        longitude: f32,
    },
    /// Creation and modification times, in seconds since 1904-01-01 UTC.
    Timestamp {
        /// Creation time.
        creation_seconds: u64,
        /// Modification time.
        modification_seconds: u64,
    },
    /// Key/value metadata.
    Mdta {
        /// Key, conventionally reverse-DNS (`com.example.key`).
        key: String,
        /// Value.
        value: MdtaValue,
    },
    /// XMP packet.
    Xmp(Vec<u8>),
    /// Any other entry, identified by a free-form discriminator.
    Other {
        /// Entry type discriminator.
        kind: String,
        /// Opaque payload.
        payload: Vec<u8>,
    },
}

impl MetadataEntry {
    /// Seconds between 1904-01-01 (the MP4 epoch) and 1970-01-01.
    pub const UNIX_EPOCH_OFFSET_SECONDS: u64 = 2_082_844_800;

    /// Create a timestamp entry from Unix times in seconds.
    pub fn timestamp_from_unix(creation_unix: u64, modification_unix: u64) -> Self {
        MetadataEntry::Timestamp {
            creation_seconds: creation_unix.saturating_add(Self::UNIX_EPOCH_OFFSET_SECONDS),
            modification_seconds: modification_unix.saturating_add(Self::UNIX_EPOCH_OFFSET_SECONDS),
        }
    }

    /// Create a string mdta entry.
    pub fn mdta_string(key: impl Into<String>, value: impl Into<String>) -> Self {
        MetadataEntry::Mdta {
            key: key.into(),
            value: MdtaValue::String(value.into()),
        }
    }

    /// Create a float mdta entry.
    pub fn mdta_float(key: impl Into<String>, value: f32) -> Self {
        MetadataEntry::Mdta {
            key: key.into(),
            value: MdtaValue::Float32(value),
        }
    }

    /// Type discriminator of this entry.
    pub fn kind(&self) -> &str {
        match self {
            MetadataEntry::Orientation { .. } => "orientation",
            MetadataEntry::Location { .. } => "location",
            MetadataEntry::Timestamp { .. } => "timestamp",
            MetadataEntry::Mdta { .. } => "mdta",
            MetadataEntry::Xmp(_) => "xmp",
            MetadataEntry::Other { kind, .. } => kind,
        }
    }
}

impl fmt::Display for MetadataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataEntry::Orientation { rotation_degrees } => {
                write!(f, "orientation: {}°", rotation_degrees)
            }
            MetadataEntry::Location { latitude, longitude } => {
                write!(f, "location: {:+.4}{:+.4}", latitude, longitude)
            }
            MetadataEntry::Timestamp {
                creation_seconds,
                modification_seconds,
            } => write!(
                f,
                "timestamp: created={}, modified={}",
                creation_seconds, modification_seconds
            ),
            MetadataEntry::Mdta { key, value } => write!(f, "mdta: {}={:?}", key, value),
            MetadataEntry::Xmp(data) => write!(f, "xmp: {} bytes", data.len()),
            MetadataEntry::Other { kind, payload } => write!(f, "{}: {} bytes", kind, payload.len()),
        }
    }
}
