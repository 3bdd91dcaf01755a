//! Container-level metadata retained by the MP4 muxer.

use super::atoms::{make_box, make_container, make_full_box};
use super::write_u32_be;
use muxkit_core::metadata::{type_indicator, MdtaValue, MetadataEntry};

/// UUID of the atom that carries an XMP packet.
pub(crate) const XMP_UUID: [u8; 16] = [
    0xBE, 0x7A, 0xCF, 0xCB, 0x97, 0xA9, 0x42, 0xE8, 0x9C, 0x71, 0x99, 0x94, 0x91, 0xE3, 0xAF, 0xAC,
];

/// Language code written in front of the location string.
const LOCATION_LANGUAGE_CODE: u16 = 0x15C7;

/// Fixed point 1.0 in the 16.16 format used by the display matrix.
const FIXED_ONE: i32 = 0x0001_0000;

/// Fixed point 1.0 in the 2.30 format used by the matrix's last column.
const FIXED_W: i32 = 0x4000_0000;

/// Metadata collected while a muxer is open.
#[derive(Debug, Clone, Default)]
pub(crate) struct Mp4Metadata {
    orientation: u16,
    location: Option<(f32, f32)>,
    creation_seconds: u32,
    modification_seconds: u32,
    mdta: Vec<(String, u32, Vec<u8>)>,
    xmp: Option<Vec<u8>>,
}

impl Mp4Metadata {
    /// Retain `entry`, or explain why it was dropped.
    pub(crate) fn add(&mut self, entry: MetadataEntry) -> Result<(), String> {
        match entry {
            MetadataEntry::Orientation { rotation_degrees } => {
                if !matches!(rotation_degrees, 0 | 90 | 180 | 270) {
                    return Err(format!("unsupported rotation {}", rotation_degrees));
                }
                self.orientation = rotation_degrees;
            }
            MetadataEntry::Location { latitude, longitude } => {
                if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                    return Err(format!("location out of range: {}, {}", latitude, longitude));
                }
                self.location = Some((latitude, longitude));
            }
            MetadataEntry::Timestamp {
                creation_seconds,
                modification_seconds,
            } => {
                let creation = u32::try_from(creation_seconds)
                    .map_err(|_| format!("creation time {} does not fit 32 bits", creation_seconds))?;
                let modification = u32::try_from(modification_seconds).map_err(|_| {
                    format!("modification time {} does not fit 32 bits", modification_seconds)
                })?;
                self.creation_seconds = creation;
                self.modification_seconds = modification;
            }
            MetadataEntry::Mdta { key, value } => {
                if key.is_empty() {
                    return Err("mdta key is empty".into());
                }
                let (indicator, data) = encode_mdta_value(&value)?;
                self.mdta.push((key, indicator, data));
            }
            MetadataEntry::Xmp(data) => {
                if data.is_empty() {
                    return Err("XMP packet is empty".into());
                }
                self.xmp = Some(data);
            }
            MetadataEntry::Other { kind, .. } => {
                return Err(format!("unsupported entry kind {}", kind));
            }
        }
        Ok(())
    }

    pub(crate) fn orientation(&self) -> u16 {
        self.orientation
    }

    pub(crate) fn creation_seconds(&self) -> u32 {
        self.creation_seconds
    }

    pub(crate) fn modification_seconds(&self) -> u32 {
        self.modification_seconds
    }

    /// Display matrix for the current orientation, row major.
    pub(crate) fn matrix(&self) -> [i32; 9] {
        rotation_matrix(self.orientation)
    }

    /// `udta` atom with the location, if one was set.
    pub(crate) fn build_udta(&self) -> Option<Vec<u8>> {
        let (latitude, longitude) = self.location?;
        let location = format!("{:+.4}{:+.4}/", latitude, longitude);

        let mut xyz = Vec::with_capacity(location.len() + 4);
        xyz.extend_from_slice(&(location.len() as u16).to_be_bytes());
        xyz.extend_from_slice(&LOCATION_LANGUAGE_CODE.to_be_bytes());
        xyz.extend_from_slice(location.as_bytes());

        Some(make_box(b"udta", &make_box(&[0xA9, b'x', b'y', b'z'], &xyz)))
    }

    /// `meta` atom with the mdta keys and values, if any were added.
    pub(crate) fn build_meta(&self) -> Option<Vec<u8>> {
        if self.mdta.is_empty() {
            return None;
        }

        // hdlr declaring mdta keys
        let mut hdlr = Vec::new();
        hdlr.extend_from_slice(&[0u8; 4]); // pre-defined
        hdlr.extend_from_slice(b"mdta");
        hdlr.extend_from_slice(&[0u8; 12]); // reserved
        hdlr.push(0); // empty name
        let hdlr = make_full_box(b"hdlr", 0, 0, &hdlr);

        let mut keys = Vec::new();
        keys.extend_from_slice(&write_u32_be(self.mdta.len() as u32));
        for (key, _, _) in &self.mdta {
            keys.extend_from_slice(&make_box(b"mdta", key.as_bytes()));
        }
        let keys = make_full_box(b"keys", 0, 0, &keys);

        let mut ilst = Vec::new();
        for (i, (_, indicator, value)) in self.mdta.iter().enumerate() {
            let mut data = Vec::with_capacity(value.len() + 8);
            data.extend_from_slice(&write_u32_be(*indicator));
            data.extend_from_slice(&write_u32_be(0)); // locale
            data.extend_from_slice(value);
            // Items are typed by their 1-based key index.
            let key_id = (i as u32 + 1).to_be_bytes();
            ilst.extend_from_slice(&make_box(&key_id, &make_box(b"data", &data)));
        }
        let ilst = make_box(b"ilst", &ilst);

        Some(make_container(b"meta", [hdlr, keys, ilst]))
    }

    /// `uuid` atom with the XMP packet, if one was set.
    pub(crate) fn build_xmp(&self) -> Option<Vec<u8>> {
        let xmp = self.xmp.as_ref()?;
        let mut payload = Vec::with_capacity(XMP_UUID.len() + xmp.len());
        payload.extend_from_slice(&XMP_UUID);
        payload.extend_from_slice(xmp);
        Some(make_box(b"uuid", &payload))
    }
}

fn encode_mdta_value(value: &MdtaValue) -> Result<(u32, Vec<u8>), String> {
    let indicator = value.type_indicator();
    let data = value.to_bytes();
    match indicator {
        type_indicator::STRING if std::str::from_utf8(&data).is_ok() => Ok((indicator, data)),
        type_indicator::FLOAT32 if data.len() == 4 => Ok((indicator, data)),
        _ => Err(format!("unsupported mdta value type {}", indicator)),
    }
}

/// Display matrix rotating clockwise by `degrees`.
pub(crate) fn rotation_matrix(degrees: u16) -> [i32; 9] {
    match degrees {
        90 => [0, FIXED_ONE, 0, -FIXED_ONE, 0, 0, 0, 0, FIXED_W],
        180 => [-FIXED_ONE, 0, 0, 0, -FIXED_ONE, 0, 0, 0, FIXED_W],
        270 => [0, -FIXED_ONE, 0, FIXED_ONE, 0, 0, 0, 0, FIXED_W],
        _ => [FIXED_ONE, 0, 0, 0, FIXED_ONE, 0, 0, 0, FIXED_W],
    }
}

/// Rotation in degrees encoded by a display matrix, if it is one of the
/// four right-angle rotations.
pub(crate) fn rotation_of_matrix(matrix: &[i32; 9]) -> Option<u16> {
    [0u16, 90, 180, 270]
        .into_iter()
        .find(|&d| rotation_matrix(d)[..5] == matrix[..5])
}
