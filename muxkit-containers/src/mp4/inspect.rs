//! Read back the headers of an MP4 file.
//!
//! Only the parts the muxer writes are understood: movie and track
//! headers, edit lists, handlers, sample counts, location and mdta keys.
//! Sample data is never read.

use super::atoms::{AtomHeader, HEADER_SIZE};
use super::metadata::{rotation_of_matrix, XMP_UUID};
use super::{read_u16_be, read_u32_be, read_u64_be};
use muxkit_core::error::{Error, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Summary of one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mp4TrackInfo {
    /// Track id from `tkhd`.
    pub track_id: u32,
    /// Handler type, `vide` or `soun`.
    pub handler: String,
    /// Sample entry type, e.g. `avc1`.
    pub sample_entry: String,
    /// Media timescale from `mdhd`.
    pub timescale: u32,
    /// Media duration in timescale units.
    pub duration: u64,
    /// Duration from `tkhd`, in movie timescale units.
    pub presentation_duration: u64,
    /// Whether the track carries an `edts` atom.
    pub has_edit_list: bool,
    /// Where the first sample is presented, relative to the movie start.
    ///
    /// Positive when the edit list starts with an empty edit, negative when
    /// it skips media.
    pub start_offset_us: i64,
    /// Number of samples from `stsz`.
    pub sample_count: u32,
    /// Display width in pixels.
    pub width: u32,
    /// Display height in pixels.
    pub height: u32,
    /// Rotation encoded by the display matrix, if it is a right angle.
    pub rotation_degrees: Option<u16>,
}

impl Mp4TrackInfo {
    /// Media duration in microseconds.
    pub fn duration_us(&self) -> i64 {
        ticks_to_us(self.duration, self.timescale)
    }

    /// Check if this is a video track.
    pub fn is_video(&self) -> bool {
        self.handler == "vide"
    }
}

/// Summary of an MP4 file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mp4Info {
    /// Major brand from `ftyp`.
    pub major_brand: String,
    /// Movie timescale from `mvhd`.
    pub timescale: u32,
    /// Movie duration in movie timescale units.
    pub duration: u64,
    /// Creation time from `mvhd`, seconds since 1904.
    pub creation_seconds: u64,
    /// Tracks in file order.
    pub tracks: Vec<Mp4TrackInfo>,
    /// ISO 6709 location string from `udta`.
    pub location: Option<String>,
    /// Keys of the mdta metadata, in order.
    pub mdta_keys: Vec<String>,
    /// Whether an XMP packet follows `moov`.
    pub has_xmp: bool,
}

impl Mp4Info {
    /// Open and inspect the file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read(&mut reader)
    }

    /// Inspect an MP4 stream.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut major_brand = None;
        let mut moov = None;
        let mut has_xmp = false;

        reader.seek(SeekFrom::Start(0))?;
        while let Some(header) = AtomHeader::read(reader)? {
            match &header.atom_type {
                b"ftyp" => {
                    let data = read_content(reader, &header)?;
                    major_brand = data.get(..4).map(|b| String::from_utf8_lossy(b).into_owned());
                }
                b"moov" => moov = Some(read_content(reader, &header)?),
                b"uuid" => {
                    let data = read_content(reader, &header)?;
                    has_xmp |= data.get(..16) == Some(&XMP_UUID[..]);
                }
                _ => {}
            }
            reader.seek(SeekFrom::Start(header.end_offset()))?;
        }

        let major_brand = major_brand.ok_or_else(|| Error::Container("missing ftyp atom".into()))?;
        let moov = moov.ok_or_else(|| Error::Container("missing moov atom".into()))?;

        let mut info = Mp4Info {
            major_brand,
            timescale: 0,
            duration: 0,
            creation_seconds: 0,
            tracks: Vec::new(),
            location: None,
            mdta_keys: Vec::new(),
            has_xmp,
        };

        let mut traks = Vec::new();
        for (atom_type, data) in children(&moov)? {
            match &atom_type {
                b"mvhd" => {
                    let times = parse_times(data)?;
                    info.creation_seconds = times.creation;
                    info.timescale = times.timescale;
                    info.duration = times.duration;
                }
                b"trak" => traks.push(data),
                b"udta" => info.location = parse_location(data)?,
                b"meta" => info.mdta_keys = parse_mdta_keys(data)?,
                _ => {}
            }
        }

        if info.timescale == 0 {
            return Err(Error::Container("missing or invalid mvhd atom".into()));
        }
        for trak in traks {
            info.tracks.push(parse_trak(trak, info.timescale)?);
        }
        Ok(info)
    }

    /// Movie duration in microseconds.
    pub fn duration_us(&self) -> i64 {
        ticks_to_us(self.duration, self.timescale)
    }

    /// Presentation duration of `track` in microseconds, from its `tkhd`.
    pub fn track_duration_us(&self, track: &Mp4TrackInfo) -> i64 {
        ticks_to_us(track.presentation_duration, self.timescale)
    }

    /// The first video track, if any.
    pub fn video_track(&self) -> Option<&Mp4TrackInfo> {
        self.tracks.iter().find(|t| t.is_video())
    }
}

fn ticks_to_us(ticks: u64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (ticks as u128 * 1_000_000 / timescale as u128) as i64
}

fn read_content<R: Read + Seek + ?Sized>(reader: &mut R, header: &AtomHeader) -> Result<Vec<u8>> {
    let size = usize::try_from(header.content_size())
        .map_err(|_| Error::Container("atom too large to inspect".into()))?;
    let mut data = vec![0u8; size];
    reader.seek(SeekFrom::Start(header.content_offset()))?;
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Split the payload of a container atom into its children.
fn children(data: &[u8]) -> Result<Vec<([u8; 4], &[u8])>> {
    let mut result = Vec::new();
    let mut offset = 0usize;
    while offset + HEADER_SIZE <= data.len() {
        let size = read_u32_be(&data[offset..])? as u64;
        let atom_type = [data[offset + 4], data[offset + 5], data[offset + 6], data[offset + 7]];
        let (size, header_size) = match size {
            0 => ((data.len() - offset) as u64, HEADER_SIZE),
            1 => (read_u64_be(data.get(offset + 8..).unwrap_or(&[]))?, 16),
            _ => (size, HEADER_SIZE),
        };
        let end = usize::try_from(size)
            .ok()
            .and_then(|s| offset.checked_add(s))
            .filter(|&end| end <= data.len() && end >= offset + header_size)
            .ok_or_else(|| {
                Error::Container(format!(
                    "atom {} overruns its parent",
                    String::from_utf8_lossy(&atom_type)
                ))
            })?;
        result.push((atom_type, &data[offset + header_size..end]));
        offset = end;
    }
    Ok(result)
}

fn child<'a>(data: &'a [u8], atom_type: &[u8; 4]) -> Result<Option<&'a [u8]>> {
    Ok(children(data)?
        .into_iter()
        .find(|(t, _)| t == atom_type)
        .map(|(_, d)| d))
}

fn require<'a>(data: &'a [u8], atom_type: &[u8; 4]) -> Result<&'a [u8]> {
    child(data, atom_type)?.ok_or_else(|| {
        Error::Container(format!("missing {} atom", String::from_utf8_lossy(atom_type)))
    })
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32> {
    read_u32_be(data.get(offset..).unwrap_or(&[]))
}

fn u64_at(data: &[u8], offset: usize) -> Result<u64> {
    read_u64_be(data.get(offset..).unwrap_or(&[]))
}

struct Times {
    creation: u64,
    timescale: u32,
    duration: u64,
}

/// Times of an mvhd or mdhd payload.
fn parse_times(data: &[u8]) -> Result<Times> {
    match data.first() {
        Some(1) => Ok(Times {
            creation: u64_at(data, 4)?,
            timescale: u32_at(data, 20)?,
            duration: u64_at(data, 24)?,
        }),
        Some(0) => Ok(Times {
            creation: u32_at(data, 4)? as u64,
            timescale: u32_at(data, 12)?,
            duration: u32_at(data, 16)? as u64,
        }),
        _ => Err(Error::Container("unknown header version".into())),
    }
}

/// Start offset encoded by an elst payload: empty edits delay the track,
/// a media time skips into it.
fn parse_elst(elst: &[u8], movie_timescale: u32, timescale: u32) -> Result<i64> {
    let (entry_size, long) = match elst.first() {
        Some(1) => (20, true),
        Some(0) => (12, false),
        _ => return Err(Error::Container("unknown elst version".into())),
    };
    let count = u32_at(elst, 4)? as usize;

    let mut offset_us = 0i64;
    for entry in 0..count {
        let at = 8 + entry * entry_size;
        let (segment_duration, media_time) = if long {
            (u64_at(elst, at)?, u64_at(elst, at + 8)? as i64)
        } else {
            (u32_at(elst, at)? as u64, u32_at(elst, at + 4)? as i32 as i64)
        };
        if media_time == -1 {
            offset_us += ticks_to_us(segment_duration, movie_timescale);
        } else {
            offset_us -= ticks_to_us(media_time as u64, timescale);
            break;
        }
    }
    Ok(offset_us)
}

fn parse_trak(trak: &[u8], movie_timescale: u32) -> Result<Mp4TrackInfo> {
    let tkhd = require(trak, b"tkhd")?;
    // Offset of the fields following the version-dependent times.
    let (track_id, presentation_duration, rest) = match tkhd.first() {
        Some(1) => (u32_at(tkhd, 20)?, u64_at(tkhd, 28)?, 36),
        Some(0) => (u32_at(tkhd, 12)?, u32_at(tkhd, 20)? as u64, 24),
        _ => return Err(Error::Container("unknown tkhd version".into())),
    };
    let matrix_offset = rest + 16;
    let mut matrix = [0i32; 9];
    for (i, value) in matrix.iter_mut().enumerate() {
        *value = u32_at(tkhd, matrix_offset + i * 4)? as i32;
    }
    let width = u32_at(tkhd, matrix_offset + 36)? >> 16;
    let height = u32_at(tkhd, matrix_offset + 40)? >> 16;

    let mdia = require(trak, b"mdia")?;
    let times = parse_times(require(mdia, b"mdhd")?)?;
    let hdlr = require(mdia, b"hdlr")?;
    let handler = String::from_utf8_lossy(hdlr.get(8..12).unwrap_or_default()).into_owned();

    let stbl = require(require(mdia, b"minf")?, b"stbl")?;
    let stsd = require(stbl, b"stsd")?;
    let sample_entry = String::from_utf8_lossy(stsd.get(12..16).unwrap_or_default()).into_owned();
    let sample_count = u32_at(require(stbl, b"stsz")?, 8)?;

    let elst = match child(trak, b"edts")? {
        Some(edts) => child(edts, b"elst")?,
        None => None,
    };
    let start_offset_us = match elst {
        Some(elst) => parse_elst(elst, movie_timescale, times.timescale)?,
        None => 0,
    };

    Ok(Mp4TrackInfo {
        track_id,
        handler,
        sample_entry,
        timescale: times.timescale,
        duration: times.duration,
        presentation_duration,
        has_edit_list: elst.is_some(),
        start_offset_us,
        sample_count,
        width,
        height,
        rotation_degrees: rotation_of_matrix(&matrix),
    })
}

fn parse_location(udta: &[u8]) -> Result<Option<String>> {
    let xyz = match child(udta, &[0xA9, b'x', b'y', b'z'])? {
        Some(xyz) => xyz,
        None => return Ok(None),
    };
    let len = read_u16_be(xyz)? as usize;
    let text = xyz
        .get(4..4 + len)
        .ok_or_else(|| Error::Container("truncated location".into()))?;
    Ok(Some(String::from_utf8_lossy(text).into_owned()))
}

fn parse_mdta_keys(meta: &[u8]) -> Result<Vec<String>> {
    let keys = match child(meta, b"keys")? {
        Some(keys) => keys,
        None => return Ok(Vec::new()),
    };
    // Skip version, flags and entry count.
    let entries = keys.get(8..).unwrap_or_default();
    Ok(children(entries)?
        .into_iter()
        .filter(|(t, _)| t == b"mdta")
        .map(|(_, key)| String::from_utf8_lossy(key).into_owned())
        .collect())
}
