//! MP4 muxer implementation.

use super::annexb;
use super::atoms::{make_box, make_container, make_full_box};
use super::metadata::Mp4Metadata;
use super::{
    write_u32_be, write_u64_be, LastSampleDuration, Mp4Brand, Mp4MuxerConfig, SampleEntryType,
    MAX_SAMPLES_PER_CHUNK, MOVIE_TIMESCALE, VIDEO_TIMESCALE,
};
use crate::traits::Muxer;
use muxkit_core::error::{MuxerError, MuxerResult};
use muxkit_core::format::{Format, TrackType};
use muxkit_core::metadata::MetadataEntry;
use muxkit_core::sample::{BufferInfo, TrackId};
use std::borrow::Cow;
use std::io::{self, Seek, SeekFrom, Write};
use tracing::{debug, info, warn};

/// Largest AudioSpecificConfig that fits the single-byte esds lengths.
const MAX_AAC_CONFIG_SIZE: usize = 104;

/// Sample metadata.
#[derive(Debug, Clone)]
struct SampleInfo {
    /// Size in bytes.
    size: u32,
    /// Presentation timestamp in microseconds.
    presentation_time_us: i64,
    /// Is keyframe.
    keyframe: bool,
}

/// Chunk metadata.
#[derive(Debug, Clone)]
struct ChunkInfo {
    /// Offset in file.
    offset: u64,
    /// Number of samples.
    sample_count: usize,
}

/// Track muxing state.
struct TrackState {
    /// Track format, including any codec config received in-band.
    format: Format,
    /// Sample entry written to stsd.
    entry: SampleEntryType,
    /// Timescale.
    timescale: u32,
    /// Samples.
    samples: Vec<SampleInfo>,
    /// Chunks.
    chunks: Vec<ChunkInfo>,
    /// End of the last sample, from an end of stream marker or the
    /// enforced video duration.
    end_time_us: Option<i64>,
    /// No further samples are accepted.
    ended: bool,
}

impl TrackState {
    fn new(format: Format) -> MuxerResult<Self> {
        let entry = SampleEntryType::from_mime(&format.sample_mime_type).ok_or_else(|| {
            MuxerError::add_track(format!("unsupported sample MIME type {}", format.sample_mime_type))
        })?;

        let timescale = if entry.is_video() {
            match (format.width, format.height) {
                (Some(w), Some(h)) if w > 0 && h > 0 && w <= u16::MAX as u32 && h <= u16::MAX as u32 => {}
                _ => return Err(MuxerError::add_track("video tracks need a width and height up to 65535")),
            }
            // For video, use a high timescale for accurate frame times
            VIDEO_TIMESCALE
        } else {
            if format.channel_count.map_or(true, |c| c == 0) {
                return Err(MuxerError::add_track("audio tracks need a channel count"));
            }
            // For audio, use the sample rate
            match format.sample_rate {
                Some(rate) if rate > u16::MAX as u32 => {
                    return Err(MuxerError::add_track(format!(
                        "sample rate {} Hz does not fit the 16-bit sample entry field",
                        rate
                    )))
                }
                Some(rate) if rate > 0 => rate,
                _ => return Err(MuxerError::add_track("audio tracks need a sample rate")),
            }
        };

        if entry == SampleEntryType::Mp4a
            && format.codec_specific_data.as_ref().map_or(false, |c| c.len() > MAX_AAC_CONFIG_SIZE)
        {
            return Err(MuxerError::add_track("AAC codec specific data is too large"));
        }

        Ok(Self {
            format,
            entry,
            timescale,
            samples: Vec::new(),
            chunks: Vec::new(),
            end_time_us: None,
            ended: false,
        })
    }

    fn track_type(&self) -> TrackType {
        if self.entry.is_video() {
            TrackType::Video
        } else {
            TrackType::Audio
        }
    }

    fn first_presentation_time_us(&self) -> Option<i64> {
        self.samples.first().map(|s| s.presentation_time_us)
    }

    fn last_presentation_time_us(&self) -> Option<i64> {
        self.samples.last().map(|s| s.presentation_time_us)
    }

    /// Remove the samples presented at or after `end_us`.
    ///
    /// Timestamps never decrease within a track, so the removed samples are
    /// always a suffix and the remaining chunk offsets stay valid.
    fn truncate_from(&mut self, end_us: i64) -> usize {
        let keep = self.samples.partition_point(|s| s.presentation_time_us < end_us);
        let mut removed = self.samples.len() - keep;
        self.samples.truncate(keep);

        let dropped = removed;
        while removed > 0 {
            match self.chunks.last_mut() {
                Some(chunk) if chunk.sample_count > removed => {
                    chunk.sample_count -= removed;
                    removed = 0;
                }
                Some(chunk) => {
                    removed -= chunk.sample_count;
                    self.chunks.pop();
                }
                None => break,
            }
        }
        dropped
    }

    /// Per-sample durations in track timescale units.
    ///
    /// Times are measured from the first sample so that rounding never
    /// accumulates across samples.
    fn sample_durations(&self, last_sample_duration: LastSampleDuration) -> Vec<u32> {
        let first = match self.samples.first() {
            Some(s) => s.presentation_time_us,
            None => return Vec::new(),
        };
        let ticks: Vec<u64> = self
            .samples
            .iter()
            .map(|s| us_to_ticks(s.presentation_time_us - first, self.timescale))
            .collect();

        let mut durations: Vec<u32> = ticks.windows(2).map(|w| clamp_u32(w[1] - w[0])).collect();

        let last_tick = ticks.last().copied().unwrap_or(0);
        let last = match self.end_time_us {
            Some(end) => clamp_u32(us_to_ticks(end - first, self.timescale).saturating_sub(last_tick)),
            None => match last_sample_duration {
                LastSampleDuration::Zero => 0,
                LastSampleDuration::DuplicatePrevious => durations.last().copied().unwrap_or(0),
            },
        };
        durations.push(last);
        durations
    }
}

fn us_to_ticks(time_us: i64, timescale: u32) -> u64 {
    (time_us.max(0) as u128 * timescale as u128 / 1_000_000) as u64
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Movie-timescale duration of a track.
fn movie_duration(ticks: u64, timescale: u32) -> u64 {
    (ticks as u128 * MOVIE_TIMESCALE as u128 / timescale as u128) as u64
}

/// Movie-timescale ticks of a signed time in microseconds.
fn movie_ticks(time_us: i64) -> u64 {
    us_to_ticks(time_us.saturating_abs(), MOVIE_TIMESCALE)
}

/// Presentation duration of a track in movie timescale units, including
/// the start offset its edit list applies.
fn presentation_duration(media_ticks: u64, timescale: u32, start_offset_us: i64) -> u64 {
    let media = movie_duration(media_ticks, timescale);
    if start_offset_us >= 0 {
        media.saturating_add(movie_ticks(start_offset_us))
    } else {
        media.saturating_sub(movie_ticks(start_offset_us))
    }
}

trait WriteSeek: Write + Seek + Send {}
impl<T: Write + Seek + Send> WriteSeek for T {}

/// MP4 muxer.
///
/// Samples go straight to the `mdat` atom as they arrive; the sample
/// tables are kept in memory and written in `moov` on close.
pub struct Mp4Muxer {
    /// Writer, `None` once closed.
    writer: Option<Box<dyn WriteSeek>>,
    /// Configuration from the factory.
    config: Mp4MuxerConfig,
    /// Tracks, indexed by track id.
    tracks: Vec<TrackState>,
    /// Metadata entries retained so far.
    metadata: Mp4Metadata,
    /// mdat start offset.
    mdat_start: u64,
    /// Offset of the next byte written to mdat.
    write_offset: u64,
    /// Earliest first sample time across tracks.
    first_presentation_time_us: Option<i64>,
    /// Track of the previous sample written to mdat.
    last_written_track: Option<usize>,
    /// Set when the output failed; the instance is unusable afterwards.
    failure: Option<String>,
    /// Close has been called.
    closed: bool,
}

impl Mp4Muxer {
    /// Create a muxer writing to `writer`.
    ///
    /// Writes `ftyp` and the `mdat` header immediately.
    pub fn new<W: Write + Seek + Send + 'static>(writer: W, config: Mp4MuxerConfig) -> io::Result<Self> {
        let mut writer: Box<dyn WriteSeek> = Box::new(writer);
        write_ftyp(&mut *writer, config.brand)?;

        let mdat_start = writer.stream_position()?;
        // Write placeholder for 64-bit size
        writer.write_all(&[0, 0, 0, 1])?; // size = 1 means extended size
        writer.write_all(b"mdat")?;
        writer.write_all(&[0u8; 8])?; // placeholder for extended size

        Ok(Self {
            writer: Some(writer),
            config,
            tracks: Vec::new(),
            metadata: Mp4Metadata::default(),
            mdat_start,
            write_offset: mdat_start + 16,
            first_presentation_time_us: None,
            last_written_track: None,
            failure: None,
            closed: false,
        })
    }

    /// Number of registered tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Whether close has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Patch the mdat size and append moov and any trailing atoms.
    fn finish(&mut self, writer: &mut dyn WriteSeek) -> io::Result<u64> {
        if let Some(limit) = self.config.video_duration_us {
            let end_us = self.presentation_start_us().saturating_add(limit);
            for (index, track) in self.tracks.iter_mut().enumerate() {
                if !track.entry.is_video() {
                    continue;
                }
                // The start may have moved earlier after these were accepted.
                let dropped = track.truncate_from(end_us);
                if dropped > 0 {
                    warn!(
                        track_id = index,
                        dropped,
                        video_duration_us = limit,
                        "Dropping video samples beyond the enforced duration"
                    );
                }
                track.end_time_us = Some(end_us);
            }
        }

        let mdat_size = self.write_offset - self.mdat_start;

        // Update mdat size
        writer.seek(SeekFrom::Start(self.mdat_start + 8))?;
        writer.write_all(&write_u64_be(mdat_size))?;
        writer.seek(SeekFrom::Start(self.write_offset))?;

        writer.write_all(&self.build_moov())?;
        if let Some(xmp) = self.metadata.build_xmp() {
            writer.write_all(&xmp)?;
        }
        writer.flush()?;

        Ok(mdat_size)
    }

    /// Start of the presentation.
    ///
    /// Tracks are placed relative to the earliest first sample across
    /// tracks. When some track starts before zero, times stay absolute and
    /// that track's edit list skips the negative part.
    fn presentation_start_us(&self) -> i64 {
        self.first_presentation_time_us.unwrap_or(0).max(0)
    }

    /// Build moov atom data.
    fn build_moov(&self) -> Vec<u8> {
        let start_us = self.presentation_start_us();
        // Tracks without samples are left out of the file.
        let written: Vec<TrackLayout<'_>> = self
            .tracks
            .iter()
            .filter_map(|track| {
                let first = track.first_presentation_time_us()?;
                let durations = track.sample_durations(self.config.last_sample_duration);
                let media_duration = durations.iter().map(|&d| d as u64).sum();
                Some(TrackLayout {
                    track,
                    durations,
                    media_duration,
                    start_offset_us: first - start_us,
                })
            })
            .collect();

        let max_duration = written
            .iter()
            .map(|layout| layout.presentation_duration())
            .max()
            .unwrap_or(0);

        let mut boxes = vec![self.build_mvhd(max_duration, written.len() as u32 + 1)];
        boxes.extend(self.metadata.build_udta());
        boxes.extend(self.metadata.build_meta());
        for (i, layout) in written.iter().enumerate() {
            boxes.push(self.build_trak(layout, i as u32 + 1));
        }

        make_container(b"moov", boxes)
    }

    /// Build mvhd atom.
    fn build_mvhd(&self, duration: u64, next_track_id: u32) -> Vec<u8> {
        let version = if duration > u32::MAX as u64 { 1u8 } else { 0u8 };

        let mut data = Vec::with_capacity(108);
        self.push_times(&mut data, version, MOVIE_TIMESCALE, duration);

        // Rate (1.0 = 0x00010000)
        data.extend_from_slice(&write_u32_be(0x00010000));
        // Volume (1.0 = 0x0100)
        data.extend_from_slice(&[0x01, 0x00]);
        // Reserved
        data.extend_from_slice(&[0u8; 10]);
        push_matrix(&mut data, &super::metadata::rotation_matrix(0));
        // Pre-defined
        data.extend_from_slice(&[0u8; 24]);
        data.extend_from_slice(&write_u32_be(next_track_id));

        make_full_box(b"mvhd", version, 0, &data)
    }

    /// Creation time, modification time, timescale and duration, sized by
    /// the atom version.
    fn push_times(&self, data: &mut Vec<u8>, version: u8, timescale: u32, duration: u64) {
        let creation = self.metadata.creation_seconds();
        let modification = self.metadata.modification_seconds();
        if version == 1 {
            data.extend_from_slice(&write_u64_be(creation as u64));
            data.extend_from_slice(&write_u64_be(modification as u64));
            data.extend_from_slice(&write_u32_be(timescale));
            data.extend_from_slice(&write_u64_be(duration));
        } else {
            data.extend_from_slice(&write_u32_be(creation));
            data.extend_from_slice(&write_u32_be(modification));
            data.extend_from_slice(&write_u32_be(timescale));
            data.extend_from_slice(&write_u32_be(duration as u32));
        }
    }

    /// Build trak atom.
    fn build_trak(&self, layout: &TrackLayout<'_>, track_id: u32) -> Vec<u8> {
        let track = layout.track;
        let mdia = make_container(
            b"mdia",
            [
                self.build_mdhd(track, layout.media_duration),
                build_hdlr(track.track_type()),
                build_minf(track, &layout.durations),
            ],
        );

        let mut boxes = vec![self.build_tkhd(track, track_id, layout.presentation_duration())];
        boxes.extend(build_edts(layout));
        boxes.push(mdia);
        make_container(b"trak", boxes)
    }

    /// Build tkhd atom.
    fn build_tkhd(&self, track: &TrackState, track_id: u32, duration: u64) -> Vec<u8> {
        let version = if duration > u32::MAX as u64 { 1u8 } else { 0u8 };
        let creation = self.metadata.creation_seconds();
        let modification = self.metadata.modification_seconds();

        let mut data = Vec::with_capacity(92);
        if version == 1 {
            data.extend_from_slice(&write_u64_be(creation as u64));
            data.extend_from_slice(&write_u64_be(modification as u64));
            data.extend_from_slice(&write_u32_be(track_id));
            data.extend_from_slice(&[0u8; 4]); // reserved
            data.extend_from_slice(&write_u64_be(duration));
        } else {
            data.extend_from_slice(&write_u32_be(creation));
            data.extend_from_slice(&write_u32_be(modification));
            data.extend_from_slice(&write_u32_be(track_id));
            data.extend_from_slice(&[0u8; 4]); // reserved
            data.extend_from_slice(&write_u32_be(duration as u32));
        }

        // Reserved
        data.extend_from_slice(&[0u8; 8]);
        // Layer and alternate group
        data.extend_from_slice(&[0u8; 4]);
        // Volume (1.0 for audio)
        if track.entry.is_video() {
            data.extend_from_slice(&[0, 0]);
        } else {
            data.extend_from_slice(&[0x01, 0x00]);
        }
        // Reserved
        data.extend_from_slice(&[0u8; 2]);

        if track.entry.is_video() {
            push_matrix(&mut data, &self.metadata.matrix());
            // Width and height (fixed-point 16.16)
            data.extend_from_slice(&write_u32_be(track.format.width.unwrap_or(0) << 16));
            data.extend_from_slice(&write_u32_be(track.format.height.unwrap_or(0) << 16));
        } else {
            push_matrix(&mut data, &super::metadata::rotation_matrix(0));
            data.extend_from_slice(&[0u8; 8]);
        }

        // flags: enabled, in movie, in preview
        make_full_box(b"tkhd", version, 0x7, &data)
    }

    /// Build mdhd atom.
    fn build_mdhd(&self, track: &TrackState, media_duration: u64) -> Vec<u8> {
        let version = if media_duration > u32::MAX as u64 { 1u8 } else { 0u8 };

        let mut data = Vec::with_capacity(32);
        self.push_times(&mut data, version, track.timescale, media_duration);
        data.extend_from_slice(&language_code(track.format.language.as_deref()).to_be_bytes());
        // Pre-defined
        data.extend_from_slice(&[0, 0]);

        make_full_box(b"mdhd", version, 0, &data)
    }
}

/// A track as it is laid out in `moov`.
struct TrackLayout<'a> {
    track: &'a TrackState,
    /// Per-sample durations in track timescale units.
    durations: Vec<u32>,
    /// Sum of `durations`.
    media_duration: u64,
    /// First sample time relative to the presentation start.
    start_offset_us: i64,
}

impl TrackLayout<'_> {
    /// Duration in movie timescale units, including the start offset.
    fn presentation_duration(&self) -> u64 {
        presentation_duration(self.media_duration, self.track.timescale, self.start_offset_us)
    }
}

/// Build edts atom, if the track does not start at the presentation start.
///
/// A later start is an empty edit followed by the whole media. An earlier
/// (negative) start skips the media before zero.
fn build_edts(layout: &TrackLayout<'_>) -> Option<Vec<u8>> {
    let offset_us = layout.start_offset_us;
    if offset_us == 0 {
        return None;
    }
    let media = movie_duration(layout.media_duration, layout.track.timescale);

    let mut data = Vec::with_capacity(44);
    if offset_us > 0 {
        data.extend_from_slice(&write_u32_be(2)); // entry count
        push_edit(&mut data, movie_ticks(offset_us), -1);
        push_edit(&mut data, media, 0);
    } else {
        let skipped = offset_us.saturating_abs();
        data.extend_from_slice(&write_u32_be(1)); // entry count
        push_edit(
            &mut data,
            media.saturating_sub(movie_ticks(skipped)),
            us_to_ticks(skipped, layout.track.timescale) as i64,
        );
    }

    Some(make_box(b"edts", &make_full_box(b"elst", 1, 0, &data)))
}

/// Append a version 1 elst entry at normal rate.
fn push_edit(data: &mut Vec<u8>, segment_duration: u64, media_time: i64) {
    data.extend_from_slice(&write_u64_be(segment_duration));
    data.extend_from_slice(&media_time.to_be_bytes());
    data.extend_from_slice(&[0, 1, 0, 0]); // media rate 1.0
}

/// Write ftyp atom.
fn write_ftyp(writer: &mut dyn WriteSeek, major_brand: Mp4Brand) -> io::Result<()> {
    let compatible = [Mp4Brand::Isom, Mp4Brand::Iso2, Mp4Brand::Mp41];

    let mut data = Vec::with_capacity(8 + compatible.len() * 4);
    data.extend_from_slice(&major_brand.to_bytes());
    data.extend_from_slice(&write_u32_be(0x200)); // minor version
    for brand in compatible {
        data.extend_from_slice(&brand.to_bytes());
    }

    writer.write_all(&make_box(b"ftyp", &data))
}

fn push_matrix(data: &mut Vec<u8>, matrix: &[i32; 9]) {
    for value in matrix {
        data.extend_from_slice(&value.to_be_bytes());
    }
}

/// Packed ISO 639-2/T language code, `und` when missing or malformed.
fn language_code(language: Option<&str>) -> u16 {
    const UNDETERMINED: u16 = 0x55C4;
    let code = match language {
        Some(code) if code.len() == 3 && code.bytes().all(|b| b.is_ascii_lowercase()) => code.as_bytes(),
        _ => return UNDETERMINED,
    };
    code.iter()
        .fold(0u16, |packed, &c| (packed << 5) | u16::from(c - 0x60))
}

/// Build hdlr atom.
fn build_hdlr(track_type: TrackType) -> Vec<u8> {
    let (handler_type, name) = match track_type {
        TrackType::Video => (b"vide", "VideoHandle"),
        _ => (b"soun", "SoundHandle"),
    };

    let mut data = Vec::new();
    data.extend_from_slice(&[0u8; 4]); // pre-defined
    data.extend_from_slice(handler_type);
    data.extend_from_slice(&[0u8; 12]); // reserved
    data.extend_from_slice(name.as_bytes());
    data.push(0); // null terminator

    make_full_box(b"hdlr", 0, 0, &data)
}

/// Build minf atom.
fn build_minf(track: &TrackState, durations: &[u32]) -> Vec<u8> {
    // vmhd or smhd
    let media_header = if track.entry.is_video() {
        make_full_box(b"vmhd", 0, 1, &[0u8; 8]) // graphics mode and opcolor
    } else {
        make_full_box(b"smhd", 0, 0, &[0u8; 4]) // balance and reserved
    };

    // dinf with a self-contained url entry
    let mut dref = Vec::new();
    dref.extend_from_slice(&write_u32_be(1)); // entry count
    dref.extend_from_slice(&make_full_box(b"url ", 0, 1, &[]));
    let dinf = make_box(b"dinf", &make_full_box(b"dref", 0, 0, &dref));

    make_container(b"minf", [media_header, dinf, build_stbl(track, durations)])
}

/// Build stbl atom.
fn build_stbl(track: &TrackState, durations: &[u32]) -> Vec<u8> {
    let mut stbl = vec![build_stsd(track), build_stts(durations)];
    if track.entry.is_video() {
        stbl.push(build_stss(track));
    }
    stbl.push(build_stsc(track));
    stbl.push(build_stsz(track));
    stbl.push(build_stco(track));
    make_container(b"stbl", stbl)
}

/// Build stsd atom.
fn build_stsd(track: &TrackState) -> Vec<u8> {
    let entry = if track.entry.is_video() {
        build_video_sample_entry(track)
    } else {
        build_audio_sample_entry(track)
    };

    let mut data = Vec::with_capacity(entry.len() + 4);
    data.extend_from_slice(&write_u32_be(1)); // entry count
    data.extend_from_slice(&entry);
    make_full_box(b"stsd", 0, 0, &data)
}

/// Build video sample entry.
fn build_video_sample_entry(track: &TrackState) -> Vec<u8> {
    let width = track.format.width.unwrap_or(0) as u16;
    let height = track.format.height.unwrap_or(0) as u16;

    let mut data = Vec::new();
    data.extend_from_slice(&[0u8; 6]); // reserved
    data.extend_from_slice(&[0, 1]); // data reference index
    data.extend_from_slice(&[0u8; 16]); // pre-defined and reserved
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&write_u32_be(0x00480000)); // horiz resolution
    data.extend_from_slice(&write_u32_be(0x00480000)); // vert resolution
    data.extend_from_slice(&[0u8; 4]); // reserved
    data.extend_from_slice(&[0, 1]); // frame count
    data.extend_from_slice(&[0u8; 32]); // compressor name
    data.extend_from_slice(&[0, 0x18]); // depth (24-bit)
    data.extend_from_slice(&[0xFF, 0xFF]); // pre-defined

    // Decoder configuration record (avcC, hvcC, vpcC, av1C)
    if let (Some(config_type), Some(extra)) =
        (track.entry.config_box_type(), track.format.codec_specific_data.as_ref())
    {
        data.extend_from_slice(&make_box(&config_type, extra));
    }

    make_box(&track.entry.to_bytes(), &data)
}

/// Build audio sample entry.
fn build_audio_sample_entry(track: &TrackState) -> Vec<u8> {
    let channels = track.format.channel_count.unwrap_or(0);
    let sample_rate = track.format.sample_rate.unwrap_or(0);

    let mut data = Vec::new();
    data.extend_from_slice(&[0u8; 6]); // reserved
    data.extend_from_slice(&[0, 1]); // data reference index
    data.extend_from_slice(&[0u8; 8]); // reserved
    data.extend_from_slice(&channels.to_be_bytes());
    data.extend_from_slice(&16u16.to_be_bytes()); // sample size
    data.extend_from_slice(&[0u8; 4]); // pre-defined and reserved
    data.extend_from_slice(&write_u32_be(sample_rate << 16)); // sample rate (16.16)

    match track.entry {
        SampleEntryType::Opus => data.extend_from_slice(&build_dops(&track.format)),
        _ => data.extend_from_slice(&build_esds(&track.format)),
    }

    make_box(&track.entry.to_bytes(), &data)
}

/// Build esds box for AAC.
fn build_esds(format: &Format) -> Vec<u8> {
    let extra = format.codec_specific_data.as_deref().unwrap_or(&[]);

    let mut data = Vec::new();

    // ES descriptor
    data.push(0x03); // ES_DescrTag
    data.push((23 + extra.len()) as u8);
    data.extend_from_slice(&[0, 1]); // ES_ID
    data.push(0); // flags

    // DecoderConfigDescriptor
    data.push(0x04); // DecoderConfigDescrTag
    data.push((15 + extra.len()) as u8);
    data.push(0x40); // objectTypeIndication (AAC)
    data.push(0x15); // streamType (audio)
    data.extend_from_slice(&[0, 0, 0]); // buffer size
    data.extend_from_slice(&write_u32_be(128000)); // max bitrate
    data.extend_from_slice(&write_u32_be(128000)); // avg bitrate

    // DecoderSpecificInfo
    data.push(0x05); // DecSpecificInfoTag
    data.push(extra.len() as u8);
    data.extend_from_slice(extra);

    // SLConfigDescriptor
    data.push(0x06); // SLConfigDescrTag
    data.push(1);
    data.push(0x02);

    make_full_box(b"esds", 0, 0, &data)
}

/// Build dOps box for Opus.
///
/// An `OpusHead` identification header is converted field by field from
/// little to big endian; without one, a stereo-free mapping is derived
/// from the format.
fn build_dops(format: &Format) -> Vec<u8> {
    let mut data = vec![0u8]; // version
    match format.codec_specific_data.as_deref() {
        Some(head) if head.len() >= 19 && head.starts_with(b"OpusHead") => {
            data.push(head[9]); // output channel count
            data.extend_from_slice(&u16::from_le_bytes([head[10], head[11]]).to_be_bytes()); // pre-skip
            data.extend_from_slice(
                &u32::from_le_bytes([head[12], head[13], head[14], head[15]]).to_be_bytes(),
            ); // input sample rate
            data.extend_from_slice(&i16::from_le_bytes([head[16], head[17]]).to_be_bytes()); // output gain
            data.push(head[18]); // channel mapping family
            data.extend_from_slice(&head[19..]); // channel mapping table
        }
        _ => {
            data.push(format.channel_count.unwrap_or(2).min(u8::MAX as u16) as u8);
            data.extend_from_slice(&[0, 0]); // pre-skip
            data.extend_from_slice(&write_u32_be(format.sample_rate.unwrap_or(48000)));
            data.extend_from_slice(&[0, 0]); // output gain
            data.push(0); // channel mapping family
        }
    }
    make_box(b"dOps", &data)
}

/// Build stts atom.
fn build_stts(durations: &[u32]) -> Vec<u8> {
    // Compress runs of same duration
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for &duration in durations {
        match entries.last_mut() {
            Some(last) if last.1 == duration => last.0 += 1,
            _ => entries.push((1, duration)),
        }
    }

    let mut data = Vec::with_capacity(4 + entries.len() * 8);
    data.extend_from_slice(&write_u32_be(entries.len() as u32));
    for (count, delta) in entries {
        data.extend_from_slice(&write_u32_be(count));
        data.extend_from_slice(&write_u32_be(delta));
    }
    make_full_box(b"stts", 0, 0, &data)
}

/// Build stss atom.
fn build_stss(track: &TrackState) -> Vec<u8> {
    let keyframes: Vec<u32> = track
        .samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.keyframe)
        .map(|(i, _)| i as u32 + 1)
        .collect();

    let mut data = Vec::with_capacity(4 + keyframes.len() * 4);
    data.extend_from_slice(&write_u32_be(keyframes.len() as u32));
    for sample_num in keyframes {
        data.extend_from_slice(&write_u32_be(sample_num));
    }
    make_full_box(b"stss", 0, 0, &data)
}

/// Build stsc atom.
fn build_stsc(track: &TrackState) -> Vec<u8> {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for (i, chunk) in track.chunks.iter().enumerate() {
        let samples_per_chunk = chunk.sample_count as u32;
        if entries.last().map(|e| e.1) != Some(samples_per_chunk) {
            entries.push((i as u32 + 1, samples_per_chunk));
        }
    }

    let mut data = Vec::with_capacity(4 + entries.len() * 12);
    data.extend_from_slice(&write_u32_be(entries.len() as u32));
    for (first_chunk, samples) in entries {
        data.extend_from_slice(&write_u32_be(first_chunk));
        data.extend_from_slice(&write_u32_be(samples));
        data.extend_from_slice(&write_u32_be(1)); // sample description index
    }
    make_full_box(b"stsc", 0, 0, &data)
}

/// Build stsz atom.
fn build_stsz(track: &TrackState) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + track.samples.len() * 4);
    data.extend_from_slice(&write_u32_be(0)); // sample size (variable)
    data.extend_from_slice(&write_u32_be(track.samples.len() as u32));
    for sample in &track.samples {
        data.extend_from_slice(&write_u32_be(sample.size));
    }
    make_full_box(b"stsz", 0, 0, &data)
}

/// Build stco or co64 atom.
fn build_stco(track: &TrackState) -> Vec<u8> {
    let use_64bit = track.chunks.iter().any(|c| c.offset > u32::MAX as u64);

    let mut data = Vec::new();
    data.extend_from_slice(&write_u32_be(track.chunks.len() as u32));
    for chunk in &track.chunks {
        if use_64bit {
            data.extend_from_slice(&write_u64_be(chunk.offset));
        } else {
            data.extend_from_slice(&write_u32_be(chunk.offset as u32));
        }
    }

    let box_type = if use_64bit { b"co64" } else { b"stco" };
    make_full_box(box_type, 0, 0, &data)
}

impl Muxer for Mp4Muxer {
    fn add_track(&mut self, format: &Format) -> MuxerResult<TrackId> {
        if self.closed {
            return Err(MuxerError::add_track("muxer is closed"));
        }
        if let Some(reason) = &self.failure {
            return Err(MuxerError::add_track(format!("muxer failed earlier: {}", reason)));
        }

        let track = TrackState::new(format.clone())?;
        let track_id = TrackId(self.tracks.len() as u32);
        debug!(
            track_id = %track_id,
            mime = %format.sample_mime_type,
            timescale = track.timescale,
            "Added MP4 track"
        );
        self.tracks.push(track);
        Ok(track_id)
    }

    fn write_sample_data(&mut self, track_id: TrackId, data: &[u8], info: &BufferInfo) -> MuxerResult<()> {
        let pts = info.presentation_time_us;
        let fail = |reason: String| MuxerError::write(pts, info.size, reason);

        if self.closed {
            return Err(fail("muxer is closed".into()));
        }
        if let Some(reason) = &self.failure {
            return Err(fail(format!("muxer failed earlier: {}", reason)));
        }
        let payload = info.payload(data).ok_or_else(|| {
            fail(format!(
                "range at offset {} is outside the {} byte buffer",
                info.offset,
                data.len()
            ))
        })?;

        let index = track_id.index();
        let track = self
            .tracks
            .get_mut(index)
            .ok_or_else(|| fail(format!("unknown track {}", track_id)))?;
        if track.ended {
            return Err(fail(format!("track {} already ended", track_id)));
        }
        if let Some(last) = track.last_presentation_time_us() {
            if pts < last {
                return Err(fail(format!(
                    "timestamp decreased from {} on track {}",
                    last, track_id
                )));
            }
        }

        if info.is_codec_config() {
            if track.format.codec_specific_data.is_none() {
                debug!(track_id = %track_id, size = payload.len(), "Using in-band codec config");
                track.format.codec_specific_data = Some(payload.to_vec());
            }
            return Ok(());
        }

        if info.is_end_of_stream() && payload.is_empty() {
            track.end_time_us = Some(pts);
            track.ended = true;
            return Ok(());
        }

        if let Some(limit) = self.config.video_duration_us {
            // The earliest start seen so far; it can only move earlier.
            let start_us = self
                .first_presentation_time_us
                .map_or(pts, |first| first.min(pts))
                .max(0);
            if track.entry.is_video() && pts.saturating_sub(start_us) >= limit {
                warn!(
                    track_id = %track_id,
                    presentation_time_us = pts,
                    video_duration_us = limit,
                    "Dropping video sample beyond the enforced duration"
                );
                return Ok(());
            }
        }

        let convert = self.config.convert_annex_b && track.entry.is_nal_length_prefixed();
        let payload: Cow<'_, [u8]> = if convert && annexb::is_annex_b(payload) {
            Cow::Owned(annexb::annex_b_to_avcc(payload))
        } else {
            Cow::Borrowed(payload)
        };
        let size = u32::try_from(payload.len()).map_err(|_| fail("sample is too large".into()))?;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| fail("muxer is closed".into()))?;
        let offset = self.write_offset;
        if let Err(e) = writer.write_all(&payload) {
            self.failure = Some(e.to_string());
            return Err(fail(format!("I/O error: {}", e)));
        }
        self.write_offset += payload.len() as u64;
        self.first_presentation_time_us =
            Some(self.first_presentation_time_us.map_or(pts, |first| first.min(pts)));

        track.samples.push(SampleInfo {
            size,
            presentation_time_us: pts,
            keyframe: info.is_key_frame(),
        });

        // A chunk holds consecutive samples of one track.
        let continues_chunk = self.last_written_track == Some(index);
        match track.chunks.last_mut() {
            Some(chunk) if continues_chunk && chunk.sample_count < MAX_SAMPLES_PER_CHUNK => {
                chunk.sample_count += 1;
            }
            _ => track.chunks.push(ChunkInfo {
                offset,
                sample_count: 1,
            }),
        }
        self.last_written_track = Some(index);

        if info.is_end_of_stream() {
            track.ended = true;
        }
        Ok(())
    }

    fn add_metadata_entry(&mut self, entry: MetadataEntry) -> bool {
        let kind = entry.kind().to_string();
        if self.closed {
            warn!(kind = %kind, "Metadata entry rejected, muxer is closed");
            return false;
        }
        match self.metadata.add(entry) {
            Ok(()) => {
                debug!(kind = %kind, "Added metadata entry");
                true
            }
            Err(reason) => {
                debug!(kind = %kind, reason = %reason, "Dropped metadata entry");
                false
            }
        }
    }

    fn close(&mut self) -> MuxerResult<()> {
        if self.closed {
            return Err(MuxerError::close("muxer is already closed"));
        }
        self.closed = true;

        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| MuxerError::close("no output"))?;
        if let Some(reason) = self.failure.take() {
            return Err(MuxerError::close(format!("an earlier write failed: {}", reason)));
        }

        let mdat_size = self
            .finish(&mut *writer)
            .map_err(|e| MuxerError::close(e.to_string()))?;

        info!(
            tracks = self.tracks.iter().filter(|t| !t.samples.is_empty()).count(),
            samples = self.tracks.iter().map(|t| t.samples.len()).sum::<usize>(),
            mdat_size,
            "Finished writing MP4"
        );
        Ok(())
    }
}

impl Drop for Mp4Muxer {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                tracks = self.tracks.len(),
                "MP4 muxer dropped without close, output is incomplete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxkit_core::format::mime;
    use muxkit_core::sample::SampleFlags;
    use std::io::Cursor;

    fn video_track() -> TrackState {
        TrackState::new(Format::video(mime::VIDEO_H264, 640, 480)).unwrap()
    }

    fn push_samples(track: &mut TrackState, times_us: &[i64]) {
        for &t in times_us {
            track.samples.push(SampleInfo {
                size: 1,
                presentation_time_us: t,
                keyframe: true,
            });
        }
    }

    #[test]
    fn test_track_validation() {
        assert!(TrackState::new(Format::new(mime::VIDEO_H264)).is_err());
        assert!(TrackState::new(Format::video(mime::VIDEO_H264, 70_000, 480)).is_err());
        assert!(TrackState::new(Format::new(mime::AUDIO_AAC)).is_err());
        assert!(TrackState::new(Format::audio(mime::AUDIO_VORBIS, 48000, 2)).is_err());
        assert!(TrackState::new(Format::audio(mime::AUDIO_AAC, 48000, 2).with_codec_specific_data(vec![0; 105]))
            .is_err());

        assert!(TrackState::new(Format::audio(mime::AUDIO_AAC, 96_000, 2)).is_err());
        assert!(TrackState::new(Format::audio(mime::AUDIO_AAC, 65_535, 2)).is_ok());

        let audio = TrackState::new(Format::audio(mime::AUDIO_AAC, 44100, 2)).unwrap();
        assert_eq!(audio.timescale, 44100);
        assert_eq!(video_track().timescale, VIDEO_TIMESCALE);
    }

    #[test]
    fn test_durations_duplicate_previous() {
        let mut track = video_track();
        push_samples(&mut track, &[0, 33_333, 66_666]);
        assert_eq!(
            track.sample_durations(LastSampleDuration::DuplicatePrevious),
            vec![2999, 3000, 3000]
        );
        assert_eq!(track.sample_durations(LastSampleDuration::Zero), vec![2999, 3000, 0]);
    }

    #[test]
    fn test_durations_with_end_time() {
        let mut track = video_track();
        push_samples(&mut track, &[1_000_000, 1_100_000]);
        track.end_time_us = Some(1_500_000);
        assert_eq!(track.sample_durations(LastSampleDuration::Zero), vec![9000, 36000]);

        // An end before the last sample gives it no duration.
        track.end_time_us = Some(1_050_000);
        assert_eq!(track.sample_durations(LastSampleDuration::Zero), vec![9000, 0]);
    }

    #[test]
    fn test_single_sample_duration() {
        let mut track = video_track();
        push_samples(&mut track, &[0]);
        assert_eq!(track.sample_durations(LastSampleDuration::DuplicatePrevious), vec![0]);
    }

    #[test]
    fn test_language_code() {
        assert_eq!(language_code(None), 0x55C4);
        assert_eq!(language_code(Some("und")), 0x55C4);
        assert_eq!(language_code(Some("eng")), 0x15C7);
        assert_eq!(language_code(Some("en-US")), 0x55C4);
    }

    #[test]
    fn test_stsc_groups_equal_chunks() {
        let mut track = video_track();
        track.chunks = vec![
            ChunkInfo { offset: 0, sample_count: 10 },
            ChunkInfo { offset: 10, sample_count: 10 },
            ChunkInfo { offset: 20, sample_count: 3 },
        ];
        let stsc = build_stsc(&track);
        // Two entries: (1, 10, 1) and (3, 3, 1).
        assert_eq!(&stsc[12..16], &2u32.to_be_bytes());
        assert_eq!(&stsc[16..28], &[0, 0, 0, 1, 0, 0, 0, 10, 0, 0, 0, 1]);
        assert_eq!(&stsc[28..40], &[0, 0, 0, 3, 0, 0, 0, 3, 0, 0, 0, 1]);
    }

    #[test]
    fn test_dops_from_opus_head() {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2, 0x38, 0x01, 0x80, 0xBB, 0, 0, 0, 0, 0]);
        let format = Format::audio(mime::AUDIO_OPUS, 48000, 2).with_codec_specific_data(head);
        let dops = build_dops(&format);
        assert_eq!(&dops[4..8], b"dOps");
        assert_eq!(&dops[8..], &[0, 2, 0x01, 0x38, 0, 0, 0xBB, 0x80, 0, 0, 0]);
    }

    #[test]
    fn test_chunks_split_on_interleave() {
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), Mp4MuxerConfig::default()).unwrap();
        let video = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
        let audio = muxer.add_track(&Format::audio(mime::AUDIO_AAC, 48000, 2)).unwrap();

        for i in 0..3i64 {
            let info = BufferInfo::new(i * 33_333, 4, SampleFlags::KEY_FRAME);
            muxer.write_sample_data(video, &[0; 4], &info).unwrap();
        }
        for i in 0..2i64 {
            let info = BufferInfo::new(i * 21_333, 2, SampleFlags::empty());
            muxer.write_sample_data(audio, &[0; 2], &info).unwrap();
        }
        let info = BufferInfo::new(100_000, 4, SampleFlags::empty());
        muxer.write_sample_data(video, &[0; 4], &info).unwrap();

        let video_chunks: Vec<usize> = muxer.tracks[0].chunks.iter().map(|c| c.sample_count).collect();
        let audio_chunks: Vec<usize> = muxer.tracks[1].chunks.iter().map(|c| c.sample_count).collect();
        assert_eq!(video_chunks, vec![3, 1]);
        assert_eq!(audio_chunks, vec![2]);
        // ftyp (28 bytes) then the 16 byte mdat header.
        assert_eq!(muxer.tracks[0].chunks[0].offset, 44);
        assert_eq!(muxer.tracks[1].chunks[0].offset, 56);

        muxer.close().unwrap();
    }

    #[test]
    fn test_chunk_limit() {
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), Mp4MuxerConfig::default()).unwrap();
        let video = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
        for i in 0..(MAX_SAMPLES_PER_CHUNK as i64 + 1) {
            let info = BufferInfo::new(i * 1000, 1, SampleFlags::empty());
            muxer.write_sample_data(video, &[0], &info).unwrap();
        }
        let chunks: Vec<usize> = muxer.tracks[0].chunks.iter().map(|c| c.sample_count).collect();
        assert_eq!(chunks, vec![MAX_SAMPLES_PER_CHUNK, 1]);
        muxer.close().unwrap();
    }

    #[test]
    fn test_truncate_from() {
        let mut track = video_track();
        push_samples(&mut track, &[0, 1000, 2000, 3000, 4000]);
        track.chunks = vec![
            ChunkInfo { offset: 0, sample_count: 2 },
            ChunkInfo { offset: 2, sample_count: 3 },
        ];

        assert_eq!(track.truncate_from(2500), 2);
        assert_eq!(track.samples.len(), 3);
        let chunks: Vec<usize> = track.chunks.iter().map(|c| c.sample_count).collect();
        assert_eq!(chunks, vec![2, 1]);

        assert_eq!(track.truncate_from(500), 2);
        assert_eq!(track.chunks.len(), 1);
        assert_eq!(track.chunks[0].sample_count, 1);
        assert_eq!(track.truncate_from(10_000), 0);
    }

    #[test]
    fn test_write_offset_counts_payload_bytes() {
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), Mp4MuxerConfig::default()).unwrap();
        let audio = muxer.add_track(&Format::audio(mime::AUDIO_AAC, 48000, 2)).unwrap();
        assert_eq!(muxer.write_offset, 44);
        for i in 0..3i64 {
            let info = BufferInfo::new(i * 21_333, 5, SampleFlags::empty());
            muxer.write_sample_data(audio, &[7; 5], &info).unwrap();
        }
        assert_eq!(muxer.write_offset, 59);
        assert_eq!(muxer.tracks[0].chunks[0].offset, 44);
        muxer.close().unwrap();
    }

    #[test]
    fn test_annex_b_sample_is_length_prefixed() {
        let sample = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0, 0, 1, 0x06, 0x05];

        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), Mp4MuxerConfig::default()).unwrap();
        let video = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
        let audio = muxer.add_track(&Format::audio(mime::AUDIO_AAC, 48000, 2)).unwrap();
        let info = BufferInfo::new(0, sample.len(), SampleFlags::KEY_FRAME);
        muxer.write_sample_data(video, &sample, &info).unwrap();
        muxer.write_sample_data(audio, &sample, &info).unwrap();

        // Two NAL units with 4-byte lengths replace the start codes.
        assert_eq!(muxer.tracks[0].samples[0].size, 4 + 3 + 4 + 2);
        // Audio payloads are never rewritten.
        assert_eq!(muxer.tracks[1].samples[0].size, sample.len() as u32);
        muxer.close().unwrap();

        let config = Mp4MuxerConfig {
            convert_annex_b: false,
            ..Default::default()
        };
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), config).unwrap();
        let video = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
        muxer.write_sample_data(video, &sample, &info).unwrap();
        assert_eq!(muxer.tracks[0].samples[0].size, sample.len() as u32);
        muxer.close().unwrap();
    }

    #[test]
    fn test_edit_list_entries() {
        let mut track = video_track();
        push_samples(&mut track, &[300_000, 400_000]);
        let track = &track;
        let layout = move |start_offset_us| TrackLayout {
            track,
            durations: vec![9000, 9000],
            media_duration: 18000,
            start_offset_us,
        };

        assert!(build_edts(&layout(0)).is_none());

        // Empty edit for 300 ms, then the 200 ms of media.
        let later = layout(300_000);
        let edts = build_edts(&later).unwrap();
        assert_eq!(&edts[4..8], b"edts");
        assert_eq!(&edts[12..16], b"elst");
        assert_eq!(edts[16], 1); // version
        assert_eq!(&edts[20..24], &2u32.to_be_bytes());
        assert_eq!(&edts[24..32], &300u64.to_be_bytes());
        assert_eq!(&edts[32..40], &(-1i64).to_be_bytes());
        assert_eq!(&edts[40..44], &[0, 1, 0, 0]);
        assert_eq!(&edts[44..52], &200u64.to_be_bytes());
        assert_eq!(&edts[52..60], &0i64.to_be_bytes());
        assert_eq!(later.presentation_duration(), 500);

        // Starting 100 ms early skips 9000 ticks of media.
        let earlier = layout(-100_000);
        let edts = build_edts(&earlier).unwrap();
        assert_eq!(&edts[20..24], &1u32.to_be_bytes());
        assert_eq!(&edts[24..32], &100u64.to_be_bytes());
        assert_eq!(&edts[32..40], &9000i64.to_be_bytes());
        assert_eq!(earlier.presentation_duration(), 100);
    }

    #[test]
    fn test_codec_config_sample_is_not_written() {
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), Mp4MuxerConfig::default()).unwrap();
        let video = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
        let info = BufferInfo::new(0, 3, SampleFlags::CODEC_CONFIG);
        muxer.write_sample_data(video, &[1, 2, 3], &info).unwrap();
        assert!(muxer.tracks[0].samples.is_empty());
        assert_eq!(muxer.tracks[0].format.codec_specific_data, Some(vec![1, 2, 3]));
        muxer.close().unwrap();
    }
}
