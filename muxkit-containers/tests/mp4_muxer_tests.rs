//! MP4 muxer tests.
//!
//! These tests write real files through the factories and read the
//! headers back with `Mp4Info`.

use muxkit_containers::mp4::{Mp4Info, Mp4Muxer, Mp4MuxerConfig, Mp4MuxerFactory};
use muxkit_containers::{DefaultMuxerFactory, LastSampleDuration, Muxer, MuxerFactory};
use muxkit_core::error::MuxerError;
use muxkit_core::format::{mime, Format};
use muxkit_core::metadata::MetadataEntry;
use muxkit_core::sample::{BufferInfo, SampleFlags, TrackId};
use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::TempDir;

const FRAME: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];

fn output_path(dir: &TempDir) -> PathBuf {
    dir.path().join("out.mp4")
}

fn write_video(muxer: &mut dyn Muxer, track: TrackId, count: i64, interval_us: i64) {
    write_video_from(muxer, track, 0, count, interval_us);
}

fn write_video_from(muxer: &mut dyn Muxer, track: TrackId, start_us: i64, count: i64, interval_us: i64) {
    for i in 0..count {
        let flags = if i == 0 { SampleFlags::KEY_FRAME } else { SampleFlags::empty() };
        let info = BufferInfo::new(start_us + i * interval_us, FRAME.len(), flags);
        muxer.write_sample_data(track, FRAME, &info).unwrap();
    }
}

// =============================================================================
// Enforced Video Duration
// =============================================================================

#[test]
fn test_enforced_video_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let factory = DefaultMuxerFactory::builder()
        .video_duration_us(5_000_000)
        .build()
        .unwrap();

    let mut muxer = factory.create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
    write_video(muxer.as_mut(), track, 10, 100_000);
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    assert_eq!(info.timescale, 1000);
    assert_eq!(info.duration, 5000);
    assert_eq!(info.duration_us(), 5_000_000);

    let video = info.video_track().unwrap();
    assert_eq!(video.timescale, 90_000);
    assert_eq!(video.duration, 450_000);
    assert_eq!(video.sample_count, 10);
    assert_eq!(video.sample_entry, "avc1");
    assert_eq!((video.width, video.height), (320, 240));
}

#[test]
fn test_samples_beyond_enforced_duration_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let factory = DefaultMuxerFactory::builder()
        .video_duration_us(1_000_000)
        .build()
        .unwrap();

    let mut muxer = factory.create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
    // 0.0 s to 1.4 s; the last five are at or past the limit.
    write_video(muxer.as_mut(), track, 15, 100_000);
    muxer.close().unwrap();

    let video = Mp4Info::from_path(&path).unwrap().tracks.remove(0);
    assert_eq!(video.sample_count, 10);
    assert_eq!(video.duration_us(), 1_000_000);
}

#[test]
fn test_enforced_duration_leaves_audio_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let factory = DefaultMuxerFactory::builder()
        .video_duration_us(2_000_000)
        .build()
        .unwrap();

    let mut muxer = factory.create(&path).unwrap();
    let video = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
    let audio = muxer.add_track(&Format::audio(mime::AUDIO_AAC, 48_000, 2)).unwrap();
    write_video(muxer.as_mut(), video, 3, 100_000);
    for i in 0..3 {
        let info = BufferInfo::new(i * 20_000, 4, SampleFlags::KEY_FRAME);
        muxer.write_sample_data(audio, &[1, 2, 3, 4], &info).unwrap();
    }
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    assert_eq!(info.tracks.len(), 2);
    assert_eq!(info.tracks[0].duration_us(), 2_000_000);

    let sound = &info.tracks[1];
    assert_eq!(sound.handler, "soun");
    assert_eq!(sound.sample_entry, "mp4a");
    assert_eq!(sound.timescale, 48_000);
    // Three 960-tick samples, the last one repeating the previous duration.
    assert_eq!(sound.duration, 2880);
    assert_eq!(info.duration, 2000);
}

#[test]
fn test_enforced_duration_counts_from_first_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let factory = DefaultMuxerFactory::builder()
        .video_duration_us(5_000_000)
        .build()
        .unwrap();

    let mut muxer = factory.create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
    // 1.0 s to 6.9 s; everything from 6.0 s on is past the limit.
    write_video_from(muxer.as_mut(), track, 1_000_000, 60, 100_000);
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    assert_eq!(info.duration, 5000);
    assert_eq!(info.duration_us(), 5_000_000);

    let video = &info.tracks[0];
    assert_eq!(video.sample_count, 50);
    assert_eq!(video.duration, 450_000);
    assert_eq!(info.track_duration_us(video), 5_000_000);
    assert!(!video.has_edit_list);
}

// =============================================================================
// Track Start Offsets
// =============================================================================

#[test]
fn test_delayed_audio_gets_edit_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let mut muxer = DefaultMuxerFactory::new().create(&path).unwrap();
    let video = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240)).unwrap();
    let audio = muxer.add_track(&Format::audio(mime::AUDIO_AAC, 48_000, 2)).unwrap();

    write_video(muxer.as_mut(), video, 3, 100_000);
    for i in 0..3 {
        let info = BufferInfo::new(300_000 + i * 20_000, 4, SampleFlags::KEY_FRAME);
        muxer.write_sample_data(audio, &[1, 2, 3, 4], &info).unwrap();
    }
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    let picture = &info.tracks[0];
    assert!(!picture.has_edit_list);
    assert_eq!(picture.start_offset_us, 0);
    assert_eq!(picture.presentation_duration, 300);

    let sound = &info.tracks[1];
    assert!(sound.has_edit_list);
    assert_eq!(sound.start_offset_us, 300_000);
    assert_eq!(sound.duration, 2880);
    // 300 ms of empty edit plus 60 ms of media.
    assert_eq!(sound.presentation_duration, 360);
    assert_eq!(info.duration, 360);
}

#[test]
fn test_negative_start_skips_media() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let mut muxer = DefaultMuxerFactory::new().create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)).unwrap();
    write_video_from(muxer.as_mut(), track, -100_000, 3, 100_000);
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    let video = &info.tracks[0];
    assert!(video.has_edit_list);
    assert_eq!(video.start_offset_us, -100_000);
    assert_eq!(video.duration_us(), 300_000);
    assert_eq!(info.track_duration_us(video), 200_000);
    assert_eq!(info.duration_us(), 200_000);
}

// =============================================================================
// Annex-B Payloads
// =============================================================================

#[test]
fn test_start_codes_become_length_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let mut muxer = DefaultMuxerFactory::new().create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)).unwrap();
    let sample = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x65, 0x88, 0x84];
    let info = BufferInfo::new(0, sample.len(), SampleFlags::KEY_FRAME);
    muxer.write_sample_data(track, &sample, &info).unwrap();
    muxer.close().unwrap();

    // The sample starts right after ftyp and the 64-bit mdat header.
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[32..36], b"mdat");
    assert_eq!(u64::from_be_bytes(bytes[36..44].try_into().unwrap()), 16 + 13);
    assert_eq!(&bytes[44..57], &[0, 0, 0, 2, 0x67, 0x42, 0, 0, 0, 3, 0x65, 0x88, 0x84]);
}

#[test]
fn test_annex_b_conversion_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let factory = DefaultMuxerFactory::builder().convert_annex_b(false).build().unwrap();
    let mut muxer = factory.create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)).unwrap();
    write_video(muxer.as_mut(), track, 1, 100_000);
    muxer.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[44..44 + FRAME.len()], FRAME);
}

// =============================================================================
// Last Sample Duration
// =============================================================================

#[test]
fn test_last_sample_duration_policies() {
    let dir = tempfile::tempdir().unwrap();

    for (policy, expected) in [
        (LastSampleDuration::DuplicatePrevious, 4 * 3000),
        (LastSampleDuration::Zero, 3 * 3000),
    ] {
        let path = dir.path().join(format!("{:?}.mp4", policy));
        let config = Mp4MuxerConfig {
            last_sample_duration: policy,
            ..Default::default()
        };
        let factory = Mp4MuxerFactory::new(config).unwrap();
        let mut muxer = factory.create(&path).unwrap();
        let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)).unwrap();
        // 3000 ticks per frame at 90 kHz.
        write_video(muxer.as_mut(), track, 4, 33_334);
        muxer.close().unwrap();

        let info = Mp4Info::from_path(&path).unwrap();
        assert_eq!(info.tracks[0].duration, expected, "{:?}", policy);
    }
}

#[test]
fn test_end_of_stream_sets_end_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let mut muxer = DefaultMuxerFactory::new().create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H265, 64, 64)).unwrap();
    write_video(muxer.as_mut(), track, 2, 100_000);
    muxer
        .write_sample_data(track, &[], &BufferInfo::end_of_stream(750_000))
        .unwrap();

    let late = BufferInfo::new(800_000, FRAME.len(), SampleFlags::empty());
    assert!(matches!(
        muxer.write_sample_data(track, FRAME, &late),
        Err(MuxerError::WriteFailed { .. })
    ));
    muxer.close().unwrap();

    let video = Mp4Info::from_path(&path).unwrap().tracks.remove(0);
    assert_eq!(video.sample_entry, "hvc1");
    assert_eq!(video.sample_count, 2);
    assert_eq!(video.duration_us(), 750_000);
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_metadata_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let mut muxer = DefaultMuxerFactory::new().create(&path).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 1920, 1080)).unwrap();

    assert!(muxer.add_metadata_entry(MetadataEntry::Orientation { rotation_degrees: 90 }));
    assert!(muxer.add_metadata_entry(MetadataEntry::Location {
        latitude: 10.5,
        longitude: -20.25,
    }));
    assert!(muxer.add_metadata_entry(MetadataEntry::Timestamp {
        creation_seconds: 3_000_000_000,
        modification_seconds: 3_000_000_001,
    }));
    assert!(muxer.add_metadata_entry(MetadataEntry::mdta_string("com.example.title", "clip")));
    assert!(muxer.add_metadata_entry(MetadataEntry::mdta_float("com.example.fps", 29.97)));
    assert!(muxer.add_metadata_entry(MetadataEntry::Xmp(b"<x:xmpmeta/>".to_vec())));

    write_video(muxer.as_mut(), track, 3, 33_333);
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    assert_eq!(info.creation_seconds, 3_000_000_000);
    assert_eq!(info.location.as_deref(), Some("+10.5000-20.2500/"));
    assert_eq!(info.mdta_keys, vec!["com.example.title", "com.example.fps"]);
    assert!(info.has_xmp);
    assert_eq!(info.tracks[0].rotation_degrees, Some(90));
}

#[test]
fn test_unsupported_metadata_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut muxer = DefaultMuxerFactory::new().create(&output_path(&dir)).unwrap();

    assert!(!muxer.add_metadata_entry(MetadataEntry::Orientation { rotation_degrees: 45 }));
    assert!(!muxer.add_metadata_entry(MetadataEntry::Location {
        latitude: 91.0,
        longitude: 0.0,
    }));
    assert!(!muxer.add_metadata_entry(MetadataEntry::Other {
        kind: "custom".into(),
        payload: vec![1],
    }));
    muxer.close().unwrap();
    assert!(!muxer.add_metadata_entry(MetadataEntry::Orientation { rotation_degrees: 0 }));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_close_without_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let mut muxer = DefaultMuxerFactory::new().create(&path).unwrap();
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    assert_eq!(info.major_brand, "isom");
    assert!(info.tracks.is_empty());
    assert_eq!(info.duration, 0);
}

#[test]
fn test_tracks_without_samples_are_omitted() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_path(&dir);
    let mut muxer = DefaultMuxerFactory::new().create(&path).unwrap();
    let _audio = muxer.add_track(&Format::audio(mime::AUDIO_OPUS, 48_000, 2)).unwrap();
    let video = muxer.add_track(&Format::video(mime::VIDEO_AV1, 64, 64)).unwrap();
    write_video(muxer.as_mut(), video, 2, 40_000);
    muxer.close().unwrap();

    let info = Mp4Info::from_path(&path).unwrap();
    assert_eq!(info.tracks.len(), 1);
    assert_eq!(info.tracks[0].sample_entry, "av01");
    assert_eq!(info.tracks[0].track_id, 1);
}

#[test]
fn test_track_ids_are_unique() {
    let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), Mp4MuxerConfig::default()).unwrap();
    let ids = [
        muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)).unwrap(),
        muxer.add_track(&Format::audio(mime::AUDIO_AAC, 44_100, 1)).unwrap(),
        muxer.add_track(&Format::video(mime::VIDEO_VP9, 64, 64)).unwrap(),
    ];
    assert_eq!(muxer.track_count(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);
    muxer.close().unwrap();
}

#[test]
fn test_rejected_tracks() {
    let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), Mp4MuxerConfig::default()).unwrap();
    for format in [
        Format::new(mime::TEXT_VTT),
        Format::new(mime::VIDEO_H264),
        Format::audio(mime::AUDIO_AAC, 0, 2),
        Format::video(mime::VIDEO_VP8, 64, 64),
    ] {
        assert!(matches!(muxer.add_track(&format), Err(MuxerError::AddTrackFailed(_))));
    }
    assert_eq!(muxer.track_count(), 0);
    muxer.close().unwrap();
}

#[test]
fn test_operations_after_close_fail() {
    let dir = tempfile::tempdir().unwrap();
    let mut muxer = DefaultMuxerFactory::new().create(&output_path(&dir)).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)).unwrap();
    muxer.close().unwrap();

    assert!(matches!(
        muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)),
        Err(MuxerError::AddTrackFailed(_))
    ));
    let info = BufferInfo::new(0, FRAME.len(), SampleFlags::KEY_FRAME);
    assert!(matches!(
        muxer.write_sample_data(track, FRAME, &info),
        Err(MuxerError::WriteFailed { .. })
    ));
    assert!(matches!(muxer.close(), Err(MuxerError::CloseFailed(_))));
}

#[test]
fn test_invalid_writes() {
    let dir = tempfile::tempdir().unwrap();
    let mut muxer = DefaultMuxerFactory::new().create(&output_path(&dir)).unwrap();
    let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 64, 64)).unwrap();

    let unknown = BufferInfo::new(0, FRAME.len(), SampleFlags::KEY_FRAME);
    assert!(muxer.write_sample_data(TrackId(7), FRAME, &unknown).is_err());

    let overrun = BufferInfo::new(0, FRAME.len(), SampleFlags::KEY_FRAME).with_offset(4);
    assert!(muxer.write_sample_data(track, FRAME, &overrun).is_err());

    write_video(muxer.as_mut(), track, 2, 100_000);
    let backwards = BufferInfo::new(50_000, FRAME.len(), SampleFlags::empty());
    assert!(matches!(
        muxer.write_sample_data(track, FRAME, &backwards),
        Err(MuxerError::WriteFailed { presentation_time_us: 50_000, .. })
    ));
    muxer.close().unwrap();
}

#[test]
fn test_open_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("out.mp4");
    let err = DefaultMuxerFactory::new().create(&path).err().unwrap();
    match err {
        MuxerError::OpenFailed { path: failed, .. } => assert_eq!(failed, path),
        other => panic!("unexpected error: {}", other),
    }
}
