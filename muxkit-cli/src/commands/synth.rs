//! Synthetic MP4 generation command.

use clap::Args;
use console::style;
use muxkit_containers::{with_muxer, DefaultMuxerFactory};
use muxkit_core::effect::{TimestampAdjustment, VideoEffect};
use muxkit_core::error::Error;
use muxkit_core::format::{mime, Format};
use muxkit_core::sample::{BufferInfo, SampleFlags};
use muxkit_core::speed::ConstantSpeedProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Placeholder access unit: an IDR NAL unit header followed by filler.
const SAMPLE_PAYLOAD: &[u8] = &[0, 0, 0, 4, 0x65, 0x88, 0x84, 0x00];

/// Write a single-track MP4 of synthetic video samples.
#[derive(Args, Debug)]
pub struct CmdSynth {
    /// Output file path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Number of samples to write.
    #[arg(long, default_value = "30")]
    pub samples: u32,

    /// Presentation time between samples in microseconds.
    #[arg(long, default_value = "33333")]
    pub interval_us: i64,

    /// Enforced video duration in microseconds.
    #[arg(long)]
    pub video_duration_us: Option<i64>,

    /// Constant playback speed applied to the sample timestamps.
    #[arg(long)]
    pub speed: Option<f32>,

    /// Key frame interval in samples.
    #[arg(long, default_value = "30")]
    pub gop: u32,
}

impl CmdSynth {
    /// Execute the synth command.
    pub fn run(&self) -> anyhow::Result<()> {
        if self.interval_us <= 0 {
            anyhow::bail!("--interval-us must be positive");
        }
        let gop = self.gop.max(1);

        let adjustment = match self.speed {
            Some(speed) => Some(TimestampAdjustment::new(Arc::new(ConstantSpeedProvider::new(speed)?))),
            None => None,
        };
        let input_duration_us = self.samples as i64 * self.interval_us;
        let video_duration_us = match (self.video_duration_us, &adjustment) {
            (Some(duration), _) => Some(duration),
            (None, Some(adjustment)) => Some(adjustment.duration_after_effect_applied(input_duration_us)),
            (None, None) => None,
        };

        let mut builder = DefaultMuxerFactory::builder();
        if let Some(duration) = video_duration_us {
            builder = builder.video_duration_us(duration);
        }
        let factory = builder.build()?;

        let written = with_muxer(&factory, &self.output, |muxer| -> Result<u32, Error> {
            let track = muxer.add_track(&Format::video(mime::VIDEO_H264, 320, 240).with_frame_rate(30.0))?;
            for i in 0..self.samples {
                let input_time_us = i as i64 * self.interval_us;
                let pts = match &adjustment {
                    Some(adjustment) => adjustment.adjust_timestamp_us(input_time_us),
                    None => input_time_us,
                };
                let flags = if i % gop == 0 { SampleFlags::KEY_FRAME } else { SampleFlags::empty() };
                let info = BufferInfo::new(pts, SAMPLE_PAYLOAD.len(), flags);
                muxer.write_sample_data(track, SAMPLE_PAYLOAD, &info)?;
            }
            Ok(self.samples)
        })?;

        info!(
            path = %self.output.display(),
            samples = written,
            video_duration_us = ?video_duration_us,
            "Wrote synthetic MP4"
        );
        println!(
            "{} {} ({} samples)",
            style("Wrote").green().bold(),
            self.output.display(),
            written
        );
        Ok(())
    }
}
