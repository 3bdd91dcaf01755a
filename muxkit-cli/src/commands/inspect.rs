//! MP4 header inspection command.

use clap::Args;
use console::style;
use muxkit_containers::mp4::{Mp4Info, Mp4TrackInfo};
use std::path::PathBuf;

/// Print the header summary of an MP4 file.
#[derive(Args, Debug)]
pub struct CmdInspect {
    /// Path to the MP4 file.
    pub file: PathBuf,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdInspect {
    /// Execute the inspect command.
    pub fn run(&self) -> anyhow::Result<()> {
        if !self.file.exists() {
            anyhow::bail!("File not found: {}", self.file.display());
        }

        let info = Mp4Info::from_path(&self.file)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            self.print_info(&info);
        }
        Ok(())
    }

    fn print_info(&self, info: &Mp4Info) {
        println!();
        println!("{}", style("MP4 Information").cyan().bold());
        println!();
        println!("  {:<16} {}", style("File:").white(), self.file.display());
        println!("  {:<16} {}", style("Brand:").white(), info.major_brand);
        println!(
            "  {:<16} {:.3}s",
            style("Duration:").white(),
            info.duration_us() as f64 / 1_000_000.0
        );
        if let Some(location) = &info.location {
            println!("  {:<16} {}", style("Location:").white(), location);
        }
        if !info.mdta_keys.is_empty() {
            println!("  {:<16} {}", style("Metadata:").white(), info.mdta_keys.join(", "));
        }
        if info.has_xmp {
            println!("  {:<16} yes", style("XMP:").white());
        }

        println!();
        println!("{}", style("Tracks").cyan().bold());
        for track in &info.tracks {
            print_track(track);
        }
        println!();
    }
}

fn print_track(track: &Mp4TrackInfo) {
    println!();
    println!(
        "  {} {} ({})",
        style(format!("#{}", track.track_id)).yellow(),
        track.handler,
        track.sample_entry
    );
    println!("    {:<14} {}", "Samples:", track.sample_count);
    println!(
        "    {:<14} {} / {} ({:.3}s)",
        "Duration:",
        track.duration,
        track.timescale,
        track.duration_us() as f64 / 1_000_000.0
    );
    if track.has_edit_list {
        println!(
            "    {:<14} {:.3}s",
            "Start offset:",
            track.start_offset_us as f64 / 1_000_000.0
        );
    }
    if track.is_video() {
        println!("    {:<14} {}x{}", "Size:", track.width, track.height);
        if let Some(rotation) = track.rotation_degrees {
            println!("    {:<14} {}°", "Rotation:", rotation);
        }
    }
}
