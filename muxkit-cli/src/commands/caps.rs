//! Backend capability listing.

use clap::{Args, ValueEnum};
use console::style;
use muxkit_containers::{Backend, MuxerConfig};
use muxkit_core::format::TrackType;
use serde::Serialize;
use std::path::PathBuf;

/// Backend names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// MP4 files through the default backend.
    Mp4,
    /// No output.
    Noop,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Mp4 => Backend::Mp4,
            BackendArg::Noop => Backend::Noop,
        }
    }
}

/// Supported sample MIME types of a backend.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    /// Factory name.
    pub backend: String,
    /// Accepted audio MIME types.
    pub audio: Vec<String>,
    /// Accepted video MIME types.
    pub video: Vec<String>,
}

/// List the sample MIME types a backend accepts.
#[derive(Args, Debug)]
pub struct CmdCaps {
    /// JSON muxer configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend to query (overrides the configuration file).
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdCaps {
    /// Execute the caps command.
    pub fn run(&self) -> anyhow::Result<()> {
        let mut config = match &self.config {
            Some(path) => MuxerConfig::from_path(path)?,
            None => MuxerConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }

        let factory = config.build_factory()?;
        let caps = Capabilities {
            backend: factory.name().to_string(),
            audio: factory.supported_sample_mime_types(TrackType::Audio),
            video: factory.supported_sample_mime_types(TrackType::Video),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&caps)?);
        } else {
            print_caps(&caps);
        }
        Ok(())
    }
}

fn print_caps(caps: &Capabilities) {
    println!();
    println!("{} {}", style("Backend:").cyan().bold(), caps.backend);
    for (label, list) in [("Audio", &caps.audio), ("Video", &caps.video)] {
        println!();
        println!("  {}", style(label).white().bold());
        if list.is_empty() {
            println!("    {}", style("(none)").dim());
        }
        for mime_type in list {
            println!("    {}", mime_type);
        }
    }
    println!();
}
