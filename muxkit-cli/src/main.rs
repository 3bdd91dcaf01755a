//! muxkit CLI - inspect muxer backends and write test files.

mod commands;

use clap::{Parser, Subcommand};
use commands::{CmdCaps, CmdInspect, CmdSynth};
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "muxkit")]
#[command(version)]
#[command(about = "Container muxing toolkit")]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the sample MIME types a backend accepts
    Caps(CmdCaps),
    /// Write a synthetic single-track MP4
    Synth(CmdSynth),
    /// Print the header summary of an MP4 file
    Inspect(CmdInspect),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match &cli.command {
        Commands::Caps(cmd) => cmd.run(),
        Commands::Synth(cmd) => cmd.run(),
        Commands::Inspect(cmd) => cmd.run(),
    }
}
