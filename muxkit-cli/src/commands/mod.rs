//! CLI subcommand implementations.

pub mod caps;
pub mod inspect;
pub mod synth;

pub use caps::CmdCaps;
pub use inspect::CmdInspect;
pub use synth::CmdSynth;
