// CLASSIFICATION: COMMUNITY
// Filename: args.rs v1.1
// Date Modified: 2026-10-17
// Author: Lukas Bower

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::crash::CrashKind;

/// Command line for `rprocctl`.
#[derive(Debug, Parser)]
#[command(name = "rprocctl", about = "Remote processor lifecycle control", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a boot/stop cycle against the simulated SoC.
    Simulate(SimulateArgs),
    /// Print a core's power recipe.
    Recipe(RecipeArgs),
    /// Parse and validate a board config.
    CheckConfig {
        path: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[arg(long, value_name = "TOML")]
    pub config: PathBuf,
    /// Core to drive; defaults to the first core in the config.
    #[arg(long)]
    pub core: Option<String>,
    #[arg(long, value_name = "MS", default_value_t = 10)]
    pub ready_after_ms: u64,
    /// Never report ready; start() times out.
    #[arg(long)]
    pub withhold_ready: bool,
    #[arg(long, value_name = "MS", default_value_t = 10)]
    pub stop_ack_after_ms: u64,
    /// Never acknowledge stop.
    #[arg(long)]
    pub withhold_stop_ack: bool,
    /// Crash the core once it is running.
    #[arg(long, value_enum)]
    pub crash: Option<CrashArg>,
    /// Write the crash coredump stream to this file.
    #[arg(long, value_name = "FILE", requires = "crash")]
    pub dump: Option<PathBuf>,
    /// Re-prepare and restart after a crash.
    #[arg(long, requires = "crash")]
    pub recover: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CrashArg {
    Fatal,
    Watchdog,
}

impl From<CrashArg> for CrashKind {
    fn from(c: CrashArg) -> Self {
        match c {
            CrashArg::Fatal => CrashKind::FatalError,
            CrashArg::Watchdog => CrashKind::Watchdog,
        }
    }
}

#[derive(Debug, Args)]
pub struct RecipeArgs {
    #[arg(long, value_name = "TOML")]
    pub config: PathBuf,
    #[arg(long)]
    pub core: String,
    /// Show the power-down recipe instead of power-up.
    #[arg(long)]
    pub down: bool,
}
