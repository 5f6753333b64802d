//! Command-line arguments of the keystone demo session.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Demo session command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "keystone-demo", about = "Runs a simulated replicated session")]
pub struct CliArgs {
    /// Number of client peers.
    #[arg(long)]
    pub clients: Option<u32>,

    /// Frames to simulate.
    #[arg(long)]
    pub frames: Option<u64>,

    /// Spawner seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Datagrams read per peer per frame (0 = unlimited).
    #[arg(long)]
    pub inbound_budget: Option<usize>,

    /// Log filter (error, warn, info, debug, trace, or an EnvFilter directive).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(clients) = args.clients {
            self.session.clients = clients;
        }
        if let Some(frames) = args.frames {
            self.session.frames = frames;
        }
        if let Some(seed) = args.seed {
            self.spawner.seed = seed;
        }
        if let Some(budget) = args.inbound_budget {
            self.network.inbound_budget = budget;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
