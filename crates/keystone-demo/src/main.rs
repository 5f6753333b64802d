//! Headless demo: a host and several bot-driven clients play a collectable
//! game over the in-memory transport.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p keystone-demo -- --clients 4 --frames 300`.

mod game;
mod sim;

use std::time::{Duration, Instant};

use clap::Parser;
use keystone_config::{CliArgs, Config, default_config_dir};
use keystone_sync::FrameSchedule;
use tracing::info;

use crate::sim::Simulation;

/// Rounds allowed for the last messages to drain after the final frame.
const SETTLE_ROUNDS: usize = 256;

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    keystone_log::init_logging(Some(&log_dir), config.debug.file_logging, Some(&config));

    let mut sim = match Simulation::new(&config) {
        Ok(sim) => sim,
        Err(err) => {
            tracing::error!("could not set up the session: {err}");
            std::process::exit(1);
        }
    };

    let mut schedule = FrameSchedule::with_frame_rate(config.session.frame_rate);
    let frame_time = Duration::from_secs_f64(schedule.frame_duration_secs());
    let started = Instant::now();
    let mut last = started;
    while sim.frame() < config.session.frames {
        let now = Instant::now();
        let due = schedule.accumulate((now - last).as_secs_f64());
        last = now;
        for _ in 0..due {
            if sim.frame() >= config.session.frames {
                break;
            }
            sim.step();
        }
        if due == 0 {
            std::thread::sleep(frame_time / 4);
        }
    }

    if !sim.settle(SETTLE_ROUNDS) {
        tracing::warn!("messages still in flight after {SETTLE_ROUNDS} rounds");
    }
    info!(
        "ran {} frames in {:.2}s, {} entities live on the host",
        sim.frame(),
        started.elapsed().as_secs_f64(),
        sim.host().entities().len()
    );
    sim.report();
}
