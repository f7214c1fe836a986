//! Command-line argument parsing for the Quarry client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Command-line flags. Scheduler, network, and log flags take precedence
/// over `config.ron`; the rest only steer the headless run.
#[derive(Parser, Debug, Default)]
#[command(name = "quarry", about = "Quarry client frame scheduler")]
pub struct CliArgs {
    /// Section-build worker count (0 = twice the hardware threads).
    #[arg(long)]
    pub pool_capacity: Option<usize>,

    /// Simulation tick rate in Hz.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Directory holding `config.ron` and `logs/`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Frames to run before exiting.
    #[arg(long, default_value_t = 600)]
    pub frames: u64,

    /// Terrain seed for the synthetic packet feed.
    #[arg(long, default_value_t = 1337)]
    pub seed: u32,

    /// Regions loaded around the origin, as a square radius.
    #[arg(long, default_value_t = 3)]
    pub radius: i32,
}

impl Config {
    /// Overwrite every setting the command line provided.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(n) = args.pool_capacity {
            self.scheduler.pool_capacity = n;
        }
        if let Some(hz) = args.tick_rate {
            self.scheduler.tick_rate_hz = hz;
        }
        if let Some(addr) = &args.server {
            self.network.server_address.clone_from(addr);
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(level) = &args.log_level {
            self.debug.log_level.clone_from(level);
        }
    }
}
