//! Headless Quarry client.
//!
//! Runs the frame scheduler against a synthetic packet feed and a renderer
//! that draws nothing, then reports what happened.
//!
//! Run with: `cargo run -p quarry-app -- --frames 600`

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use quarry_app::headless::{DemoFeed, HeadlessRenderer, IdleSimulation, WorldPacketHandler};
use quarry_app::{FrameScheduler, load_gate};
use quarry_config::{CliArgs, Config, default_config_dir};
use quarry_mesh::CulledMesher;
use quarry_world::RegionPos;
use tracing::{debug, error, info};

const TARGET_FRAME: Duration = Duration::from_micros(16_667);
const DEMO_EDIT_PACE: Duration = Duration::from_millis(4);

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().or_else(default_config_dir);
    let mut config = match config_dir.as_deref().map(Config::load_or_create) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("Failed to load config, using defaults: {e}");
            Config::default()
        }
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(2);
    }

    let log_dir = config_dir.as_ref().map(|dir| dir.join("logs"));
    quarry_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));

    info!(
        "Server: {}:{} (synthetic feed)",
        config.network.server_address, config.network.server_port
    );

    let feed = DemoFeed::new(args.seed, args.radius, args.frames, DEMO_EDIT_PACE);
    let (link, _reader) = match quarry_net::spawn_reader(feed) {
        Ok(spawned) => spawned,
        Err(e) => {
            error!("Failed to start network reader: {e}");
            std::process::exit(1);
        }
    };

    let (signal, gate) = load_gate();
    let loader = std::thread::Builder::new()
        .name("resource-loader".into())
        .spawn(move || {
            info!("loading block registry");
            signal.complete();
        });
    if let Err(e) = loader {
        error!("Failed to start resource loader: {e}");
        std::process::exit(1);
    }

    let mut scheduler = match FrameScheduler::new(
        &config.scheduler,
        link,
        WorldPacketHandler::default(),
        Arc::new(CulledMesher),
    ) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Failed to create scheduler: {e}");
            std::process::exit(1);
        }
    };

    let mut renderer = HeadlessRenderer::default();
    let mut sim = IdleSimulation::new(RegionPos::new(0, 0));

    if let Err(e) = scheduler.start(gate, &mut renderer) {
        error!("{e}");
        std::process::exit(1);
    }

    for _ in 0..args.frames {
        let frame_start = Instant::now();
        if let Err(e) = scheduler.run_frame(&mut sim, &mut renderer) {
            error!("{e}");
            std::process::exit(1);
        }
        let elapsed = frame_start.elapsed();
        if elapsed < TARGET_FRAME {
            std::thread::sleep(TARGET_FRAME - elapsed);
        } else {
            debug!(?elapsed, "frame over budget");
        }
    }

    let stats = scheduler.stats();
    info!(
        frames = stats.frames,
        ticks = stats.ticks,
        packets = stats.packets,
        builds = stats.builds_dispatched,
        failed = stats.builds_failed,
        "run finished"
    );
    info!(
        regions = scheduler.handler().regions_loaded(),
        edits = scheduler.handler().blocks_changed(),
        meshes = scheduler.meshes().len(),
        quads = renderer.last_quads(),
        predicted_frames = sim.predicted_frames(),
        "world summary"
    );
}
