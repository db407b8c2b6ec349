// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pitchside server
//!
//! Runs the whole arbitration stack in one process: robot transports, the
//! control RPC endpoint, the preemption scheduler, the referee loop and the
//! position feed.
//!
//! # Usage
//!
//! ```bash
//! # Real robots, assignments restored from robots.json
//! pitchside-server --config pitchside.toml
//!
//! # Four simulated robots, RPC on a custom port
//! pitchside-server --simulated --rpc-port 7658
//!
//! # Add robots by address
//! pitchside-server --robot serial:/dev/ttyUSB0 --robot wifi:192.168.100.11
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pitchside::control::{Control, RpcServer};
use pitchside::feed::{FeedListener, FeedPublisher, PositionFeed};
use pitchside::referee::Referee;
use pitchside::registry::RobotRegistry;
use pitchside::robot::{TransportAddress, WifiService};
use pitchside::sim::Simulator;
use pitchside::{ArbiterConfig, RobotId};

/// Match arbitration server for robot soccer fleets
#[derive(Parser, Debug)]
#[command(name = "pitchside-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drive simulated robots instead of real ones
    #[arg(long)]
    simulated: bool,

    /// Control RPC port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Persisted robot assignments (JSON)
    #[arg(long)]
    robots_file: Option<PathBuf>,

    /// Robot to connect at startup (serial:<path>, wifi:<ip>[:port], sim:<robot>)
    #[arg(long = "robot")]
    robots: Vec<TransportAddress>,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            ArbiterConfig::from_file(path)?
        }
        None => ArbiterConfig::default(),
    };
    if args.simulated {
        config.simulated = true;
    }
    if let Some(port) = args.rpc_port {
        config.rpc.port = port;
    }
    if let Some(path) = args.robots_file {
        config.robots_file = path;
    }
    config.validate()?;

    let feed = Arc::new(PositionFeed::new());

    let simulator = if config.simulated {
        let sim = Arc::new(Simulator::new(config.field.clone()));
        sim.start(feed.clone())?;
        Some(sim)
    } else {
        None
    };

    let wifi = match WifiService::bind(config.wifi.clone()) {
        Ok(wifi) => {
            wifi.start()?;
            Some(wifi)
        }
        Err(e) => {
            warn!("WiFi transport disabled: {}", e);
            None
        }
    };

    let mut registry =
        RobotRegistry::new(config.serial.clone()).with_robots_file(&config.robots_file);
    if let Some(wifi) = &wifi {
        registry = registry.with_wifi(wifi.clone());
    }
    if let Some(sim) = &simulator {
        registry = registry.with_simulator(sim.clone());
    }
    let registry = Arc::new(registry);

    if let Err(e) = registry.load() {
        warn!("Cannot restore robots from {:?}: {}", config.robots_file, e);
    }
    for address in args.robots {
        if let Err(e) = registry.add(address.clone()) {
            warn!("Cannot add robot {}: {}", address, e);
        }
    }
    if simulator.is_some() && registry.handles().is_empty() {
        for id in RobotId::all() {
            registry.add(TransportAddress::Sim(id))?;
        }
    }

    let control = Arc::new(Control::new(
        registry.clone(),
        feed.clone(),
        config.field.clone(),
        &config.control,
    ));
    control.start()?;

    let rpc_addr = SocketAddr::new(config.rpc.bind_address, config.rpc.port);
    let rpc = RpcServer::start(rpc_addr, config.rpc.read_timeout(), control.clone())
        .with_context(|| format!("cannot bind control RPC on {}", rpc_addr))?;

    let listener = if simulator.is_none() && config.feed.listen_port != 0 {
        let bind = SocketAddr::new(config.rpc.bind_address, config.feed.listen_port);
        Some(FeedListener::start(bind, feed.clone())?)
    } else {
        None
    };

    let subscribers: Vec<SocketAddr> = config
        .feed
        .subscribers
        .iter()
        .filter_map(|s| match s.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!("Ignoring feed subscriber {:?}", s);
                None
            }
        })
        .collect();
    let publisher = if subscribers.is_empty() {
        None
    } else {
        Some(FeedPublisher::start(
            subscribers,
            config.feed.publish_period(),
            feed.clone(),
        )?)
    };

    let referee = Arc::new(Referee::new(control.clone(), config.referee.clone()));
    referee.start()?;

    info!("+----------------------------------------------------+");
    info!("|       Pitchside Server v{:27}|", pitchside::VERSION);
    info!("+----------------------------------------------------+");
    info!("|  RPC:       {:39}|", rpc.local_addr());
    info!("|  Robots:    {:39}|", registry.handles().len());
    info!(
        "|  Mode:      {:39}|",
        if simulator.is_some() { "simulated" } else { "real" }
    );
    info!("+----------------------------------------------------+");
    info!("Master key: {}", control.master_key());

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("Shutdown signal received, stopping...");
    referee.stop();
    control.emergency();
    control.tick();
    if let Some(publisher) = publisher {
        publisher.stop();
    }
    if let Some(listener) = listener {
        listener.stop();
    }
    rpc.stop();
    control.stop();
    registry.close_all();
    if let Some(wifi) = wifi {
        wifi.stop();
    }
    if let Some(sim) = simulator {
        sim.stop();
    }

    info!("Server stopped");
    Ok(())
}
