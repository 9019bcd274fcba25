//! `envsim` – runs the simulated sensor fleet.
//!
//! 1. Loads `~/.envsim/config.toml` (or `$ENVSIM_CONFIG`) plus environment
//!    overrides.
//! 2. Builds `sensors_per_kind` sensors of every kind, each with its own MQTT
//!    session, and connects them.
//! 3. Runs the interactive console, or with `--headless` (or when stdin is
//!    not a terminal) simply waits.
//! 4. On Ctrl-C or console exit, shuts the whole fleet down.

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use envsim_cli::{config, console};
use envsim_middleware::{BrokerTransport, MqttTransport};
use envsim_runtime::{Fleet, IdAllocator};
use tracing::{error, info, warn};

fn main() {
    let _guard = envsim_runtime::init_tracing("envsim");

    print_banner();

    let headless = std::env::args().any(|a| a == "--headless") || !std::io::stdin().is_terminal();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::effective() {
        Ok(cfg) => {
            println!(
                "  Broker {} · {} sensor(s) per kind",
                format!("{}:{}", cfg.broker_host, cfg.broker_port).bold(),
                cfg.sensors_per_kind
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Shutdown flag ─────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping sensors …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use the console to exit");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start the async runtime");
            std::process::exit(1);
        }
    };

    // ── Fleet ─────────────────────────────────────────────────────────────
    println!("Initializing sensors");
    let ids = IdAllocator::new();
    let fleet = Fleet::build(&cfg.fleet_config(), &ids, |identity| {
        let settings = cfg.mqtt_settings(&format!("sensor-{}", identity.id));
        Arc::new(MqttTransport::new(settings)) as Arc<dyn BrokerTransport>
    });
    let connected = runtime.block_on(fleet.connect_all());
    info!(connected, total = fleet.len(), "fleet connected");
    for sensor in fleet.sensors() {
        println!("  {} {}", "•".cyan(), sensor.name());
    }
    println!();

    if headless {
        println!(
            "  Running headless. Start sensors with {}; Ctrl-C to quit.",
            "envsim-ctl start_all".bold()
        );
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(500));
        }
    } else {
        console::run(&fleet, runtime.handle().clone(), &shutdown);
    }

    runtime.block_on(fleet.shutdown());
    println!("{}", "  ✓ All sensors stopped.".green());
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "envsim".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Environmental sensor fleet simulator");
    println!();
}
