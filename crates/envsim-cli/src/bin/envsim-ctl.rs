//! `envsim-ctl` – send one command to a running sensor fleet.

use colored::Colorize;
use envsim_cli::{config, ctl};
use envsim_middleware::MqttTransport;

#[tokio::main]
async fn main() {
    let _guard = envsim_runtime::init_tracing("envsim-ctl");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let msg = match ctl::parse_args(&args) {
        Ok(msg) => msg,
        Err(usage) => {
            println!("{usage}");
            std::process::exit(1);
        }
    };

    let cfg = config::effective().unwrap_or_else(|e| {
        println!("{}: {}", "Config error".red(), e);
        config::Config::default()
    });
    let transport = MqttTransport::new(cfg.mqtt_settings("ctl"));

    match ctl::send(&transport, &msg).await {
        Ok(sent) => println!("Sent command to {}: {}", envsim_types::CONTROL_TOPIC, sent.bold()),
        Err(e) => println!(
            "{} ({}): {}",
            "Error".red(),
            transport.settings().broker_addr(),
            e
        ),
    }
}
