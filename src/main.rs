//! Session-affinity HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ http::forward ──▶ routing (session key → ring) ──▶ Backend
//!                                      │                       ▲
//!                                      │ fast probe            │ healthy set
//!                                      ▼                       │
//!                               health::active ──▶ load_balancer::registry ◀── admin API
//!                                                              │
//!                                                              ▼
//!                                                  reconciler ──▶ Provisioner
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use affinity_proxy::config::{load_config, ProxyConfig};
use affinity_proxy::lifecycle::startup;

#[derive(Parser)]
#[command(name = "affinity-proxy")]
#[command(about = "Session-affinity HTTP load balancer with health-driven failover", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
