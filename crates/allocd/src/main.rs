//! allocd entry point.

use allocd::{DaemonConfig, Service};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Network resource allocation daemon
#[derive(Parser, Debug)]
#[command(name = "allocd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; built-in defaults when absent
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit JSON log records
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true).json())
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => DaemonConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    info!(
        backends = config.backends.len(),
        network_instances = config.network_instances.len(),
        vlan_databases = config.vlan_databases.len(),
        "configuration loaded"
    );

    let service = Service::new(config);
    let mut resources = service.bootstrap().await.context("bootstrapping indexes")?;
    info!(groups = ?service.router().groups(), "allocd ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    service.shutdown(&mut resources).await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "allocd failed");
            ExitCode::FAILURE
        }
    }
}
