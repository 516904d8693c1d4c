//! # SOPS Operator
//!
//! Binary entry point. Settings come from the environment (see
//! [`sops_operator::config`]); command line flags take precedence.

use anyhow::Result;
use clap::Parser;
use sops_operator::config::{load_config, LogFormat};
use sops_operator::runtime::initialization::initialize;
use sops_operator::runtime::watch_loop::run_watch_loop;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sops-operator", version, about = "Decrypts SOPS encrypted secrets into Kubernetes Secrets")]
struct Cli {
    /// Port of the metrics and probe server
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Path to the sops binary (looked up on PATH when unset)
    #[arg(long)]
    sops_binary: Option<PathBuf>,

    /// Path to the gpg binary (looked up on PATH when unset)
    #[arg(long)]
    gpg_binary: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Do not publish matched providers into secret status
    #[arg(long)]
    disable_status: bool,

    /// Concurrent reconciliations per controller
    #[arg(long)]
    max_concurrent_reconciliations: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut controller_config, mut server_config) = load_config();

    if let Some(port) = cli.metrics_port {
        server_config.metrics_port = port;
    }
    if let Some(binary) = cli.sops_binary {
        controller_config.sops_binary = Some(binary);
    }
    if let Some(binary) = cli.gpg_binary {
        controller_config.gpg_binary = Some(binary);
    }
    if let Some(format) = cli.log_format {
        controller_config.log_format = format;
    }
    if cli.disable_status {
        controller_config.enable_status = false;
    }
    if let Some(max) = cli.max_concurrent_reconciliations {
        controller_config.max_concurrent_reconciliations = max;
    }

    let init = initialize(controller_config, server_config).await?;
    run_watch_loop(init.client, init.context, init.server_state).await
}
