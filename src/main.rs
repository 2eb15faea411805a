// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Result};
use clap::Parser;
use rag_extract::{
    api::start_server,
    config::ExtractionConfig,
    service::ExtractionService,
    version,
};
use tracing_subscriber::EnvFilter;

/// Text extraction service for retrieval pipelines
#[derive(Debug, Parser)]
#[command(name = "rag-extract", version)]
struct Args {
    /// Bind address (overrides API_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides API_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Concurrent requests (overrides MAX_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Print the effective configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let mut config = ExtractionConfig::from_env();
    if let Some(host) = args.host {
        config.api_host = host;
    }
    if let Some(port) = args.port {
        config.api_port = port;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {}", e))?;

    if args.check_config {
        println!("{:#?}", config);
        return Ok(());
    }

    tracing::info!(
        workers = config.max_workers,
        max_file_size = config.max_file_size,
        timeout_secs = config.processing_timeout_secs,
        resource_limits = config.resources.enabled,
        features = %version::FEATURES.join(","),
        "starting {}",
        version::get_version_string()
    );

    let service = ExtractionService::new(config);
    start_server(service).await
}
