use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epg_mirror::{
    cache::EpgCache,
    config::Config,
    refresh::{CatalogRefreshTask, ScheduleRefreshTask},
    sync::UpdateSynchronizer,
    upstream::UpstreamClient,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "epg-mirror")]
#[command(version = "0.1.0")]
#[command(about = "A caching mirror for a third-party EPG provider")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("epg_mirror={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting EPG mirror v{}", env!("CARGO_PKG_VERSION"));

    // Configuration failure is the only fatal error
    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    info!("Mirroring upstream: {}", config.upstream.base_url);

    let client = Arc::new(UpstreamClient::new(&config.upstream)?);
    let cache = Arc::new(EpgCache::new(config.refresh.lock_timeout()));

    let catalog_task = CatalogRefreshTask::new(
        client.clone(),
        cache.clone(),
        config.refresh.clone(),
        &config.upstream,
    );
    tokio::spawn(catalog_task.run());

    let schedule_task = ScheduleRefreshTask::new(
        client.clone(),
        cache.clone(),
        config.refresh.clone(),
        &config.upstream,
    );
    tokio::spawn(schedule_task.run());

    let synchronizer = UpdateSynchronizer::new(client, cache.clone(), config.refresh.clone());
    tokio::spawn(synchronizer.run());
    info!("Background refresh tasks started");

    let state = AppState {
        cache,
        secret: config.upstream.secret.clone(),
    };
    let web_server = WebServer::new(&config.web, state)?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}
