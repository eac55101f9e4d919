//! Tollgate server binary: wires the admission and scoring engines to a
//! Redis store and serves the HTTP façade.

mod analytics;
mod config;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tollgate_engine::{AnomalyDetector, TokenBucketLimiter};
use tollgate_store::{AdmissionStore, RedisStore};

use crate::analytics::AnalyticsHandle;
use crate::config::ServerConfig;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "tollgate-server", about = "Request-admission control with anomaly scoring")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    tracing::info!(policy = ?config.fail_policy, "store failure policy");

    let limits = config.limits.to_rate_limit_config();
    let store: Arc<dyn AdmissionStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("connecting to admission store")?,
    );
    let limiter = TokenBucketLimiter::new(Arc::clone(&store), limits.clone())?;
    let detector = AnomalyDetector::new(store, limits)?;

    let analytics = match &config.analytics_path {
        Some(path) => analytics::spawn_writer(path.clone()),
        None => AnalyticsHandle::disabled(),
    };

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(AppState { limiter, detector, config, analytics });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "tollgate listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serving")?;
    Ok(())
}
