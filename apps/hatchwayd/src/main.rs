use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use url::Url;

use hatchway_mcp::{GatewayConfig, GatewaySession};
use hatchway_registry::{QualityGateConfig, RegistryClient, RegistryOptions};

mod app;
mod supervisor;

use supervisor::{Supervisor, SupervisorOptions};

#[derive(Debug, Clone, Parser)]
#[command(name = "hatchwayd", version, about = "Multi-tenant MCP package gateway")]
struct Args {
    /// Listen address.
    #[arg(long, env = "HATCHWAY_ADDR", default_value = "127.0.0.1:8700")]
    addr: SocketAddr,

    /// Maximum number of concurrently running package servers.
    #[arg(long, env = "HATCHWAY_MAX_SERVERS", default_value_t = 10)]
    max_servers: usize,

    /// Kill a subscriberless child idle for longer than this.
    #[arg(long, env = "HATCHWAY_IDLE_TIMEOUT_SECS", default_value_t = 30 * 60)]
    idle_timeout_secs: u64,

    /// How often the idle reaper runs.
    #[arg(long, env = "HATCHWAY_REAP_INTERVAL_SECS", default_value_t = 5 * 60)]
    reap_interval_secs: u64,

    /// SSE keepalive ping period.
    #[arg(long, env = "HATCHWAY_KEEPALIVE_SECS", default_value_t = 30)]
    keepalive_secs: u64,

    /// Hard cap on a single SSE session's lifetime.
    #[arg(long, env = "HATCHWAY_SESSION_TIMEOUT_SECS", default_value_t = 30 * 60)]
    session_timeout_secs: u64,

    /// Timeout for each registry probe.
    #[arg(long, env = "HATCHWAY_PROBE_TIMEOUT_SECS", default_value_t = 5)]
    probe_timeout_secs: u64,

    /// npm registry base URL.
    #[arg(
        long,
        env = "HATCHWAY_NPM_REGISTRY_URL",
        default_value = "https://registry.npmjs.org"
    )]
    npm_registry_url: Url,

    /// npm download-counts API base URL.
    #[arg(
        long,
        env = "HATCHWAY_NPM_DOWNLOADS_URL",
        default_value = "https://api.npmjs.org"
    )]
    npm_downloads_url: Url,

    /// PyPI base URL.
    #[arg(long, env = "HATCHWAY_PYPI_URL", default_value = "https://pypi.org")]
    pypi_url: Url,

    /// npm quality gate: minimum downloads over the trailing month.
    #[arg(long, env = "HATCHWAY_NPM_MIN_DOWNLOADS", default_value_t = 100)]
    npm_min_downloads: u64,

    /// PyPI quality gate: maximum age of the newest release, in days.
    #[arg(long, env = "HATCHWAY_PYPI_MAX_RELEASE_AGE_DAYS", default_value_t = 365)]
    pypi_max_release_age_days: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".into()),
        )
        .json()
        .init();

    let args = Args::parse();

    let registry = RegistryClient::new(RegistryOptions {
        npm_base: args.npm_registry_url.clone(),
        npm_downloads_base: args.npm_downloads_url.clone(),
        pypi_base: args.pypi_url.clone(),
        probe_timeout: Duration::from_secs(args.probe_timeout_secs),
        quality: QualityGateConfig {
            min_npm_monthly_downloads: args.npm_min_downloads,
            max_release_age_days: args.pypi_max_release_age_days,
            ..QualityGateConfig::default()
        },
    })
    .context("build registry client")?;

    let supervisor = Supervisor::new(SupervisorOptions {
        max_servers: args.max_servers,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        reap_interval: Duration::from_secs(args.reap_interval_secs),
    });
    supervisor.start_reaper();

    let session = GatewaySession::new(GatewayConfig::default_for_binary(
        "hatchwayd",
        env!("CARGO_PKG_VERSION"),
    ));

    let state = app::AppState {
        supervisor: supervisor.clone(),
        registry: Arc::new(registry),
        session: Arc::new(tokio::sync::RwLock::new(session)),
        keepalive: Duration::from_secs(args.keepalive_secs),
        session_timeout: Duration::from_secs(args.session_timeout_secs),
    };

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    info!(addr = %args.addr, "starting hatchwayd");

    axum::serve(listener, app::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serve")?;

    supervisor.shutdown();
    Ok(())
}
