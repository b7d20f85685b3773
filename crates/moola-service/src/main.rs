use clap::{Parser, ValueEnum};
use moola_core::StorageConfig;
use moola_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "moolad", version, about = "Moola points economy REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8095
    #[arg(long, default_value = "127.0.0.1:8095", env = "MOOLA_LISTEN")]
    listen: SocketAddr,
    /// TOML configuration file.
    #[arg(long, env = "MOOLA_CONFIG")]
    config: Option<PathBuf>,
    /// Member persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "MOOLA_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for member and link token persistence.
    #[arg(long, env = "MOOLA_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "MOOLA_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Base URL of the web claim flow.
    #[arg(long, env = "MOOLA_CLAIM_BASE_URL")]
    claim_base_url: Option<String>,
    /// Reconcile the leading team every N seconds.
    #[arg(long, env = "MOOLA_RECONCILE_INTERVAL_SECS")]
    reconcile_interval_secs: Option<u64>,
}

fn resolve_storage(cli: &Cli, from_file: &StorageConfig) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => StorageConfig::postgres(database_url, cli.pg_max_connections),
            None => from_file.clone(),
        },
    };

    Ok(storage)
}

fn load_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    config.engine.storage = resolve_storage(cli, &config.engine.storage)?;
    if let Some(url) = &cli.claim_base_url {
        config.engine.claim_base_url = url.clone();
    }
    if cli.reconcile_interval_secs.is_some() {
        config.reconcile_interval_secs = cli.reconcile_interval_secs;
    }
    Ok(config)
}

fn spawn_reconcile_loop(state: ServiceState, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.reconcile_leading_team().await {
                Ok(report) => info!(
                    team = %report.team,
                    updated = report.updated_count,
                    skipped = report.skipped.len(),
                    "Scheduled reconciliation finished"
                ),
                Err(err) => warn!(error = %err, "Scheduled reconciliation failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "moola_service=info,moola_core=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let interval = config.reconcile_interval_secs.filter(|secs| *secs > 0);

    let state = ServiceState::bootstrap(config).await?;
    if let Some(secs) = interval {
        info!(every_secs = secs, "Periodic reconciliation enabled");
        spawn_reconcile_loop(state.clone(), Duration::from_secs(secs));
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("moola-service REST listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
