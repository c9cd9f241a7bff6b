use arrboard::metrics::SysinfoProbe;
use arrboard::sync::SyncStatus;
use arrboard::{config, server, AppState, Db};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run every configured sync pass once, then exit
    #[arg(long)]
    sync_once: bool,

    /// Test the connection to every configured service, then exit
    #[arg(long)]
    test_connections: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    info!("arrboard starting...");

    let config = config::Config::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load {}: {}. Using defaults.", args.config.display(), e);
        config::Config::default()
    });
    let config = Arc::new(config);

    let db = Arc::new(Db::new(&config.server.database_path).await?);
    let state = AppState::build(db, config.clone(), Box::new(SysinfoProbe::new()))?;
    info!(
        services = ?state.connectors.configured(),
        "Database and services initialized."
    );

    if args.test_connections {
        for test in state.connectors.test_all().await {
            if test.ok {
                info!(service = %test.service, "{}", test.message);
            } else {
                error!(service = %test.service, "{}", test.message);
            }
        }
        return Ok(());
    }

    if args.sync_once {
        let reports = state.sync.run_all().await;
        let failed = reports
            .iter()
            .filter(|r| r.status == SyncStatus::Failed)
            .count();
        info!(services = reports.len(), failed, "Sync finished");
        if failed > 0 {
            anyhow::bail!("{} sync pass(es) failed", failed);
        }
        return Ok(());
    }

    if config.server.api_key.is_none() {
        warn!("No server.api_key configured: /api is open and the webhook is disabled");
    }

    state.scheduler.start()?;
    let scheduler = state.scheduler.clone();
    let served = server::run_server(state).await;
    scheduler.stop().await;

    served
}
