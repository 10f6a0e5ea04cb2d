//! Enhanced Channel Manager control plane daemon — CLI entrypoint.
//!
//! Loads configuration, opens the local store, registers the shipped
//! task set, and runs the scheduler and (when TLS is enabled) renewal
//! loops until interrupted. Full HTTP router wiring to the upstream
//! API is treated as an external collaborator and is not built here.

mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ecm_core::config::EcmConfig;
use ecm_core::store::models::TlsMode;
use ecm_core::store::{SqliteStore, Store};
use ecm_core::task_engine::TaskEngine;
use ecm_core::tls::{renewal_loop, CertificateStorage};
use ecm_core::upstream::{UpstreamClient, UpstreamHttpClient};
use tracing_subscriber::EnvFilter;

/// The Enhanced Channel Manager control plane daemon.
#[derive(Parser, Debug)]
#[command(name = "ecm", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the scheduler and renewal loops (default when no subcommand given)
    Serve,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the resolved configuration directory and store path
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let config = EcmConfig::load().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config { action: ConfigAction::Show } => {
            println!("config_dir: {}", config.config_dir.display());
            println!("store_path: {}", config.store_path().display());
            println!("tls_dir: {}", config.tls_dir().display());
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: EcmConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);

    std::fs::create_dir_all(&config.config_dir)
        .map_err(|e| anyhow::anyhow!("failed to create config dir {}: {e}", config.config_dir.display()))?;

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(store_path(&config))
            .map_err(|e| anyhow::anyhow!("failed to open store: {e}"))?,
    );

    let upstream: Arc<dyn UpstreamClient> = Arc::new(
        UpstreamHttpClient::new(&config.upstream).map_err(|e| anyhow::anyhow!("failed to build upstream client: {e}"))?,
    );

    let engine = Arc::new(TaskEngine::new(store.clone(), config.notify.clone()));
    register_tasks(&engine, &store, &upstream, &config).await;

    let scheduler = tokio::spawn(engine.clone().run_scheduler_loop());

    let tls_settings = store
        .get_tls_settings()
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS settings: {e}"))?;

    let renewal = if tls_settings.enabled && tls_settings.mode == TlsMode::LetsEncrypt {
        let storage = Arc::new(CertificateStorage::new(config.tls_dir()));
        Some(tokio::spawn(renewal_loop(store.clone(), storage)))
    } else {
        None
    };

    tracing::info!(
        admin_port = config.admin_port,
        tls_enabled = tls_settings.enabled,
        "enhanced channel manager control plane started"
    );

    tokio::signal::ctrl_c().await.map_err(|e| anyhow::anyhow!("failed to listen for ctrl-c: {e}"))?;
    tracing::info!("shutdown requested, stopping background loops");

    scheduler.abort();
    if let Some(renewal) = renewal {
        renewal.abort();
    }

    Ok(())
}

fn store_path(config: &EcmConfig) -> PathBuf {
    config.store_path()
}

async fn register_tasks(
    engine: &TaskEngine,
    store: &Arc<dyn Store>,
    upstream: &Arc<dyn UpstreamClient>,
    config: &Arc<EcmConfig>,
) {
    for definition in tasks::definitions() {
        let task_id = definition.task_id.clone();
        let store = store.clone();
        let upstream = upstream.clone();
        let config = config.clone();
        let factory: ecm_core::task_engine::TaskFactory = match task_id.as_str() {
            "stream_probe" => Arc::new(move |_params| {
                Arc::new(tasks::StreamProbeTask {
                    store: store.clone(),
                    upstream: upstream.clone(),
                    config: config.clone(),
                }) as Arc<dyn ecm_core::task_engine::Task>
            }),
            "m3u_refresh" => Arc::new(move |_params| {
                Arc::new(tasks::M3uRefreshTask {
                    store: store.clone(),
                    upstream: upstream.clone(),
                    config: config.clone(),
                }) as Arc<dyn ecm_core::task_engine::Task>
            }),
            "epg_refresh" => Arc::new(move |_params| {
                Arc::new(tasks::EpgRefreshTask { upstream: upstream.clone() }) as Arc<dyn ecm_core::task_engine::Task>
            }),
            "cleanup" => Arc::new(move |_params| {
                Arc::new(tasks::CleanupTask { store: store.clone() }) as Arc<dyn ecm_core::task_engine::Task>
            }),
            other => {
                tracing::warn!(task_id = other, "no factory wired for task definition, skipping registration");
                continue;
            }
        };
        engine.register(definition, factory).await;
    }
}
