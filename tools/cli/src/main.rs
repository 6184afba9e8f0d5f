//! crmsync CLI - run, schedule and serve CRM syncs.
//!
//! Configuration comes from the environment, optionally loaded from a
//! `.env` file in the working directory.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crmsync_common::TenantId;
use crmsync_crm::CrmClientConfig;
use crmsync_server::{AppState, ServerConfig};
use crmsync_storage::StoreConfig;
use crmsync_sync::{
    crm_connector, InvocationRequest, Orchestrator, SharedSecret, SyncMode, SyncScheduler,
    SyncSettings, SyncStateStore, TenantCredentials,
};

#[derive(Parser)]
#[command(name = "crmsync")]
#[command(about = "crmsync - incremental CRM sync into a local store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP sync trigger.
    Serve {
        /// Listen address (default: SYNC_BIND_ADDR or 0.0.0.0:8080).
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Also run a default sync every N minutes.
        #[arg(long)]
        interval_minutes: Option<u64>,
    },

    /// Run one sync invocation and print its report.
    Run {
        /// Comma-separated entities (default: all).
        #[arg(short, long, value_delimiter = ',')]
        entities: Vec<String>,

        /// Force a full pass for every selected entity.
        #[arg(long)]
        full_sync: bool,

        /// Limit first-ever passes to the last N days.
        #[arg(long)]
        initial_window_days: Option<i64>,

        /// Tenant (CRM location) to sync.
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Run a default sync periodically until interrupted.
    Watch {
        /// Minutes between runs (default: SYNC_INTERVAL_MINUTES or 15).
        #[arg(long)]
        interval_minutes: Option<u64>,
    },

    /// Show the stored sync state per entity.
    State {
        /// Only this tenant.
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("RUST_LOG")
            .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "crmsync", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            bind,
            interval_minutes,
        } => cmd_serve(bind, interval_minutes).await,
        Commands::Run {
            entities,
            full_sync,
            initial_window_days,
            tenant,
        } => cmd_run(&entities, full_sync, initial_window_days, tenant).await,
        Commands::Watch { interval_minutes } => cmd_watch(interval_minutes).await,
        Commands::State { tenant } => cmd_state(tenant).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Orchestrator wired from the environment.
fn build_orchestrator(settings: SyncSettings) -> Result<Orchestrator> {
    let store = StoreConfig::from_env()
        .and_then(|config| config.open())
        .context("Failed to open destination store")?;
    let crm = CrmClientConfig::from_env().context("Invalid CRM client configuration")?;
    let credentials = TenantCredentials::from_env().context("Invalid CRM credentials")?;

    info!(store = store.name(), "Destination store ready");
    Ok(Orchestrator::new(store, settings, crm_connector(crm)).with_env_credentials(credentials))
}

fn parse_tenant(tenant: Option<String>) -> Result<Option<TenantId>> {
    tenant
        .map(|t| TenantId::new(t).context("Invalid tenant"))
        .transpose()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Serve the sync trigger.
async fn cmd_serve(bind: Option<SocketAddr>, interval_minutes: Option<u64>) -> Result<()> {
    let mut config = ServerConfig::from_env().context("Invalid server configuration")?;
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    let settings = SyncSettings::from_env().context("Invalid sync settings")?;
    let mode = match interval_minutes {
        Some(minutes) if minutes > 0 => SyncMode::Periodic {
            interval: Duration::from_secs(minutes * 60),
        },
        _ => SyncMode::Manual,
    };

    let orchestrator = Arc::new(build_orchestrator(settings)?);
    let (scheduler, worker) = SyncScheduler::spawn(orchestrator, mode);

    let secret = SharedSecret::new(config.secret);
    if !secret.is_configured() {
        warn!("SYNC_SECRET is not set, sync triggers are unauthenticated");
    }

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    let state = AppState {
        scheduler: scheduler.clone(),
        secret,
    };
    crmsync_server::serve(listener, state, shutdown_signal())
        .await
        .context("Server failed")?;

    scheduler.shutdown().await;
    let _ = worker.await;
    Ok(())
}

/// Run one invocation in the foreground.
async fn cmd_run(
    entities: &[String],
    full_sync: bool,
    initial_window_days: Option<i64>,
    tenant: Option<String>,
) -> Result<()> {
    let request = InvocationRequest {
        entities: InvocationRequest::parse_entities(entities).context("Invalid entities")?,
        full_sync,
        initial_window_days,
        tenant: parse_tenant(tenant)?,
        received_at: None,
    };
    let settings = SyncSettings::from_env().context("Invalid sync settings")?;
    let orchestrator = build_orchestrator(settings)?;

    let report = orchestrator.invoke(request).await.context("Sync failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.ok {
        let failed: Vec<&str> = report.errors.keys().map(String::as_str).collect();
        anyhow::bail!("Sync finished with errors in: {}", failed.join(", "));
    }
    Ok(())
}

/// Run default invocations periodically until ctrl-c.
async fn cmd_watch(interval_minutes: Option<u64>) -> Result<()> {
    let settings = SyncSettings::from_env().context("Invalid sync settings")?;
    let interval = match interval_minutes {
        Some(0) => anyhow::bail!("--interval-minutes must be at least 1"),
        Some(minutes) => Duration::from_secs(minutes * 60),
        None => settings.sync_interval,
    };

    let orchestrator = Arc::new(build_orchestrator(settings)?);
    let (scheduler, worker) = SyncScheduler::spawn(orchestrator, SyncMode::Periodic { interval });
    info!("Watching, sync every {} minutes", interval.as_secs() / 60);

    shutdown_signal().await;
    scheduler.shutdown().await;
    let _ = worker.await;
    Ok(())
}

/// Print the sync state table.
async fn cmd_state(tenant: Option<String>) -> Result<()> {
    let tenant = parse_tenant(tenant)?;
    let store = StoreConfig::from_env()
        .and_then(|config| config.open())
        .context("Failed to open destination store")?;
    let states = SyncStateStore::new(store)
        .list(tenant.as_ref())
        .await
        .context("Failed to read sync state")?;

    if states.is_empty() {
        println!("No sync state recorded yet");
        return Ok(());
    }

    let stamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!(
        "{:<14} {:<20} {:<15} {:<20} {:<20} {}",
        "ENTITY", "TENANT", "PASS", "LAST SYNCED", "LAST FULL", "POSITION"
    );
    for state in states {
        let cursor = &state.cursor;
        let position = match (&cursor.position.start_after, &cursor.position.start_after_id) {
            (None, None) => "-".to_string(),
            (ts, id) => format!(
                "{} / {}",
                ts.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
                id.as_deref().unwrap_or("-")
            ),
        };
        println!(
            "{:<14} {:<20} {:<15} {:<20} {:<20} {}",
            state.entity.as_str(),
            state.tenant_id.as_str(),
            cursor.pass.label(),
            stamp(state.last_synced_at),
            stamp(cursor.last_full_sync_at),
            position
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "crmsync",
            "run",
            "--entities",
            "contacts,lookup",
            "--full-sync",
            "--initial-window-days",
            "30",
        ]);
        match cli.command {
            Commands::Run {
                entities,
                full_sync,
                initial_window_days,
                tenant,
            } => {
                assert_eq!(entities, vec!["contacts", "lookup"]);
                assert!(full_sync);
                assert_eq!(initial_window_days, Some(30));
                assert!(tenant.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_tenant_rejects_blank() {
        assert!(parse_tenant(Some("  ".to_string())).is_err());
        assert_eq!(
            parse_tenant(Some("loc_1".to_string())).unwrap().unwrap().as_str(),
            "loc_1"
        );
    }
}
