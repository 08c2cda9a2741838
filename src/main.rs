//! Weaver control-plane service.
//!
//! One process hosts the event log, the domain router, the run manager,
//! and the HTTP/SSE surface. Recovery runs before the listener opens so
//! orphaned `running` rows are aborted ahead of any new traffic.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weaver_backend::adapter::AdapterPlugins;
use weaver_backend::api::{api_router, AppState};
use weaver_backend::bus::{EventLog, MemoryEventLog, SchemaRegistry, SqliteEventLog};
use weaver_backend::config::Config;
use weaver_backend::manager::RunManager;
use weaver_backend::sse::SseBroadcaster;
use weaver_backend::store::{BarStore, Database, FillStore, OrderStore, RunStore};

#[derive(Debug, Parser)]
#[command(name = "weaver", about = "Weaver automated trading platform")]
struct Args {
    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database path (overrides WEAVER_DATABASE_PATH).
    #[arg(long)]
    database: Option<String>,
    /// Keep the outbox in memory instead of SQLite.
    #[arg(long)]
    ephemeral_outbox: bool,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,weaver_backend=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if args.ephemeral_outbox {
        config.durable_outbox = false;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "weaver starting");

    let db = Database::open(&config.database_path)?;
    let runs = Arc::new(RunStore::new(db.clone()));
    let orders = Arc::new(OrderStore::new(db.clone()));
    let fills = Arc::new(FillStore::new(db.clone()));
    let bars = Arc::new(BarStore::new(db));

    let registry = Arc::new(SchemaRegistry::builtin());
    let log: Arc<dyn EventLog> = if config.durable_outbox {
        // Same file as the stores: order snapshots commit atomically with
        // their outbox events.
        Arc::new(SqliteEventLog::open(&config.database_path, registry)?)
    } else {
        Arc::new(MemoryEventLog::new(registry, config.outbox_capacity))
    };

    let plugins = {
        let discovered = AdapterPlugins::discover(&config.plugins_dir);
        if discovered.manifests().is_empty() {
            Arc::new(AdapterPlugins::builtin())
        } else {
            Arc::new(discovered)
        }
    };
    for manifest in plugins.manifests() {
        info!(id = %manifest.id, class = %manifest.class, version = %manifest.version, "adapter plugin");
    }

    let manager = RunManager::new(
        log.clone(),
        runs.clone(),
        orders.clone(),
        fills,
        bars.clone(),
        plugins,
        Duration::from_secs(config.tick_timeout_secs),
    );

    let aborted = manager.recover().context("recovery pass failed")?;
    if aborted > 0 {
        info!(aborted, "aborted runs left over from a previous process");
    }

    let sse = SseBroadcaster::new(log.clone(), config.sse_buffer);
    sse.clone().spawn();

    let state = AppState {
        manager,
        log,
        runs,
        orders,
        bars,
        sse,
    };
    let app = api_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "control plane listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
