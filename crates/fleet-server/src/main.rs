//! Fleet Server - always-on orchestrator for mixed car/drone deliveries

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_core::World;
use fleet_server::config::Config;
use fleet_server::dispatch::{CommandSink, HttpSink, LogSink};
use fleet_server::loops::{dispatch_loop, monitor_loop, scheduling_loop, snapshot_loop, world_sync_loop};
use fleet_server::persistence::SnapshotStore;
use fleet_server::state::Orchestrator;
use fleet_server::api;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("fleet_server=debug".parse()?);
    if config.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }

    tracing::info!("Starting Fleet Server...");

    let world = match &config.world_path {
        Some(path) => {
            let data = world_sync_loop::load_world_file(path).await?;
            tracing::info!("Loaded world from {}", path.display());
            World::from_data(data)?
        }
        None => {
            tracing::info!("No world file configured; planning over open terrain");
            World::default()
        }
    };

    let port = config.server_port;
    let world_path = config.world_path.clone();
    let sink: Arc<dyn CommandSink> = match &config.gateway_url {
        Some(url) => {
            tracing::info!("Dispatching commands to gateway {}", url);
            Arc::new(HttpSink::new(url, config.gateway_timeout)?)
        }
        None => Arc::new(LogSink),
    };
    let store = SnapshotStore::open(&config).await?.map(Arc::new);

    let (orchestrator, commands) = Orchestrator::new(config, world);
    let state = Arc::new(orchestrator);

    if let Some(store) = &store {
        match store.load().await {
            Ok(Some(snapshot)) => {
                let queued = state.restore(snapshot)?;
                tracing::info!("Restored state from {} ({} tasks queued)", store.describe(), queued);
            }
            Ok(None) => tracing::info!("No snapshot found at {}", store.describe()),
            Err(err) => tracing::warn!("Snapshot load failed, starting empty: {:#}", err),
        }
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut workers = Vec::new();

    workers.push(tokio::spawn(scheduling_loop::run_scheduling_loop(
        state.clone(),
        shutdown_tx.subscribe(),
    )));
    workers.push(tokio::spawn(monitor_loop::run_monitor_loop(
        state.clone(),
        shutdown_tx.subscribe(),
    )));
    workers.push(tokio::spawn(dispatch_loop::run_dispatch_loop(
        state.clone(),
        sink,
        commands,
        shutdown_tx.subscribe(),
    )));
    if let Some(store) = store {
        workers.push(tokio::spawn(snapshot_loop::run_snapshot_loop(
            state.clone(),
            store,
            shutdown_tx.subscribe(),
        )));
    }
    if let Some(path) = world_path {
        workers.push(tokio::spawn(world_sync_loop::run_world_sync_loop(
            state.clone(),
            path,
            shutdown_tx.subscribe(),
        )));
    }

    let app = api::routes()
        .with_state(state)
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(());
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::warn!("Background loop ended abnormally: {}", err);
        }
    }
    tracing::info!("Fleet Server stopped");

    Ok(())
}
