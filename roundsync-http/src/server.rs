use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::{
    complete_task, get_conflicts, get_snapshot, get_status, health, pause_session, receive_event,
    replication_status, reset_recovery, reset_session, resume_session, start_session,
    upsert_player, AppState,
};
use crate::middleware::{node_id_header, normalize_content_type};
use roundsync::{spawn_engine, JsonFileStore, StandaloneTransport, SyncEngine, Transport};
use roundsync_replication::{NodeConfig, ReplicationManager};

/// Every route the node serves, with CORS and request tracing applied.
pub fn router(state: Arc<AppState>) -> Router {
    let session = Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/conflicts", get(get_conflicts))
        .route("/status", get(get_status))
        .route("/session/start", post(start_session))
        .route("/session/pause", post(pause_session))
        .route("/session/resume", post(resume_session))
        .route("/session/reset", post(reset_session))
        .route("/recovery/reset", post(reset_recovery))
        .route("/players/:id", put(upsert_player))
        .route(
            "/players/:id/tasks/:task_id/complete",
            post(complete_task),
        )
        .with_state(state.clone());

    // Peer-facing endpoints
    let internal = Router::new()
        .route("/health", get(health))
        .route("/internal/events", post(receive_event))
        .route("/internal/status", get(replication_status))
        .with_state(state.clone());

    let node_id = state.node_id.clone();
    Router::new()
        .merge(internal)
        .merge(session)
        .layer(middleware::from_fn(normalize_content_type))
        .layer(middleware::from_fn(
            move |request: axum::extract::Request, next: middleware::Next| {
                node_id_header(node_id.clone(), request, next)
            },
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
}

pub async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = std::env::var("ROUNDSYNC_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let data_dir = Path::new(&data_dir);

    let node_config = NodeConfig::load_or_default(data_dir);
    let sync_config = node_config.sync_config();
    sync_config.validate()?;

    let bind_addr = node_config.bind_addr.clone();
    let node_id = node_config.node_id.clone();

    let replication_manager = if !node_config.peers.is_empty() {
        tracing::info!("Replication enabled: {} peers", node_config.peers.len());
        Some(ReplicationManager::new(node_config))
    } else {
        tracing::info!("Replication disabled (no peers in node.json)");
        None
    };
    let transport: Arc<dyn Transport> = match &replication_manager {
        Some(repl) => repl.clone() as Arc<dyn Transport>,
        None => Arc::new(StandaloneTransport),
    };

    let store = Arc::new(JsonFileStore::in_dir(data_dir));
    tracing::info!("[ENGINE] snapshots persisted to {}", store.path().display());

    let engine = SyncEngine::new(node_id.clone(), sync_config).with_store(store);
    let (handle, engine_task) = spawn_engine(engine, transport);

    let state = Arc::new(AppState {
        node_id: node_id.clone(),
        engine: handle.clone(),
        replication_manager,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("roundsync node {} listening on {}", node_id, bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.shutdown().await;
    let _ = engine_task.await;
    tracing::info!("roundsync node {} stopped", node_id);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
