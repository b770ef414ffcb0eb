use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::Request;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};

use crate::config::Config;
use crate::coordinator::SessionLog;
use crate::machine::RecordingMachine;
use crate::offload::OffloadClient;
use crate::registry::PeerRegistry;
use crate::sync::SyncMonitor;

pub mod config;
mod coordinator;
mod driver;
mod error;
mod machine;
mod offload;
mod registry;
mod result;
mod route;
mod storage;
mod sync;
mod system;
mod tick;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    machine: Arc<RecordingMachine>,
    sync: Arc<SyncMonitor>,
    registry: Arc<PeerRegistry>,
    offload: OffloadClient,
    sessions: Arc<RwLock<SessionLog>>,
    /// Fan-out client; per-request deadlines are set at the call sites.
    client: reqwest::Client,
    /// Short-deadline client for the registry probe loop.
    probe_client: reqwest::Client,
}

pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(
        node_id = cfg.node.id,
        "node listening on {}",
        listener.local_addr().unwrap()
    );

    std::fs::create_dir_all(&cfg.storage.recordings_root).expect("create recordings root");
    let driver = driver::from_config(&cfg.driver).expect("camera driver");
    let sync = Arc::new(SyncMonitor::new(cfg.sync.clone(), &cfg.node));
    let machine = Arc::new(RecordingMachine::new(cfg.clone(), driver, sync.clone()));
    let registry = Arc::new(PeerRegistry::new(&cfg));
    let (offload, offload_rx) = OffloadClient::new(cfg.offload.clone(), cfg.storage.clone());

    let probe_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(500))
        .timeout(Duration::from_millis(cfg.cluster.status_timeout_ms))
        .build()
        .unwrap();

    let state = AppState {
        config: cfg.clone(),
        machine: machine.clone(),
        sync: sync.clone(),
        registry,
        offload: offload.clone(),
        sessions: Arc::new(RwLock::new(SessionLog::default())),
        client: reqwest::Client::new(),
        probe_client,
    };

    tokio::spawn(sync.run());
    tokio::spawn(tick::probe_peers(state.clone()));
    if cfg.discovery.enabled {
        tokio::spawn(tick::discovery_announce(state.clone()));
        tokio::spawn(tick::discovery_listen(state.clone()));
    }
    tokio::spawn(offload.worker(offload_rx));

    let app = Router::new()
        .merge(route::node::route())
        .merge(route::sync::route())
        .merge(route::coordinator::route())
        .with_state(state)
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                info_span!(
                    "http_request",
                    uri = ?request.uri(),
                    method = ?request.method(),
                )
            }),
        );

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("application error: {e}"));

    // finalize an in-flight recording before the process goes away
    machine.shutdown().await;
}
