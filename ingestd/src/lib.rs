use std::future::Future;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};

use crate::config::Config;
use crate::store::IngestStore;

pub mod config;
mod error;
mod result;
mod route;
mod store;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    store: Arc<IngestStore>,
}

pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("ingest listening on {}", listener.local_addr().unwrap());

    let store = Arc::new(IngestStore::new(cfg.storage.clone()));
    tokio::spawn(store.clone().tick());

    let state = AppState {
        config: cfg.clone(),
        store,
    };

    let app = Router::new()
        .merge(route::upload::route())
        .merge(route::session::route())
        .with_state(state)
        .layer(DefaultBodyLimit::max(cfg.http.max_chunk_bytes + 64 * 1024))
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
}
