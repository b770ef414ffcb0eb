use std::env;

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. `RUST_LOG` wins over the
/// filter derived from the config file.
pub fn set_log(env_filter: String) {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", env_filter);
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

#[cfg(unix)]
pub async fn wait_for_stop_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).unwrap();
    let mut interrupt = signal(SignalKind::interrupt()).unwrap();

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
pub async fn wait_for_stop_signal() -> &'static str {
    tokio::signal::ctrl_c().await.unwrap();
    "CTRL_C"
}
