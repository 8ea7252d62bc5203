//! aindex-server: HTTP front end for the fingerprint index engine.
//!
//! Usage: aindex-server [--config <path>]

use std::sync::Arc;

use aindex::config::Config;
use aindex::http::{router, AppState};
use aindex::metrics::Metrics;
use aindex::registry::Registry;
use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.iter().position(|a| a == "--config").and_then(|i| args.get(i + 1));

    let config = match config_path {
        Some(path) => Config::from_file(std::path::Path::new(path)).expect("failed to load config file"),
        None => Config::default(),
    }
    .with_env_overrides();

    std::fs::create_dir_all(&config.data_dir).expect("failed to create data directory");

    let metrics = Arc::new(Metrics::new());
    let registry = Registry::new(&config, metrics.clone());
    let bind_addr = config.http_bind_addr.clone();
    let state = Arc::new(AppState { registry, metrics, config });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(async move {
        let app = router(state);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind HTTP listener");
        info!(addr = %bind_addr, "aindex-server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .expect("server error");
    });
}

/// Waits for SIGINT/SIGTERM via `signal-hook`, matching the teacher's
/// graceful-shutdown pattern but driven through a oneshot channel so the
/// async server task can await it directly instead of spinning a thread
/// that calls `std::process::exit`.
async fn shutdown_signal() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM])
            .expect("failed to register signal handlers");
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "received shutdown signal");
        }
        let _ = tx.send(());
    });
    let _ = rx.await;
}
