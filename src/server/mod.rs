//! Transport layer: axum HTTP ingestion and the WebSocket push channel

mod routes;
mod websocket;

pub use routes::router;

use eyre::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::hub::{Hub, shutdown_requested};

/// Bind `addr` and serve until the hub shuts down
pub async fn serve(hub: Hub, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {addr}"))?;
    serve_listener(hub, listener).await
}

/// Serve on an already-bound listener until the hub shuts down
///
/// Marks the hub started and runs the status heartbeat for the lifetime of
/// the listener.
pub async fn serve_listener(hub: Hub, listener: TcpListener) -> Result<()> {
    let local = listener.local_addr().context("Listener has no local address")?;
    info!(%local, "Listening");
    hub.mark_started(local.port());

    let reporter = tokio::spawn(hub.status_reporter().run(hub.shutdown_signal()));

    let mut shutdown = hub.shutdown_signal();
    axum::serve(listener, router(hub.clone()))
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
        .await
        .context("Server error")?;

    // The reporter follows the same flag; make sure it is set before waiting
    hub.shutdown();
    join_reporter(reporter).await;
    info!("Server stopped");
    Ok(())
}

/// Wait for the heartbeat task; a panic or cancellation is logged, not lost
async fn join_reporter(reporter: JoinHandle<()>) -> bool {
    match reporter.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, panicked = e.is_panic(), "Status reporter task failed");
            false
        }
    }
}
