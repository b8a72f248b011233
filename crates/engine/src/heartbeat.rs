use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::queue::QueueClient;

/// Periodic per-worker liveness publisher (§4.2). Parallel to each role
/// worker; advisory only — never consulted by the core queue logic.
/// Stops on the shared cancellation signal.
pub async fn run(
    queue: Arc<QueueClient>,
    role: String,
    worker_id: String,
    send_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::info!(role = %role, worker_id = %worker_id, "heartbeat emitter started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Err(e) = queue.send_heartbeat(&role, &worker_id).await {
            tracing::warn!(role = %role, worker_id = %worker_id, error = %e, "heartbeat publish failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(send_interval) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(role = %role, worker_id = %worker_id, "heartbeat emitter stopped");
}
