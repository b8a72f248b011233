use std::sync::Arc;
use std::time::Duration;

use rasbora_common::config::SystemRadarConfig;
use serde::Serialize;
use sysinfo::System;
use tokio::sync::watch;

use crate::queue::QueueClient;

/// Node telemetry snapshot published onto `components.system_radar.stream`.
/// Ambient observability carried despite spec.md's Non-goals excluding a
/// full metrics/dashboard layer — grounded on `internal/systemradar`
/// (`gopsutil`), re-homed onto `sysinfo` since that is the crate the wider
/// example pack reaches for node telemetry.
#[derive(Serialize)]
struct RadarScan {
    worker_id: String,
    cpu_usage_percent: f32,
    memory_used_bytes: u64,
    memory_total_bytes: u64,
    load_average_one: f64,
}

/// Periodically scans the host and publishes a snapshot to the configured
/// radar stream. Advisory only — out-of-band dashboards consume it.
pub async fn run(
    queue: Arc<QueueClient>,
    config: SystemRadarConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::info!(worker_id = %config.unique_id, "system radar scanner started");

    let mut system = System::new_all();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        system.refresh_cpu_usage();
        system.refresh_memory();

        let load = sysinfo::System::load_average();
        let scan = RadarScan {
            worker_id: config.unique_id.clone(),
            cpu_usage_percent: system.global_cpu_usage(),
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
            load_average_one: load.one,
        };

        if let Err(e) = queue.send_radar(&config.stream, &scan).await {
            tracing::warn!(error = %e, "failed to publish radar scan");
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(config.scan_interval)) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(worker_id = %config.unique_id, "system radar scanner stopped");
}
