mod callback;
mod config;
mod filesystem;
mod heartbeat;
mod intake;
mod queue;
mod radar;
mod transcoder;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::watch;

use callback::CallbackWorker;
use intake::IntakeState;
use queue::QueueClient;
use transcoder::TranscoderWorker;

/// Shared state for the `/health` and `/metrics` endpoints.
struct AppState {
    queue: Arc<QueueClient>,
    metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Rasbora engine starting");

    let config_dir = std::env::var("RASBORA_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let system_config = match config::load_config(&config_dir) {
        Ok(config) => {
            tracing::info!("configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());

    let queue_client = match QueueClient::connect(&redis_url).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to shared store");
            std::process::exit(1);
        }
    };

    tracing::info!("shared store connection established");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut role_handles = Vec::new();

    let components = &system_config.components;

    // Heartbeat rides alongside whichever roles are active rather than
    // being a role of its own (spec §4.2).
    if system_config.heartbeat.enabled {
        for role in &components.active {
            let worker_id = match role.as_str() {
                "video_transcoding" => components.video_transcoding.unique_id.clone(),
                "callback_manager" => components.callback_manager.unique_id.clone(),
                "task_intake" => continue,
                "system_radar" => components.system_radar.unique_id.clone(),
                _ => continue,
            };
            let queue = Arc::clone(&queue_client);
            let role = role.clone();
            let interval = std::time::Duration::from_secs(system_config.heartbeat.send_interval);
            let rx = shutdown_rx.clone();
            role_handles.push(tokio::spawn(heartbeat::run(queue, role, worker_id, interval, rx)));
        }
    }

    for role in &components.active {
        match role.as_str() {
            "video_transcoding" => {
                let worker = match TranscoderWorker::new(
                    Arc::clone(&queue_client),
                    components.video_transcoding.clone(),
                    system_config.filesystem.clone(),
                    components.callback_manager.queue.clone(),
                ) {
                    Ok(worker) => Arc::new(worker),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to start video transcoding worker");
                        std::process::exit(1);
                    }
                };
                role_handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
            }
            "callback_manager" => {
                let worker = Arc::new(CallbackWorker::new(
                    Arc::clone(&queue_client),
                    components.callback_manager.clone(),
                ));
                role_handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
            }
            "system_radar" => {
                let queue = Arc::clone(&queue_client);
                let config = components.system_radar.clone();
                let rx = shutdown_rx.clone();
                role_handles.push(tokio::spawn(radar::run(queue, config, rx)));
            }
            "task_intake" => {}
            other => {
                tracing::warn!(role = other, "unknown role in components.active, ignoring");
            }
        }
    }

    let state = Arc::new(AppState {
        queue: Arc::clone(&queue_client),
        metrics_handle,
    });

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    if components.active.iter().any(|r| r == "task_intake") {
        let intake_state = IntakeState {
            queue: queue_client,
            queue_name: components.video_transcoding.queue.clone(),
        };
        app = app.merge(intake::router(intake_state));
    }

    let bind_addr = components.task_intake.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!(addr = %bind_addr, "rasbora engine listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(wait_for_shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "http server error");
    }

    let _ = shutdown_tx.send(true);
    for handle in role_handles {
        let _ = handle.await;
    }

    tracing::info!("rasbora engine stopped");
}

async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ok = state.queue.health_check().await.is_ok();
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if ok { "healthy" } else { "unhealthy" },
        "services": { "shared_store": if ok { "healthy" } else { "unhealthy" } }
    });

    (status, Json(body))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
