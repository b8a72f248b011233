use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use rasbora_common::types::{QueueItem, Task};
use rasbora_common::TaskId;
use serde::Serialize;
use serde_json::Value;

use crate::queue::QueueClient;

/// Shared state for the Task Intake Server (spec §4.6).
#[derive(Clone)]
pub struct IntakeState {
    pub queue: Arc<QueueClient>,
    pub queue_name: String,
}

pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/v1.0/tasks/create", post(create_task))
        .with_state(state)
}

#[derive(Serialize)]
struct IntakeResponse {
    error: bool,
    message: String,
    payload: Option<Value>,
}

impl IntakeResponse {
    fn ok(task_id: &TaskId) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                error: false,
                message: "task enqueued".to_string(),
                payload: Some(serde_json::json!({ "task_id": task_id.as_str() })),
            }),
        )
    }

    fn error(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Self {
                error: true,
                message: message.into(),
                payload: None,
            }),
        )
    }
}

/// `POST /v1.0/tasks/create`: validate, assign an id if absent, stamp
/// `created`, enqueue onto the transcoder queue.
async fn create_task(
    State(state): State<IntakeState>,
    Json(raw): Json<Value>,
) -> (StatusCode, Json<IntakeResponse>) {
    let mut task: Task = match serde_json::from_value(raw) {
        Ok(task) => task,
        Err(e) => return IntakeResponse::error(format!("invalid task payload: {e}")),
    };

    if let Err(message) = validate(&task) {
        return IntakeResponse::error(message);
    }

    if task.id.is_empty() {
        task.id = TaskId::generate();
    }
    task.created = now_ms();

    let id = task.id.clone();
    let item = QueueItem::new(id.as_str(), task.priority, task);
    match state.queue.enqueue(&state.queue_name, &item).await {
        Ok(()) => IntakeResponse::ok(&item.payload.id),
        Err(e) => IntakeResponse::error(format!("failed to enqueue task: {e}")),
    }
}

fn validate(task: &Task) -> Result<(), String> {
    if task.label.is_empty() {
        return Err("label is required".to_string());
    }
    if task.input.name.is_empty() || task.input.path.is_empty() {
        return Err("input is required".to_string());
    }
    if task.output.handler_ref.is_empty() || task.output.args.is_empty() {
        return Err("output is required".to_string());
    }
    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_redis_url() -> Option<String> {
        std::env::var("TEST_REDIS_URL").ok()
    }

    fn valid_task_payload() -> serde_json::Value {
        serde_json::json!({
            "label": "demo",
            "priority": 1.0,
            "input": {"filesystem_kind": "local", "path": "/in", "name": "a.mp4"},
            "output": {"handler_ref": "rasbora:h264", "container": ".mp4", "args": [{"quality": "720p"}]},
            "callback": {"url": "http://cb/ok", "opaque_data": {}},
        })
    }

    async fn spawn_intake(queue_name: String, queue: Arc<QueueClient>) -> String {
        let app = router(IntakeState { queue, queue_name });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1.0/tasks/create")
    }

    #[tokio::test]
    async fn valid_task_is_assigned_an_id_and_enqueued() {
        let Some(url) = test_redis_url() else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue_client = Arc::new(QueueClient::connect(&url).await.unwrap());
        let queue_name = format!("test-intake-{}", uuid::Uuid::new_v4());
        let endpoint = spawn_intake(queue_name.clone(), Arc::clone(&queue_client)).await;

        let response = reqwest::Client::new()
            .post(&endpoint)
            .json(&valid_task_payload())
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], false);
        assert!(!body["payload"]["task_id"].as_str().unwrap().is_empty());

        let got: Option<QueueItem<Task>> = queue_client.dequeue(&queue_name, "w1").await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn missing_label_is_rejected_with_envelope() {
        let Some(url) = test_redis_url() else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue_client = Arc::new(QueueClient::connect(&url).await.unwrap());
        let queue_name = format!("test-intake-{}", uuid::Uuid::new_v4());
        let endpoint = spawn_intake(queue_name, queue_client).await;

        let mut payload = valid_task_payload();
        payload["label"] = serde_json::json!("");

        let response = reqwest::Client::new()
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .unwrap();

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["payload"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected_with_envelope_not_axum_default() {
        let Some(url) = test_redis_url() else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue_client = Arc::new(QueueClient::connect(&url).await.unwrap());
        let queue_name = format!("test-intake-{}", uuid::Uuid::new_v4());
        let endpoint = spawn_intake(queue_name, queue_client).await;

        let response = reqwest::Client::new()
            .post(&endpoint)
            .json(&serde_json::json!({"label": "demo"}))
            .send()
            .await
            .unwrap();

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], true);
    }
}
