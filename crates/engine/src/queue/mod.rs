use redis::aio::MultiplexedConnection;
use serde::{de::DeserializeOwned, Serialize};

use rasbora_common::types::QueueItem;

/// Key templates for a named queue, derived from `{{name}}` substitution.
/// Mirrors the seven-key bundle of §3: waiting/items/status/worker/retry
/// live as plain templates, `processing(Q):<id>` is built per-call.
#[derive(Clone, Debug)]
pub struct QueueKeyTemplates {
    pub waiting: String,
    pub items: String,
    pub status: String,
    pub worker: String,
    pub retry: String,
    pub processing: String,
    pub logs: String,
}

impl QueueKeyTemplates {
    /// The default templates shipped with the engine, matching the Go
    /// original's `Database.Redis.Structure.Queue.*` defaults.
    pub fn defaults() -> Self {
        Self {
            waiting: "waiting({{name}})".to_string(),
            items: "items({{name}})".to_string(),
            status: "status({{name}})".to_string(),
            worker: "worker({{name}})".to_string(),
            retry: "retry({{name}})".to_string(),
            processing: "processing({{name}})".to_string(),
            logs: "logs({{name}})".to_string(),
        }
    }

    fn resolve(template: &str, name: &str) -> String {
        template.replacen("{{name}}", name, 1)
    }
}

/// Fully-resolved key set for one queue name.
struct QueueKeys {
    waiting: String,
    items: String,
    status: String,
    worker: String,
    retry: String,
    processing_prefix: String,
    logs: String,
}

impl QueueKeys {
    fn resolve(templates: &QueueKeyTemplates, name: &str) -> Self {
        Self {
            waiting: QueueKeyTemplates::resolve(&templates.waiting, name),
            items: QueueKeyTemplates::resolve(&templates.items, name),
            status: QueueKeyTemplates::resolve(&templates.status, name),
            worker: QueueKeyTemplates::resolve(&templates.worker, name),
            retry: QueueKeyTemplates::resolve(&templates.retry, name),
            processing_prefix: QueueKeyTemplates::resolve(&templates.processing, name),
            logs: QueueKeyTemplates::resolve(&templates.logs, name),
        }
    }

    fn processing_stream(&self, id: &str) -> String {
        format!("{}:{}", self.processing_prefix, id)
    }
}

/// Cluster-wide liveness index, one sorted set shared by every queue.
pub const HEARTBEAT_KEY: &str = "cluster/heartbeat";

/// Redis-backed implementation of the Queue Coordinator (§4.1).
///
/// Every compound operation below is issued as a single `MULTI`/`EXEC`
/// pipeline so partial states are never observable, matching the Go
/// original's `TxPipeline()` usage in `database_redis.go`.
pub struct QueueClient {
    conn: MultiplexedConnection,
    keys: QueueKeyTemplates,
}

impl QueueClient {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        Self::connect_with_templates(redis_url, QueueKeyTemplates::defaults()).await
    }

    pub async fn connect_with_templates(
        redis_url: &str,
        keys: QueueKeyTemplates,
    ) -> Result<Self, QueueError> {
        tracing::info!("connecting to shared store");

        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Connection(e.to_string()))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let queue_client = Self { conn, keys };
        queue_client.health_check().await?;
        tracing::info!("shared store connection established");

        Ok(queue_client)
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        if pong != "PONG" {
            return Err(QueueError::Command(format!(
                "unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }

    /// Enqueue(Q, item): atomic add-to-waiting + store payload + mark
    /// waiting + clear owner + bump retry. Re-enqueuing an existing id
    /// updates the payload and increments `retry(Q)[id]`.
    pub async fn enqueue<T: Serialize>(
        &self,
        queue: &str,
        item: &QueueItem<T>,
    ) -> Result<(), QueueError> {
        let keys = QueueKeys::resolve(&self.keys, queue);
        let score_with_id = format!("{}:{}", now_ms(), item.id);
        let payload = serde_json::to_string(item).map_err(|e| QueueError::Command(e.to_string()))?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .zadd(&keys.waiting, &score_with_id, item.priority)
            .hset(&keys.items, &item.id, &payload)
            .hset(&keys.status, &item.id, "waiting")
            .hdel(&keys.worker, &item.id)
            .hincr(&keys.retry, &item.id, 1)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(())
    }

    /// Dequeue(Q, worker_id): crash-recovery sweep, then atomic pop-min
    /// claim. Returns `Ok(None)` when the waiting set is empty.
    pub async fn dequeue<T: Serialize + DeserializeOwned>(
        &self,
        queue: &str,
        worker_id: &str,
    ) -> Result<Option<QueueItem<T>>, QueueError> {
        let keys = QueueKeys::resolve(&self.keys, queue);
        self.recover_worker_claims::<T>(queue, &keys, worker_id)
            .await;

        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(&keys.waiting)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        let Some((member, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let id = member
            .split_once(':')
            .map(|(_, id)| id.to_string())
            .ok_or_else(|| QueueError::Command(format!("malformed waiting member: {member}")))?;

        let raw: String = redis::cmd("HGET")
            .arg(&keys.items)
            .arg(&id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        let item: QueueItem<T> =
            serde_json::from_str(&raw).map_err(|e| QueueError::Command(e.to_string()))?;

        redis::pipe()
            .atomic()
            .hset(&keys.status, &id, "working")
            .hset(&keys.worker, &id, worker_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(Some(item))
    }

    /// The pre-claim phase of Dequeue: return any item this worker id is
    /// still recorded as owning from a previous life back to `waiting` (via
    /// `Enqueue`, which also bumps its retry count). Failures are logged and
    /// never block the subsequent claim.
    async fn recover_worker_claims<T: Serialize + DeserializeOwned>(
        &self,
        queue: &str,
        keys: &QueueKeys,
        worker_id: &str,
    ) {
        let mut conn = self.conn.clone();
        let owners: std::collections::HashMap<String, String> = match redis::cmd("HGETALL")
            .arg(&keys.worker)
            .query_async(&mut conn)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "crash-recovery sweep: failed to read worker map");
                return;
            }
        };

        for (id, owner) in owners {
            if owner != worker_id {
                continue;
            }

            let raw: Result<String, redis::RedisError> = redis::cmd("HGET")
                .arg(&keys.items)
                .arg(&id)
                .query_async(&mut conn)
                .await;
            let raw = match raw {
                Ok(r) => r,
                Err(_) => continue,
            };

            let item: QueueItem<T> = match serde_json::from_str(&raw) {
                Ok(i) => i,
                Err(_) => continue,
            };

            if let Err(e) = self.enqueue(queue, &item).await {
                tracing::warn!(error = %e, task_id = %id, "crash-recovery sweep: failed to reclaim stale claim");
            } else {
                tracing::info!(task_id = %id, worker_id, "crash-recovery sweep: stale claim returned to waiting");
            }
        }
    }

    /// Finished(Q, item): terminal success.
    pub async fn finished<T: Serialize>(
        &self,
        queue: &str,
        item: &QueueItem<T>,
    ) -> Result<(), QueueError> {
        let keys = QueueKeys::resolve(&self.keys, queue);
        let payload = serde_json::to_string(item).map_err(|e| QueueError::Command(e.to_string()))?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(&keys.items, &item.id, &payload)
            .hset(&keys.status, &item.id, "finished")
            .hdel(&keys.worker, &item.id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(())
    }

    /// Failed(Q, item, message): terminal failure. Never re-enqueues —
    /// callers implement retry-with-limit themselves via `total_retry`.
    pub async fn failed<T: Serialize>(
        &self,
        queue: &str,
        item: &QueueItem<T>,
        message: &str,
    ) -> Result<(), QueueError> {
        let keys = QueueKeys::resolve(&self.keys, queue);
        let payload = serde_json::to_string(item).map_err(|e| QueueError::Command(e.to_string()))?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(keys.processing_stream(&item.id))
            .hset(&keys.items, &item.id, &payload)
            .hset(&keys.status, &item.id, "failed")
            .hset(&keys.logs, &item.id, message)
            .hdel(&keys.worker, &item.id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(())
    }

    /// Processing(Q, event): append one progress event to the task's stream.
    pub async fn processing<E: Serialize>(
        &self,
        queue: &str,
        task_id: &str,
        event: &E,
    ) -> Result<(), QueueError> {
        let keys = QueueKeys::resolve(&self.keys, queue);
        let fields = serde_json::to_value(event).map_err(|e| QueueError::Command(e.to_string()))?;
        let flat = flatten_to_field_pairs(&fields);

        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(keys.processing_stream(task_id)).arg("*");
        for (k, v) in flat {
            cmd.arg(k).arg(v);
        }
        cmd.query_async::<String>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(())
    }

    /// TotalRetry(Q, item) -> attempt count; -1 on any read error.
    pub async fn total_retry(&self, queue: &str, id: &str) -> i64 {
        let keys = QueueKeys::resolve(&self.keys, queue);
        let mut conn = self.conn.clone();
        let raw: Result<String, redis::RedisError> = redis::cmd("HGET")
            .arg(&keys.retry)
            .arg(id)
            .query_async(&mut conn)
            .await;

        match raw {
            Ok(s) => s.parse::<i64>().unwrap_or(-1),
            Err(_) => -1,
        }
    }

    /// Publish a heartbeat pulse into the cluster-wide heartbeat index.
    pub async fn send_heartbeat(&self, role: &str, worker_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let member = format!("{}:{}", role, worker_id);
        redis::cmd("ZADD")
            .arg(HEARTBEAT_KEY)
            .arg(now_ms())
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(())
    }

    /// Publish one node-telemetry snapshot onto the configured radar stream.
    pub async fn send_radar<E: Serialize>(&self, stream: &str, scan: &E) -> Result<(), QueueError> {
        let fields = serde_json::to_value(scan).map_err(|e| QueueError::Command(e.to_string()))?;
        let flat = flatten_to_field_pairs(&fields);

        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (k, v) in flat {
            cmd.arg(k).arg(v);
        }
        cmd.query_async::<String>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Flatten a serde_json object into `XADD`-style field/value string pairs.
fn flatten_to_field_pairs(value: &serde_json::Value) -> Vec<(String, String)> {
    match value.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect(),
        None => Vec::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("shared store connection error: {0}")]
    Connection(String),

    #[error("shared store command error: {0}")]
    Command(String),
}

impl From<QueueError> for rasbora_common::RasboraError {
    fn from(e: QueueError) -> Self {
        rasbora_common::RasboraError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasbora_common::types::Task;

    fn test_redis_url() -> Option<String> {
        std::env::var("TEST_REDIS_URL").ok()
    }

    async fn connect() -> Option<QueueClient> {
        let url = test_redis_url()?;
        QueueClient::connect(&url).await.ok()
    }

    fn sample_task(id: &str, priority: f64) -> Task {
        serde_json::from_value(serde_json::json!({
            "task_id": id,
            "label": "demo",
            "priority": priority,
            "input": {"filesystem_kind": "local", "path": "/in", "name": "a.mp4"},
            "output": {"handler_ref": "rasbora:h264-720p", "container": ".mp4", "args": [{"quality": "720p"}]},
            "callback": {"url": "http://cb/ok", "opaque_data": {}},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_returns_same_payload() {
        let Some(client) = connect().await else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue = format!("test-queue-{}", uuid::Uuid::new_v4());
        let task = sample_task("t1", 1.0);
        let item = QueueItem::new("t1", task.priority, task.clone());

        client.enqueue(&queue, &item).await.unwrap();
        let got: QueueItem<Task> = client
            .dequeue(&queue, "w1")
            .await
            .unwrap()
            .expect("expected an item");
        assert_eq!(got.id, "t1");
        assert_eq!(got.payload.label, task.label);
        assert_eq!(client.total_retry(&queue, "t1").await, 1);
    }

    #[tokio::test]
    async fn dequeue_on_empty_queue_returns_none() {
        let Some(client) = connect().await else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue = format!("test-queue-{}", uuid::Uuid::new_v4());
        let got: Option<QueueItem<Task>> = client.dequeue(&queue, "w1").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn priority_order_is_respected() {
        let Some(client) = connect().await else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue = format!("test-queue-{}", uuid::Uuid::new_v4());
        let lo = sample_task("t_lo", 10.0);
        let hi = sample_task("t_hi", 1.0);
        client
            .enqueue(&queue, &QueueItem::new("t_lo", lo.priority, lo))
            .await
            .unwrap();
        client
            .enqueue(&queue, &QueueItem::new("t_hi", hi.priority, hi))
            .await
            .unwrap();

        let first: QueueItem<Task> = client.dequeue(&queue, "w1").await.unwrap().unwrap();
        assert_eq!(first.id, "t_hi");
    }

    #[tokio::test]
    async fn crash_recovery_reclaims_stale_claim() {
        let Some(client) = connect().await else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue = format!("test-queue-{}", uuid::Uuid::new_v4());
        let task = sample_task("t1", 1.0);
        client
            .enqueue(&queue, &QueueItem::new("t1", task.priority, task))
            .await
            .unwrap();

        // w1 claims it and "crashes" without calling Finished/Failed.
        let _claimed: QueueItem<Task> = client.dequeue(&queue, "w1").await.unwrap().unwrap();

        // w1 restarts; its next dequeue first recovers, then claims again.
        let recovered: QueueItem<Task> = client.dequeue(&queue, "w1").await.unwrap().unwrap();
        assert_eq!(recovered.id, "t1");
        assert_eq!(client.total_retry(&queue, "t1").await, 2);
    }
}
