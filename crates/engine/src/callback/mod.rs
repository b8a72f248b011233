use std::sync::Arc;
use std::time::Duration;

use rasbora_common::config::CallbackManagerConfig;
use rasbora_common::types::{Callback, QueueItem};
use rasbora_common::WorkerId;
use tokio::sync::watch;

use crate::queue::QueueClient;

/// At-least-once callback delivery worker (spec §4.5). Polls the callback
/// queue and POSTs each envelope to its submitter-supplied URL; success iff
/// HTTP 200, otherwise the same retry-with-limit logic as the transcoder.
pub struct CallbackWorker {
    queue: Arc<QueueClient>,
    config: CallbackManagerConfig,
    worker_id: WorkerId,
}

impl CallbackWorker {
    pub fn new(queue: Arc<QueueClient>, config: CallbackManagerConfig) -> Self {
        let worker_id = WorkerId::new(config.unique_id.clone());
        Self {
            queue,
            config,
            worker_id,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.worker_id, queue = %self.config.queue, "callback worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.check_new_task_interval)) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let item: Option<QueueItem<Callback>> =
                match self.queue.dequeue(&self.config.queue, self.worker_id.as_str()).await {
                    Ok(item) => item,
                    Err(e) => {
                        tracing::error!(error = %e, "dequeue failed");
                        continue;
                    }
                };

            let Some(item) = item else {
                continue;
            };

            self.deliver(item).await;
        }

        tracing::info!(worker_id = %self.worker_id, "callback worker stopped");
    }

    async fn deliver(&self, item: QueueItem<Callback>) {
        let task_id = item.payload.task_id.clone();

        // A fresh client per send, matching the Go original's per-send
        // `&http.Client{Timeout: ...}` construction in `callback_http.go`.
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.http.sending_timeout))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                self.retry_or_fail(item, format!("failed to build http client: {e}")).await;
                return;
            }
        };

        let result = client
            .post(&item.payload.url)
            .header("Content-Type", "application/json")
            .json(&item.payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                if let Err(e) = self.queue.finished(&self.config.queue, &item).await {
                    tracing::error!(task_id = %task_id, error = %e, "failed to mark callback finished");
                }
                tracing::info!(task_id = %task_id, url = %item.payload.url, "callback delivered");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                self.retry_or_fail(item, format!("callback responded with {status}: {body}"))
                    .await;
            }
            Err(e) => {
                self.retry_or_fail(item, format!("callback delivery failed: {e}")).await;
            }
        }
    }

    async fn retry_or_fail(&self, item: QueueItem<Callback>, message: String) {
        let task_id = item.payload.task_id.clone();
        let retry_count = self.queue.total_retry(&self.config.queue, &item.id).await;
        let retry_limit = self.config.make_as_failed_after_retry as i64;

        if retry_count >= retry_limit {
            tracing::warn!(task_id = %task_id, retry_count, retry_limit, %message, "callback retry ceiling reached");
            if let Err(e) = self.queue.failed(&self.config.queue, &item, &message).await {
                tracing::error!(task_id = %task_id, error = %e, "failed to mark callback failed");
            }
            return;
        }

        tracing::debug!(task_id = %task_id, retry_count, retry_limit, %message, "re-enqueuing callback for retry");
        if let Err(e) = self.queue.enqueue(&self.config.queue, &item).await {
            tracing::error!(task_id = %task_id, error = %e, "failed to re-enqueue callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasbora_common::types::Timeline;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_redis_url() -> Option<String> {
        std::env::var("TEST_REDIS_URL").ok()
    }

    fn sample_callback(task_id: &str, url: String) -> Callback {
        Callback {
            task_id: rasbora_common::TaskId::new(task_id),
            priority: 1.0,
            url,
            opaque_data: serde_json::json!({}),
            error: false,
            message: "ok".into(),
            outputs: vec![],
            log_ref: String::new(),
            timeline: Timeline::default(),
        }
    }

    fn test_config(queue: String) -> CallbackManagerConfig {
        CallbackManagerConfig {
            unique_id: "cb-test".into(),
            queue,
            check_new_task_interval: 1,
            make_as_failed_after_retry: 2,
            http: rasbora_common::config::CallbackHttpConfig { sending_timeout: 5 },
        }
    }

    /// Binds a one-shot HTTP responder that always answers with `status` and
    /// counts how many requests it received.
    async fn spawn_responder(status: axum::http::StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_for_handler = Arc::clone(&hits);

        let app = axum::Router::new().route(
            "/cb",
            axum::routing::post(move || {
                let hits = Arc::clone(&hits_for_handler);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/cb"), hits)
    }

    #[tokio::test]
    async fn delivers_and_marks_finished_on_http_200() {
        let Some(url) = test_redis_url() else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue_client = Arc::new(QueueClient::connect(&url).await.unwrap());
        let queue_name = format!("test-callback-{}", uuid::Uuid::new_v4());
        let (cb_url, hits) = spawn_responder(axum::http::StatusCode::OK).await;

        let worker = CallbackWorker::new(Arc::clone(&queue_client), test_config(queue_name.clone()));
        let callback = sample_callback("t1", cb_url);
        let item = QueueItem::new("t1", callback.priority, callback);

        worker.deliver(item).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(queue_client.total_retry(&queue_name, "t1").await, 0);
    }

    #[tokio::test]
    async fn non_200_below_retry_ceiling_is_re_enqueued() {
        let Some(url) = test_redis_url() else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue_client = Arc::new(QueueClient::connect(&url).await.unwrap());
        let queue_name = format!("test-callback-{}", uuid::Uuid::new_v4());
        let (cb_url, _hits) = spawn_responder(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;

        let worker = CallbackWorker::new(Arc::clone(&queue_client), test_config(queue_name.clone()));
        let callback = sample_callback("t2", cb_url);
        let item = QueueItem::new("t2", callback.priority, callback);

        worker.deliver(item).await;

        let requeued: Option<QueueItem<Callback>> =
            queue_client.dequeue(&queue_name, "w1").await.unwrap();
        assert!(requeued.is_some());
    }
}
