use std::collections::HashMap;
use std::sync::Arc;

use rasbora_common::types::ProgressEvent;
use rasbora_common::TaskId;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::queue::QueueClient;

const REQUIRED_KEYS: [&str; 5] = ["fps", "speed", "frame", "bitrate", "time"];

/// Non-owning handle the monitor uses to publish events — the pipeline
/// context outlives the monitor (§9 "Cyclic pointers back to the pipeline").
struct MonitorContext {
    queue: Arc<QueueClient>,
    queue_name: String,
    task_id: TaskId,
    duration_us: i64,
}

/// Transforms the engine's line-oriented progress stream into structured
/// events on `processing(Q):<task_id>`. Grounded on
/// `transcoder_ffmpeg_process.go`'s `FfmpegProgressingMonitor`.
pub struct ProgressMonitor {
    shutdown_tx: oneshot::Sender<()>,
    accept_handle: tokio::task::JoinHandle<()>,
}

impl ProgressMonitor {
    /// Bind the listener before the caller spawns the engine subprocess, so
    /// the engine never races the monitor for the port.
    pub async fn start(
        addr: &str,
        queue: Arc<QueueClient>,
        queue_name: String,
        task_id: TaskId,
        duration_us: i64,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = Arc::new(MonitorContext {
            queue,
            queue_name,
            task_id,
            duration_us,
        });

        let accept_handle = tokio::spawn(accept_loop(listener, shutdown_rx, ctx));

        Ok(Self {
            shutdown_tx,
            accept_handle,
        })
    }

    /// Closes the listener and waits for all per-connection handlers to drain.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.accept_handle.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
    ctx: Arc<MonitorContext>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, _)) => {
                        connections.spawn(handle_connection(socket, Arc::clone(&ctx)));
                    }
                    Err(_) => break,
                }
            }
        }
    }

    while connections.join_next().await.is_some() {}
}

async fn handle_connection(mut socket: tokio::net::TcpStream, ctx: Arc<MonitorContext>) {
    let mut buf = [0u8; 2048];
    let mut fields: HashMap<&'static str, String> = HashMap::new();

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };

        for line in String::from_utf8_lossy(&buf[..n]).split('\n') {
            for key in REQUIRED_KEYS {
                let wire_key = if key == "time" { "out_time_ms" } else { key };
                if let Some(value) = line.strip_prefix(&format!("{wire_key}=")) {
                    fields.insert(key, value.trim().to_string());
                }
            }
        }

        if !REQUIRED_KEYS.iter().all(|k| fields.contains_key(k)) {
            continue;
        }

        let Some(event) = build_event(&ctx, &fields) else {
            continue;
        };

        if let Err(e) = ctx
            .queue
            .processing(&ctx.queue_name, ctx.task_id.as_str(), &event)
            .await
        {
            tracing::error!(error = %e, task_id = %ctx.task_id, "failed to send processing event to stream");
        }
    }
}

fn build_event(ctx: &MonitorContext, fields: &HashMap<&'static str, String>) -> Option<ProgressEvent> {
    let time: f64 = fields.get("time")?.parse().ok()?;
    let percentage = if ctx.duration_us > 0 {
        100.0 * time / ctx.duration_us as f64
    } else {
        0.0
    };

    Some(ProgressEvent {
        task_id: ctx.task_id.clone(),
        fps: fields.get("fps")?.clone(),
        speed: fields.get("speed")?.clone(),
        frame: fields.get("frame")?.clone(),
        bitrate: fields.get("bitrate")?.clone(),
        time: fields.get("time")?.clone(),
        percentage: format!("{:.2}", percentage),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn test_redis_url() -> Option<String> {
        std::env::var("TEST_REDIS_URL").ok()
    }

    /// Raw `XLEN` against the processing stream key, bypassing `QueueClient`
    /// (which exposes no reader for it — only the engine publishes, out-of-band
    /// dashboards are the real consumer per spec.md).
    async fn stream_len(redis_url: &str, queue_name: &str, task_id: &str) -> i64 {
        let client = redis::Client::open(redis_url).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        redis::cmd("XLEN")
            .arg(format!("processing({queue_name}):{task_id}"))
            .query_async(&mut conn)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn publishes_event_only_once_all_five_keys_seen() {
        let Some(url) = test_redis_url() else {
            eprintln!("skipping: TEST_REDIS_URL not set");
            return;
        };
        let queue = Arc::new(crate::queue::QueueClient::connect(&url).await.unwrap());
        let queue_name = format!("test-monitor-{}", uuid::Uuid::new_v4());
        let task_id = TaskId::new("t1");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let monitor = ProgressMonitor::start(&addr, Arc::clone(&queue), queue_name.clone(), task_id.clone(), 10_000_000)
            .await
            .unwrap();

        let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
        // Partial frame: only some keys. No event should publish yet.
        stream.write_all(b"fps=30\nspeed=1.0x\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(stream_len(&url, &queue_name, task_id.as_str()).await, 0);

        // Complete the frame.
        stream
            .write_all(b"frame=100\nbitrate=512kbits/s\nout_time_ms=5000000\n")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        monitor.stop().await;

        assert_eq!(stream_len(&url, &queue_name, task_id.as_str()).await, 1);
    }
}
