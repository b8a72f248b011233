mod handlers;
mod monitor;
mod probe;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rasbora_common::config::{FilesystemConfig, VideoTranscodingConfig};
use rasbora_common::types::{Callback, FileRef, QueueItem, Task, Timeline};
use rasbora_common::{RasboraError, TaskId, WorkerId};
use tera::Tera;
use tokio::sync::watch;

use crate::filesystem::{destination_prefix, mover_for};
use crate::queue::QueueClient;

use monitor::ProgressMonitor;
use probe::ProbeInfo;

/// Per-task staging state: local working paths materialized by the prepare
/// stages and consumed by later stages and by cleanup. Grounded on the
/// private `_temporary*` fields of the Go original's `FfmpegTranscoderEngine`.
struct TaskContext {
    working_path: PathBuf,
    log_file: PathBuf,
    input_file: PathBuf,
    output_files: Vec<PathBuf>,
}

/// Result of a successful pipeline run, carried into `success_task`.
struct PipelineSuccess {
    output_refs: Vec<String>,
    log_ref: String,
}

/// Single-threaded polling worker implementing the Transcoder Worker
/// Pipeline (spec §4.3). One instance per enabled `video_transcoding` role.
pub struct TranscoderWorker {
    queue: Arc<QueueClient>,
    config: VideoTranscodingConfig,
    filesystem: FilesystemConfig,
    worker_id: WorkerId,
    builtin_templates: Tera,
    callback_queue: String,
}

impl TranscoderWorker {
    pub fn new(
        queue: Arc<QueueClient>,
        config: VideoTranscodingConfig,
        filesystem: FilesystemConfig,
        callback_queue: String,
    ) -> Result<Self, RasboraError> {
        let worker_id = WorkerId::new(config.unique_id.clone());
        let builtin_templates = handlers::load_builtin_templates()?;

        Ok(Self {
            queue,
            config,
            filesystem,
            worker_id,
            builtin_templates,
            callback_queue,
        })
    }

    /// Main loop: sleep, Dequeue, process. Exits at the next sleep boundary
    /// once `shutdown_rx` reports true.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.worker_id, queue = %self.config.queue, "transcoder worker started");

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

            let item: Option<QueueItem<Task>> =
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

            Arc::clone(&self).process(item).await;
        }

        tracing::info!(worker_id = %self.worker_id, "transcoder worker stopped");
    }

    /// Runs one task's pipeline inside a dedicated tokio task so an
    /// unexpected panic is caught by the runtime (`JoinHandle::await`
    /// returns `Err(JoinError)` rather than unwinding this loop) — the Rust
    /// analogue of the Go original's `recover()` catch-all in
    /// `_prepareForProcessingTask`.
    async fn process(self: Arc<Self>, mut item: QueueItem<Task>) {
        item.payload.started = now_ms();

        let task_id = item.id.clone();
        let worker = Arc::clone(&self);
        let task = item.payload.clone();

        let outcome = tokio::spawn(async move { worker.run_pipeline(task).await }).await;

        match outcome {
            Ok(Ok(success)) => self.success_task(item.payload, success).await,
            Ok(Err(e)) => self.failed_task(item.payload, e.to_string()).await,
            Err(join_err) => {
                let message = panic_message(join_err);
                tracing::error!(task_id = %task_id, %message, "transcoder pipeline panicked");
                self.failed_task(item.payload, message).await;
            }
        }
    }

    async fn run_pipeline(&self, mut task: Task) -> Result<PipelineSuccess, RasboraError> {
        let task_id = task.id.clone();

        let (working_path, log_file) = prepare_working_area(&self.config.temporary_working_path, &task)?;
        let output_files = prepare_output_files(&working_path, &mut task);
        let mut ctx = TaskContext {
            working_path,
            log_file,
            input_file: PathBuf::new(),
            output_files,
        };

        ctx.input_file = self.fetch_input(&ctx.working_path, &task).await?;
        let probe_info = probe::probe(&self.config.engine.probe_exe, &ctx.input_file).await?;

        let command = self.render_command(&task, &ctx, &probe_info)?;
        self.execute(&task_id, &command, &probe_info).await?;

        let result = self.promote_outputs(&task, &ctx).await;
        self.cleanup(&ctx).await;
        let (output_refs, log_ref) = result?;

        Ok(PipelineSuccess {
            output_refs,
            log_ref,
        })
    }

    /// §4.3.2 — stage the input locally via the File Mover matching
    /// `task.input.filesystem_kind`.
    async fn fetch_input(&self, working_path: &Path, task: &Task) -> Result<PathBuf, RasboraError> {
        let mover = mover_for(task.input.filesystem_kind, &self.filesystem).await?;

        let ext = Path::new(&task.input.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let input_file_name = format!("{}_input{}", task.id, ext);
        let local_path = working_path.join(&input_file_name);

        let src = FileRef::new(task.input.filesystem_kind, task.input.path.as_str(), task.input.name.as_str());
        let dst = FileRef::new(
            task.input.filesystem_kind,
            working_path.to_string_lossy(),
            input_file_name.as_str(),
        );

        mover.get(&src, &dst).await?;
        Ok(local_path)
    }

    /// §4.3.4 — resolve and render the handler template.
    fn render_command(
        &self,
        task: &Task,
        ctx: &TaskContext,
        probe_info: &ProbeInfo,
    ) -> Result<String, RasboraError> {
        let mut context = tera::Context::new();
        context.insert("ffmpeg", &self.config.engine.exe);
        context.insert("input", &ctx.input_file.to_string_lossy());
        context.insert("args", &task.output.args);
        context.insert("logfile", &ctx.log_file.to_string_lossy());
        context.insert("inputVideoInfo", &probe_info.raw);
        context.insert(
            "progressListener",
            &format!("tcp:{}", self.config.engine.progress_listener),
        );

        handlers::render(
            &self.builtin_templates,
            &self.config.engine.handlers,
            &task.output.handler_ref,
            &context,
        )
    }

    /// §4.3.5 — start the monitor, run the rendered command, stop the monitor.
    async fn execute(
        &self,
        task_id: &TaskId,
        command: &str,
        probe_info: &ProbeInfo,
    ) -> Result<(), RasboraError> {
        let monitor = ProgressMonitor::start(
            &self.config.engine.progress_listener,
            Arc::clone(&self.queue),
            self.config.queue.clone(),
            task_id.clone(),
            probe_info.duration_us,
        )
        .await
        .map_err(|e| RasboraError::Internal(format!("cannot bind progress listener: {e}")))?;

        let output = tokio::process::Command::new(&self.config.engine.shell)
            .arg("-c")
            .arg(command)
            .output()
            .await;

        monitor.stop().await;

        let output = output?;
        if !output.status.success() {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            return Err(RasboraError::Internal(
                String::from_utf8_lossy(&combined).into_owned(),
            ));
        }

        Ok(())
    }

    /// §4.3.6 — promote the log and every output rendition via the
    /// *configured* primary mover (not the input's).
    async fn promote_outputs(
        &self,
        task: &Task,
        ctx: &TaskContext,
    ) -> Result<(Vec<String>, String), RasboraError> {
        let mover = mover_for(self.filesystem.primary, &self.filesystem).await?;

        let log_name = format!("{}.log", task.id);
        let log_src = FileRef::new(
            self.filesystem.primary,
            ctx.working_path.to_string_lossy(),
            log_name.as_str(),
        );
        let log_prefix = destination_prefix(self.filesystem.primary, &self.filesystem, "logs");
        let log_dst = FileRef::new(self.filesystem.primary, log_prefix.clone(), log_name.as_str());
        mover.put(&log_src, &log_dst).await?;
        let log_ref = format!("{log_prefix}/{log_name}");

        let output_prefix = destination_prefix(self.filesystem.primary, &self.filesystem, "outputs");
        let mut output_refs = Vec::with_capacity(ctx.output_files.len());
        for path in &ctx.output_files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| RasboraError::Internal("malformed output file name".into()))?;
            let src = FileRef::new(
                self.filesystem.primary,
                ctx.working_path.to_string_lossy(),
                file_name,
            );
            let dst = FileRef::new(self.filesystem.primary, output_prefix.clone(), file_name);
            mover.put(&src, &dst).await?;
            output_refs.push(format!("{output_prefix}/{file_name}"));
        }

        Ok((output_refs, log_ref))
    }

    /// Best-effort cleanup of everything staged locally for this task,
    /// mirroring `_cleanAndPrepareForNextTask`'s ignored-error removals.
    async fn cleanup(&self, ctx: &TaskContext) {
        let _ = tokio::fs::remove_file(&ctx.input_file).await;
        let _ = tokio::fs::remove_file(&ctx.log_file).await;
        for path in &ctx.output_files {
            let _ = tokio::fs::remove_file(path).await;
        }
        let _ = tokio::fs::remove_dir_all(&ctx.working_path).await;
    }

    /// Best-effort promotion of just the log file, used by `failed_task`
    /// when the pipeline never reached (or failed inside) `promote_outputs`.
    async fn promote_log_best_effort(&self, task: &Task) {
        let mover = match mover_for(self.filesystem.primary, &self.filesystem).await {
            Ok(m) => m,
            Err(_) => return,
        };
        let log_name = format!("{}.log", task.id);
        let src = FileRef::new(
            self.filesystem.primary,
            self.config.temporary_working_path.as_str(),
            log_name.as_str(),
        );
        let log_prefix = destination_prefix(self.filesystem.primary, &self.filesystem, "logs");
        let dst = FileRef::new(self.filesystem.primary, log_prefix, log_name.as_str());
        let _ = mover.put(&src, &dst).await;
    }

    /// §4.3.7 SuccessTask.
    async fn success_task(&self, mut task: Task, success: PipelineSuccess) {
        task.finished = now_ms();

        let item = QueueItem::new(task.id.as_str(), task.priority, task.clone());
        if let Err(e) = self.queue.finished(&self.config.queue, &item).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to mark task finished");
        }

        self.enqueue_callback(&task, false, "video transcended without any problems".into(), success.output_refs, success.log_ref)
            .await;

        tracing::info!(task_id = %task.id, "task finished processing without any problems");
    }

    /// §4.3.7 FailedTask(err).
    async fn failed_task(&self, mut task: Task, message: String) {
        self.promote_log_best_effort(&task).await;

        task.failed = now_ms();

        let retry_count = self.queue.total_retry(&self.config.queue, task.id.as_str()).await;
        let retry_limit = self.config.make_as_failed_after_retry as i64;

        if retry_count >= retry_limit {
            tracing::debug!(task_id = %task.id, retry_count, retry_limit, "retry ceiling reached, failing task");

            self.enqueue_callback(&task, true, message.clone(), Vec::new(), String::new())
                .await;

            let error_json = serde_json::json!({ "msg": message, "debug": backtrace() }).to_string();
            let item = QueueItem::new(task.id.as_str(), task.priority, task.clone());
            if let Err(e) = self.queue.failed(&self.config.queue, &item, &error_json).await {
                tracing::error!(task_id = %task.id, error = %e, "failed to mark task failed");
            }
            return;
        }

        tracing::debug!(task_id = %task.id, retry_count, retry_limit, "re-enqueuing task for retry");
        let id = task.id.clone();
        let item = QueueItem::new(id.as_str(), task.priority, task);
        if let Err(e) = self.queue.enqueue(&self.config.queue, &item).await {
            tracing::error!(error = %e, "failed to re-enqueue task after failure");
        }
    }

    async fn enqueue_callback(
        &self,
        task: &Task,
        error: bool,
        message: String,
        outputs: Vec<String>,
        log_ref: String,
    ) {
        let callback = Callback {
            task_id: task.id.clone(),
            priority: task.priority,
            url: task.callback.url.clone(),
            opaque_data: task.callback.opaque_data.clone(),
            error,
            message,
            outputs,
            log_ref,
            timeline: Timeline {
                created: task.created,
                started: task.started,
                finished: task.finished,
                failed: task.failed,
            },
        };

        let item = QueueItem::new(task.id.as_str(), task.priority, callback);
        if let Err(e) = self.queue.enqueue(&self.callback_queue, &item).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to enqueue callback envelope");
        }
    }
}

/// §4.3.1 — mkdir-p the working path, create a zero-length log file.
fn prepare_working_area(
    temporary_working_path: &str,
    task: &Task,
) -> Result<(PathBuf, PathBuf), RasboraError> {
    let working_path = PathBuf::from(temporary_working_path);
    std::fs::create_dir_all(&working_path)?;

    let log_file = working_path.join(format!("{}.log", task.id));
    std::fs::File::create(&log_file)?;

    Ok((working_path, log_file))
}

/// §4.3.1 — attach a materialized output filename to every rendition.
fn prepare_output_files(working_path: &Path, task: &mut Task) -> Vec<PathBuf> {
    let mut files = Vec::with_capacity(task.output.args.len());

    for rendition in &mut task.output.args {
        let file_name = format!("{}_{}{}", task.id, rendition.quality, task.output.container);
        let path = working_path.join(&file_name);
        rendition.output_file = Some(path.to_string_lossy().into_owned());
        files.push(path);
    }

    files
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn backtrace() -> String {
    if std::env::var("RUST_BACKTRACE").is_ok() {
        std::backtrace::Backtrace::force_capture().to_string()
    } else {
        "set RUST_BACKTRACE=1 to capture a stack trace".to_string()
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    match join_err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "transcoder pipeline panicked".to_string()
            }
        }
        Err(_) => "transcoder pipeline task was cancelled".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasbora_common::config::FileSystemKind;
    use rasbora_common::types::{CallbackSpec, InputVideo, Output, Rendition};

    fn sample_task(id: &str) -> Task {
        Task {
            id: TaskId::new(id),
            label: "demo".into(),
            priority: 1.0,
            input: InputVideo {
                filesystem_kind: FileSystemKind::Local,
                path: "/in".into(),
                name: "source.mp4".into(),
            },
            output: Output {
                handler_ref: "rasbora:h264".into(),
                container: ".mp4".into(),
                args: vec![
                    Rendition {
                        quality: "720p".into(),
                        output_file: None,
                        extra: serde_json::Map::new(),
                    },
                    Rendition {
                        quality: "1080p".into(),
                        output_file: None,
                        extra: serde_json::Map::new(),
                    },
                ],
            },
            callback: CallbackSpec {
                url: "http://cb/ok".into(),
                opaque_data: serde_json::json!({}),
            },
            created: 0,
            started: 0,
            finished: 0,
            failed: 0,
        }
    }

    #[test]
    fn prepare_working_area_creates_dir_and_zero_length_log() {
        let dir = std::env::temp_dir().join(format!("rasbora-test-{}", uuid::Uuid::new_v4()));
        let task = sample_task("t1");

        let (working_path, log_file) =
            prepare_working_area(dir.to_str().unwrap(), &task).unwrap();

        assert!(working_path.is_dir());
        assert_eq!(log_file, working_path.join("t1.log"));
        assert_eq!(std::fs::metadata(&log_file).unwrap().len(), 0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn prepare_output_files_names_by_id_quality_and_container_and_attaches_to_renditions() {
        let working_path = PathBuf::from("/tmp/rasbora-working");
        let mut task = sample_task("t2");

        let files = prepare_output_files(&working_path, &mut task);

        assert_eq!(files, vec![
            working_path.join("t2_720p.mp4"),
            working_path.join("t2_1080p.mp4"),
        ]);
        assert_eq!(
            task.output.args[0].output_file.as_deref(),
            Some(working_path.join("t2_720p.mp4").to_str().unwrap())
        );
        assert_eq!(
            task.output.args[1].output_file.as_deref(),
            Some(working_path.join("t2_1080p.mp4").to_str().unwrap())
        );
    }

    #[test]
    fn panic_message_recovers_string_payload() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let join_err = runtime.block_on(async {
            tokio::spawn(async { panic!("boom") }).await.unwrap_err()
        });
        assert_eq!(panic_message(join_err), "boom");
    }
}
