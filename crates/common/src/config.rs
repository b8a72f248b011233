use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from `config/system.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    pub components: ComponentsConfig,
    pub filesystem: FilesystemConfig,
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

/// Which roles this node runs, plus per-role settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentsConfig {
    /// Role names to start: any of "task_intake", "video_transcoding",
    /// "callback_manager", "system_radar".
    pub active: Vec<String>,
    #[serde(default)]
    pub task_intake: TaskIntakeConfig,
    pub video_transcoding: VideoTranscodingConfig,
    pub callback_manager: CallbackManagerConfig,
    #[serde(default)]
    pub system_radar: SystemRadarConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskIntakeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for TaskIntakeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// The video-transcoding worker role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoTranscodingConfig {
    /// Stable identity used for crash-recovery ownership tracking.
    pub unique_id: String,
    /// Queue name feeding this worker.
    pub queue: String,
    /// Poll interval, in seconds, between empty dequeues.
    pub check_new_task_interval: u64,
    /// Retry ceiling: attempts at or above this count become terminal.
    pub make_as_failed_after_retry: u32,
    /// Directory used to stage inputs/outputs/logs during processing.
    pub temporary_working_path: String,
    pub engine: EngineConfig,
}

/// The external transcoding engine and its progress wiring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the transcoding engine executable (e.g. `ffmpeg`).
    pub exe: String,
    /// Path to the probing executable (e.g. `ffprobe`).
    pub probe_exe: String,
    /// Shell used to run the rendered command line (`sh -c <cmd>`).
    #[serde(default = "default_shell")]
    pub shell: String,
    /// `host:port` the progress monitor binds before the engine starts.
    pub progress_listener: String,
    /// Allow-list of handler references this worker may render.
    pub handlers: Vec<String>,
}

fn default_shell() -> String {
    "sh".to_string()
}

/// The callback-delivery worker role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackManagerConfig {
    pub unique_id: String,
    pub queue: String,
    pub check_new_task_interval: u64,
    pub make_as_failed_after_retry: u32,
    pub http: CallbackHttpConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackHttpConfig {
    /// Per-send HTTP client timeout, in seconds.
    pub sending_timeout: u64,
}

/// The node telemetry scanner role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemRadarConfig {
    #[serde(default = "default_radar_unique_id")]
    pub unique_id: String,
    #[serde(default = "default_radar_scan_interval")]
    pub scan_interval: u64,
    #[serde(default = "default_radar_stream")]
    pub stream: String,
}

impl Default for SystemRadarConfig {
    fn default() -> Self {
        Self {
            unique_id: default_radar_unique_id(),
            scan_interval: default_radar_scan_interval(),
            stream: default_radar_stream(),
        }
    }
}

fn default_radar_unique_id() -> String {
    "radar-1".to_string()
}

fn default_radar_scan_interval() -> u64 {
    30
}

fn default_radar_stream() -> String {
    "cluster/radar".to_string()
}

/// Which file-movement backend handles a given task input/output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystemKind {
    Local,
    Object,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// The mover used to promote outputs/logs (distinct from a task's own input mover).
    pub primary: FileSystemKind,
    #[serde(default)]
    pub local: LocalFilesystemConfig,
    #[serde(default)]
    pub object: ObjectFilesystemConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocalFilesystemConfig {
    /// Base directory outputs and logs are promoted into.
    #[serde(default)]
    pub base_path: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectFilesystemConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub use_ssl: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Seconds between heartbeat publishes.
    pub send_interval: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerOutputType {
    Stdout,
    File,
    Store,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggerOutputConfig {
    #[serde(rename = "type")]
    pub kind: LoggerOutputType,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_output")]
    pub output: Vec<LoggerOutputConfig>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> Vec<LoggerOutputConfig> {
    vec![LoggerOutputConfig {
        kind: LoggerOutputType::Stdout,
        path: None,
    }]
}
