use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// Completion notification for a task, enqueued onto the callback queue and
/// eventually POSTed to `url` by the callback worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Callback {
    pub task_id: TaskId,
    pub priority: f64,
    pub url: String,
    #[serde(default)]
    pub opaque_data: serde_json::Value,
    pub error: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub log_ref: String,
    pub timeline: Timeline,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub failed: i64,
}
