use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// One structured progress update, appended to `processing(Q):<task_id>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub fps: String,
    pub speed: String,
    pub frame: String,
    pub bitrate: String,
    /// Renamed from the engine's `out_time_ms` key.
    pub time: String,
    /// `100 * time / duration`, formatted to two decimal places.
    pub percentage: String,
}
