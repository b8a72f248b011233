use serde::{Deserialize, Serialize};

use crate::config::FileSystemKind;
use crate::ids::TaskId;

/// A transcoding job submitted through the task intake server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id", default)]
    pub id: TaskId,
    pub label: String,
    /// Lower is more urgent.
    pub priority: f64,
    pub input: InputVideo,
    pub output: Output,
    pub callback: CallbackSpec,
    /// Epoch milliseconds; zero when not yet reached.
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub failed: i64,
}

/// Where the source video lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputVideo {
    pub filesystem_kind: FileSystemKind,
    pub path: String,
    pub name: String,
}

/// The rendition set to produce and where to publish them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Output {
    pub handler_ref: String,
    pub container: String,
    pub args: Vec<Rendition>,
}

/// One output variant (e.g. 720p), plus whatever extra knobs the handler
/// template needs (bitrate, codec, ...). `output_file` is attached by the
/// prepare stage once a temporary filename has been materialized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rendition {
    pub quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackSpec {
    pub url: String,
    #[serde(default)]
    pub opaque_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_json_round_trip() {
        let task = Task {
            id: TaskId::new("t1"),
            label: "demo".into(),
            priority: 1.0,
            input: InputVideo {
                filesystem_kind: FileSystemKind::Local,
                path: "/in".into(),
                name: "a.mp4".into(),
            },
            output: Output {
                handler_ref: "rasbora:h264-720p".into(),
                container: ".mp4".into(),
                args: vec![Rendition {
                    quality: "720p".into(),
                    output_file: None,
                    extra: serde_json::Map::new(),
                }],
            },
            callback: CallbackSpec {
                url: "http://cb/ok".into(),
                opaque_data: serde_json::json!({}),
            },
            created: 0,
            started: 0,
            finished: 0,
            failed: 0,
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.output.args[0].quality, "720p");
    }
}
