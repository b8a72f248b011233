use serde::{Deserialize, Serialize};

/// The envelope stored in `items(Q)`: an id, its priority score, and the
/// payload (a [`crate::types::Task`] on the transcoder queue, a
/// [`crate::types::Callback`] on the callback queue).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueItem<T> {
    pub id: String,
    pub priority: f64,
    pub payload: T,
}

impl<T> QueueItem<T> {
    pub fn new(id: impl Into<String>, priority: f64, payload: T) -> Self {
        Self {
            id: id.into(),
            priority,
            payload,
        }
    }
}
