//! Broker message as seen by the spout.
//!
//! Notes on fields:
//! - `msg_id`: broker-assigned unique id, also the tuple correlation id
//! - `tags`: optional tag used by subscription filters
//! - `born_timestamp`: milliseconds since UNIX epoch, set by the producer side
//! - `reconsume_times`: how often the broker itself redelivered this message

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub msg_id: String,
    pub topic: String,
    pub tags: Option<String>,
    pub keys: Option<String>,
    pub body: Vec<u8>,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub born_timestamp: i64,
    pub reconsume_times: i32,
}

impl MessageRecord {
    pub fn new(msg_id: impl Into<String>, topic: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            msg_id: msg_id.into(),
            topic: topic.into(),
            tags: None,
            keys: None,
            body,
            queue_id: 0,
            queue_offset: 0,
            born_timestamp: chrono::Utc::now().timestamp_millis(),
            reconsume_times: 0,
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_keys(mut self, keys: impl Into<String>) -> Self {
        self.keys = Some(keys.into());
        self
    }

    /// Body as UTF-8, replacing invalid sequences.
    pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
