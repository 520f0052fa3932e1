//! Retry statistics attached to every emitted message.
//!
//! A fresh `MessageStat` is created for each first delivery. Once a message
//! fails, the same stat follows it through every redelivery: the failure
//! count only ever grows and `elapsed_ms` is restamped each time the message
//! is pulled off the retry queue.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct MessageStat {
    failure_times: AtomicI32,
    created_at: i64,
    elapsed_ms: AtomicI64,
}

/// Point-in-time copy of a `MessageStat`, used for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub failure_times: i32,
    pub created_at: i64,
    pub elapsed_ms: i64,
}

impl MessageStat {
    pub fn new() -> Self {
        Self {
            failure_times: AtomicI32::new(0),
            created_at: chrono::Utc::now().timestamp_millis(),
            elapsed_ms: AtomicI64::new(0),
        }
    }

    pub fn failure_times(&self) -> i32 {
        self.failure_times.load(Ordering::Acquire)
    }

    /// Increments the failure count and returns the new value.
    pub fn record_failure(&self) -> i32 {
        self.failure_times.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Stamps the time since this stat was created.
    pub fn mark_elapsed(&self) {
        let elapsed = chrono::Utc::now().timestamp_millis() - self.created_at;
        self.elapsed_ms.store(elapsed.max(0), Ordering::Release);
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed_ms.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            failure_times: self.failure_times(),
            created_at: self.created_at,
            elapsed_ms: self.elapsed_ms(),
        }
    }
}

impl Default for MessageStat {
    fn default() -> Self {
        Self::new()
    }
}
