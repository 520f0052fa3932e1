use std::fmt;
use std::sync::Arc;

use crate::message::MessageRecord;

/// Delivery style a listener supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Several batches in flight at once, in any order.
    Concurrently,
    /// One batch in flight per queue, in queue order.
    Orderly,
    Unsupported,
}

/// Verdict returned to the broker client for a delivered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeStatus {
    ConsumeSuccess,
    /// The broker keeps the batch and redelivers it under its own policy.
    ReconsumeLater,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeContext {
    pub queue_id: i32,
    /// 1 for the first broker delivery of the batch.
    pub delivery_attempt: u32,
}

pub trait MessageListener: Send + Sync {
    fn capability(&self) -> Capability;

    fn consume_message(&self, msgs: &[MessageRecord], context: &ConsumeContext) -> ConsumeStatus;
}

/// A listener whose capability has been resolved once at registration.
#[derive(Clone)]
pub enum RegisteredListener {
    Concurrently(Arc<dyn MessageListener>),
    Orderly(Arc<dyn MessageListener>),
}

impl RegisteredListener {
    /// Returns `None` when the listener supports neither delivery style.
    pub fn resolve(listener: Arc<dyn MessageListener>) -> Option<Self> {
        match listener.capability() {
            Capability::Concurrently => Some(Self::Concurrently(listener)),
            Capability::Orderly => Some(Self::Orderly(listener)),
            Capability::Unsupported => None,
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Concurrently(_) => Capability::Concurrently,
            Self::Orderly(_) => Capability::Orderly,
        }
    }

    pub fn consume(&self, msgs: &[MessageRecord], context: &ConsumeContext) -> ConsumeStatus {
        match self {
            Self::Concurrently(listener) | Self::Orderly(listener) => {
                listener.consume_message(msgs, context)
            }
        }
    }
}

impl fmt::Debug for RegisteredListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RegisteredListener")
            .field(&self.capability())
            .finish()
    }
}
