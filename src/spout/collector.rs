//! Outbound side towards the host framework.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::message::{MessageRecord, MessageStat};
use crate::utils::error::EmitError;

/// One unit of work: the message and its retry statistics.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub message: Arc<MessageRecord>,
    pub stat: Arc<MessageStat>,
}

impl Tuple {
    pub fn new(message: Arc<MessageRecord>, stat: Arc<MessageStat>) -> Self {
        Self { message, stat }
    }
}

/// Host framework sink. `emit` must not block the caller, it runs on the
/// broker's delivery threads.
pub trait Collector: Send + Sync {
    fn emit(&self, tuple: Tuple, msg_id: &str) -> Result<(), EmitError>;
}

/// A tuple handed to the host, with the id it will later ack or fail.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub msg_id: String,
    pub tuple: Tuple,
}

/// Collector backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCollector {
    sender: UnboundedSender<Emitted>,
}

impl ChannelCollector {
    pub fn new() -> (Self, UnboundedReceiver<Emitted>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Collector for ChannelCollector {
    fn emit(&self, tuple: Tuple, msg_id: &str) -> Result<(), EmitError> {
        self.sender
            .send(Emitted {
                msg_id: msg_id.to_string(),
                tuple,
            })
            .map_err(|_| EmitError::Closed)
    }
}
