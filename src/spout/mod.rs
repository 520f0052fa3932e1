//! The `spout` module adapts push delivery to the host framework's
//! pull/ack protocol.
//!
//! - `collector`: the outbound `Collector` seam and a channel-backed one.
//! - `tracker`: failure dedup index and retry queue.
//! - `redelivery`: `RedeliverySpout`, which ties a push consumer, the
//!   tracker and a collector together behind the `Spout` contract.

pub mod collector;
pub mod redelivery;
pub mod tracker;

use std::collections::HashMap;
use std::future::Future;

pub use collector::{ChannelCollector, Collector, Emitted, Tuple};
pub use redelivery::RedeliverySpout;
pub use tracker::{FailureOutcome, FailureTracker, TrackedMessage};

use crate::utils::error::SpoutError;

/// Runtime information the host passes to `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoutContext {
    pub task_id: u32,
}

/// Names of the fields of every emitted tuple, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields(Vec<String>);

impl Fields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

/// Contract between a message source and the host framework.
///
/// The host calls `next_tuple` from its own loop and reports every emitted
/// id back through `ack` or `fail`. Only `open` may return an error.
pub trait Spout {
    fn open(&self, context: &SpoutContext) -> Result<(), SpoutError>;

    fn close(&self);

    fn activate(&self);

    fn deactivate(&self);

    /// Emits at most one tuple. Returns whether one was emitted.
    fn next_tuple(&self) -> impl Future<Output = bool> + Send;

    fn ack(&self, msg_id: &str);

    fn fail(&self, msg_id: &str) -> impl Future<Output = ()> + Send;

    fn declare_output_fields(&self) -> Fields;

    fn component_config(&self) -> Option<HashMap<String, serde_json::Value>>;
}

#[cfg(test)]
mod tests;
