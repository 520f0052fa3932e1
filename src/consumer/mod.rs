//! The `consumer` module wires a broker consumer for the spout.
//!
//! The broker client itself is an external collaborator described by the
//! `BrokerClient` and `Connector` traits. `factory` turns settings plus a
//! listener into a ready-to-start push or pull consumer, and `memory`
//! provides an in-process broker client used by the CLI demo and tests.

pub mod client;
pub mod factory;
pub mod handle;
pub mod listener;
pub mod memory;
pub mod options;

pub use client::{BrokerClient, Connector};
pub use factory::{build_consumer, build_pull_consumer, build_push_consumer};
pub use handle::{Consumer, PullConsumer, PushConsumer};
pub use listener::{
    Capability, ConsumeContext, ConsumeStatus, MessageListener, RegisteredListener,
};
pub use memory::MemoryBroker;
pub use options::{ConsumeFromWhere, ConsumerMode, ConsumerOptions, Subscription};
