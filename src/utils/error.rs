//! The `error` module defines the error types used within `spoutbridge`.
//!
//! Errors are split by the collaborator that produces them: the broker
//! client, the host collector, and the spout itself. Only construction-time
//! failures (`SpoutError`) are ever returned to the host framework; the
//! runtime paths (`ack`, `fail`, `next_tuple`) absorb and log the others.

/// Faults raised by a broker client implementation.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("invalid client state: {0}")]
    InvalidState(String),
}

/// Faults raised by the host framework when a tuple cannot be emitted.
#[derive(thiserror::Error, Debug)]
pub enum EmitError {
    #[error("collector is closed")]
    Closed,
    #[error("tuple rejected: {0}")]
    Rejected(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SpoutError {
    #[error("failed to initialize consumer: {0}")]
    ClientInit(#[source] ClientError),
    #[error("listener declares no consume capability")]
    NoListenerCapability,
    #[error("spout is already open")]
    AlreadyOpen,
}
