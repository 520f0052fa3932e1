//! # spoutbridge
//!
//! `spoutbridge` feeds messages from a push-style broker consumer into a
//! host stream-processing framework that works in pull/ack terms: the host
//! asks for the next tuple, and later acks or fails every tuple by id.
//! Failed messages are fetched back from the broker, deduplicated per id and
//! replayed until acked or until they have failed too many times.
//!
//! ## Core Modules
//!
//! - `config`: loads and merges settings from files and environment.
//! - `consumer`: broker client seams, the consumer factory and an in-process broker.
//! - `message`: message records and per-message retry statistics.
//! - `spout`: the redelivery spout, its failure tracker and the collector seam.
//! - `utils`: error types and logging setup.

pub mod config;
pub mod consumer;
pub mod message;
pub mod spout;
pub mod utils;
