//! The `utils` module provides the pieces shared across the `spoutbridge`
//! crate: the error types every layer returns and the logging bootstrap used
//! by the binary and by tests.

pub mod error;
pub mod logging;
