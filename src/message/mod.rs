//! The `message` module holds the data carried by every emitted tuple: the
//! broker message itself and the per-message retry statistics.

pub mod record;
pub mod stat;

pub use record::MessageRecord;
pub use stat::{MessageStat, StatSnapshot};
