//! The durable queue of messages awaiting another delivery attempt.
//!
//! Queued message bodies live next to the configuration file as
//! `<hash>.eml`, and `inflight.json` records which of them are pending and
//! for which recipients.

mod error;
pub mod queue;

pub use error::SpoolError;
pub use queue::{MessageQueue, QUEUE_FILE, QueueEntry};
