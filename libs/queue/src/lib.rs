//! Serializing task queue for cooperative async code.
//!
//! An [`AsyncQueue`] runs the operations submitted to it one at a time, in
//! arrival order. Each running operation receives a fresh child queue, and
//! everything enqueued into that child is drained before the operation's
//! result settles.
pub mod error;
mod metrics;
pub mod queue;
pub mod store;
pub mod testonly;

pub use error::OperationError;
pub use queue::{AsyncQueue, Config, Phase, Settled};
