//! Bridges: one source fanned out to its targets
//!
//! - [`dispatch`] delivers one post to one target
//! - [`queue`] holds a bridge's pending deliveries and retries failed ones
//! - [`runtime`] supervises the source (polling or streaming) and feeds the
//!   queue

pub mod delay;
pub mod dispatch;
pub mod queue;
pub mod runtime;

pub use delay::cancellable_sleep;
pub use dispatch::Dispatcher;
pub use queue::{DistributionQueue, QueueItem, QueueStats, RetryPolicy};
pub use runtime::{Bridge, BridgeOptions};
