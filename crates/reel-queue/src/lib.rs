//! Trigger transport for the pipeline.
//!
//! This crate provides:
//! - At-least-once delivery of object-created events via Redis Streams
//! - Pending reclaim for events held by crashed workers
//! - A dead-letter stream for events that keep failing
//! - The `EventSink` seam stages publish through

pub mod error;
pub mod queue;
pub mod sink;

pub use error::{QueueError, QueueResult};
pub use queue::{Enqueued, QueueConfig, TriggerDelivery, TriggerQueue};
pub use sink::{EventSink, NoopSink};
