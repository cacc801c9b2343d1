//! Pipeline stages.
//!
//! Each stage is triggered by an object appearing in its input store and
//! only deletes its input after the next artifact is uploaded.

pub mod concatenate;
pub mod gate;
pub mod ingest;
pub mod normalize;
pub mod publish;

pub use concatenate::concatenate;
pub use gate::{evaluate_gate, ClaimedBatch, GateOutcome};
pub use ingest::{ingest, IngestOutcome};
pub use normalize::{normalize, NormalizeOutcome};
pub use publish::{marker_key, publish, PublishMarker, PublishOutcome};
