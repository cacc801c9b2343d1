//! Shared data models for the reel pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Stage stores and the items they hold
//! - Batches claimed for concatenation and the compilations they produce
//! - Submissions handed to ingest
//! - Object-created trigger events

pub mod batch;
pub mod event;
pub mod item;
pub mod stage;
pub mod submission;

// Re-export common types
pub use batch::{compilation_name, Batch, Compilation, COMPILATION_PREFIX};
pub use event::ObjectCreated;
pub use item::{ItemKey, ItemKeyError, VideoItem, MAX_KEY_LENGTH};
pub use stage::StageName;
pub use submission::Submission;
