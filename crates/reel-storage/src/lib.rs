//! Object storage for the pipeline's stage stores.
//!
//! This crate provides:
//! - The `ObjectStore` abstraction (put/get/list/delete/exists, exclusive create)
//! - S3-compatible backend (R2, GCS interoperability, MinIO)
//! - Local filesystem and in-memory backends
//! - Stage store layout (one bucket per pipeline phase)
//! - Lease markers for single-winner decisions across concurrent triggers

pub mod client;
pub mod config;
pub mod error;
pub mod layout;
pub mod lease;
pub mod local;
pub mod memory;
pub mod store;

pub use client::{S3Config, S3Store};
pub use config::{StorageBackend, StorageConfig};
pub use error::{StorageError, StorageOp, StorageResult};
pub use layout::{StageStores, StorageLayout};
pub use lease::{Claim, Lease, LeaseManager, LeaseRecord};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use store::{validate_key, ObjectInfo, ObjectStore};
