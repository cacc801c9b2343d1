//! Publish API client for finished compilations.
//!
//! This crate provides:
//! - The `Publisher` seam the publish stage uploads through
//! - A YouTube Data API client using resumable uploads
//! - OAuth token handling via `gcp_auth` or a static token

pub mod auth;
pub mod client;
pub mod error;
pub mod metadata;

pub use auth::{TokenSource, YOUTUBE_UPLOAD_SCOPE};
pub use client::{Publisher, YouTubeConfig, YouTubePublisher};
pub use error::{PublishError, PublishResult};
pub use metadata::{PublishMetadata, PublishReceipt};
