//! Axum HTTP submission API.
//!
//! This crate provides:
//! - `POST /api/submissions`, running Ingest synchronously
//! - Health, readiness and Prometheus metrics endpoints
//! - Per-IP rate limiting and security headers

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
