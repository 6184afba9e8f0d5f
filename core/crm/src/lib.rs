//! Client for the external CRM API.
//!
//! This crate provides:
//! - The `CrmApi` trait the sync engine consumes
//! - A reqwest-backed implementation with per-attempt timeouts
//! - One retry policy (exponential backoff, jitter, `Retry-After`) shared by every call
//! - Lenient wire models for the paginated list endpoints

pub mod api;
pub mod client;
pub mod models;
pub mod retry;

pub use api::CrmApi;
pub use client::{CrmClient, CrmClientConfig};
pub use models::{Page, PageCursor, PageQuery, TimeWindow};
pub use retry::{RetryConfig, RetryExecutor};
