//! Common utilities and types shared across the crmsync crates.
//!
//! This module provides the error taxonomy, the identifiers every other
//! crate keys its data by, and small helpers for env-based configuration.

pub mod env;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Entity, SecretString, TenantId};
