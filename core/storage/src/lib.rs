//! Destination store abstraction for crmsync.
//!
//! This crate provides the trait the sync engine writes through, the row
//! types it writes, and two backends (in-memory and SQLite) resolved by
//! name through a registry.
//!
//! # Design Principles
//! - Upserts are idempotent and keyed by `(external_id, tenant_id)`
//! - One upsert call is one transaction
//! - Deletes only through explicit staleness cutoffs

pub mod memory;
pub mod registry;
pub mod rows;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use registry::{create_default_registry, StoreConfig, StoreFactory, StoreRegistry};
pub use rows::{
    AppointmentFields, ContactFields, DestinationRecord, Integration, LookupEntry, LookupKind,
    OpportunityFields, RecordFields, SyncStateRow, Table,
};
pub use sqlite::SqliteStore;
pub use store::DestinationStore;
