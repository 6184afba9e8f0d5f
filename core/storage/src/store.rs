//! Destination store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crmsync_common::{Entity, Result, TenantId};

use crate::rows::{DestinationRecord, Integration, LookupEntry, SyncStateRow, Table};

/// Relational destination the sync engine materializes into.
///
/// Every failure is reported as `Error::Store`. Implementations must make
/// each `upsert_*` call atomic: either every row is written or none is.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Backend name (e.g. "memory", "sqlite").
    fn name(&self) -> &str;

    /// Insert or update rows keyed by `(external_id, tenant_id)`.
    ///
    /// # Preconditions
    /// - Every row belongs to `table`
    ///
    /// # Postconditions
    /// - All normalized fields, the raw payload and `synced_at` are overwritten
    /// - Returns the number of rows written
    async fn upsert_records(&self, table: Table, rows: &[DestinationRecord]) -> Result<usize>;

    /// Delete rows of `tenant` in `table` whose `synced_at` is before `synced_before`.
    ///
    /// Returns the number of deleted rows.
    async fn prune_records(
        &self,
        table: Table,
        tenant: &TenantId,
        synced_before: DateTime<Utc>,
    ) -> Result<u64>;

    /// Fetch one row by key.
    async fn get_record(
        &self,
        table: Table,
        tenant: &TenantId,
        external_id: &str,
    ) -> Result<Option<DestinationRecord>>;

    /// Number of rows of `tenant` in `table`.
    async fn count(&self, table: Table, tenant: &TenantId) -> Result<usize>;

    /// Insert or update lookup entries keyed by `(tenant_id, kind, reference_id)`.
    async fn upsert_lookups(&self, entries: &[LookupEntry]) -> Result<usize>;

    /// Delete lookup entries of `tenant` whose `synced_at` is before `synced_before`.
    async fn prune_lookups(&self, tenant: &TenantId, synced_before: DateTime<Utc>) -> Result<u64>;

    /// All lookup entries of `tenant`, ordered by kind then id.
    async fn list_lookups(&self, tenant: &TenantId) -> Result<Vec<LookupEntry>>;

    /// Load the sync state of one (entity, tenant) pair.
    async fn load_sync_state(&self, entity: Entity, tenant: &TenantId)
        -> Result<Option<SyncStateRow>>;

    /// Create or replace the sync state keyed by `(entity, tenant_id)`.
    async fn save_sync_state(&self, row: &SyncStateRow) -> Result<()>;

    /// Sync states of every tenant, or of one.
    async fn list_sync_states(&self, tenant: Option<&TenantId>) -> Result<Vec<SyncStateRow>>;

    /// Active CRM integrations, most recently updated first.
    async fn active_integrations(&self) -> Result<Vec<Integration>>;

    /// Create or replace the integration of a tenant.
    async fn save_integration(&self, integration: &Integration) -> Result<()>;
}

pub(crate) fn check_table(table: Table, rows: &[DestinationRecord]) -> Result<()> {
    match rows.iter().find(|r| r.table() != table) {
        Some(row) => Err(crmsync_common::Error::InvalidInput(format!(
            "Record {} belongs to {}, not {}",
            row.external_id,
            row.table(),
            table
        ))),
        None => Ok(()),
    }
}
