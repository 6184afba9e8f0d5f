//! Upsert and prune against the destination store.

use std::sync::Arc;
use tracing::{debug, info};

use crmsync_common::{Result, TenantId};
use crmsync_storage::{DestinationRecord, DestinationStore, LookupEntry, Table};

use crate::cursor::CompletedFullPass;

/// Writes mapped rows in bounded chunks and prunes after completed full passes.
#[derive(Clone)]
pub struct RecordWriter {
    store: Arc<dyn DestinationStore>,
    chunk_size: usize,
    prune_enabled: bool,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn DestinationStore>, chunk_size: usize, prune_enabled: bool) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            prune_enabled,
        }
    }

    /// Upsert one page of rows. The first failing chunk aborts the page.
    pub async fn upsert_page(&self, table: Table, rows: &[DestinationRecord]) -> Result<usize> {
        let mut written = 0;
        for chunk in rows.chunks(self.chunk_size) {
            written += self.store.upsert_records(table, chunk).await?;
        }
        debug!(table = %table, rows = written, "Upserted page");
        Ok(written)
    }

    /// Delete rows of `tenant` not refreshed by the completed pass.
    pub async fn prune(
        &self,
        table: Table,
        tenant: &TenantId,
        pass: &CompletedFullPass,
    ) -> Result<u64> {
        if !self.prune_enabled {
            debug!(table = %table, "Pruning disabled");
            return Ok(0);
        }
        let deleted = self
            .store
            .prune_records(table, tenant, pass.started_at())
            .await?;
        info!(table = %table, tenant = %tenant, deleted, "Pruned rows missing from full sync");
        Ok(deleted)
    }

    pub async fn upsert_lookups(&self, entries: &[LookupEntry]) -> Result<usize> {
        let mut written = 0;
        for chunk in entries.chunks(self.chunk_size) {
            written += self.store.upsert_lookups(chunk).await?;
        }
        Ok(written)
    }

    /// Delete lookup entries of `tenant` not refreshed by the completed pass.
    pub async fn prune_lookups(&self, tenant: &TenantId, pass: &CompletedFullPass) -> Result<u64> {
        if !self.prune_enabled {
            return Ok(0);
        }
        let deleted = self.store.prune_lookups(tenant, pass.started_at()).await?;
        info!(tenant = %tenant, deleted, "Pruned stale lookup entries");
        Ok(deleted)
    }
}
