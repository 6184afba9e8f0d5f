//! In-memory destination store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crmsync_common::{Entity, Error, Result, TenantId};

use crate::rows::{DestinationRecord, Integration, LookupEntry, LookupKind, SyncStateRow, Table};
use crate::store::{check_table, DestinationStore};

type RecordKey = (Table, TenantId, String);
type LookupKey = (TenantId, LookupKind, String);

#[derive(Default)]
struct Tables {
    records: HashMap<RecordKey, DestinationRecord>,
    lookups: BTreeMap<LookupKey, LookupEntry>,
    states: HashMap<(Entity, TenantId), SyncStateRow>,
    integrations: HashMap<TenantId, Integration>,
}

/// In-memory destination store.
///
/// Useful for testing and development. All data is lost on drop. Writes
/// can be made to fail on demand to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing_tables: RwLock<HashSet<Table>>,
    fail_state_writes: RwLock<bool>,
    state_writes: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upsert into `table` fail.
    pub fn fail_writes_to(&self, table: Table) {
        if let Ok(mut failing) = self.failing_tables.write() {
            failing.insert(table);
        }
    }

    /// Make every subsequent sync-state save fail.
    pub fn fail_state_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_state_writes.write() {
            *flag = fail;
        }
    }

    /// Undo all injected failures.
    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing_tables.write() {
            failing.clear();
        }
        self.fail_state_writes(false);
    }

    /// Number of successful sync-state saves so far.
    pub fn state_writes(&self) -> usize {
        self.state_writes.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| Error::Store("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| Error::Store("Memory store lock poisoned".to_string()))
    }

    fn check_failure(&self, table: Table) -> Result<()> {
        let failing = self
            .failing_tables
            .read()
            .map(|f| f.contains(&table))
            .unwrap_or(false);
        if failing {
            return Err(Error::Store(format!("Injected write failure on {}", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_records(&self, table: Table, rows: &[DestinationRecord]) -> Result<usize> {
        check_table(table, rows)?;
        self.check_failure(table)?;

        let mut tables = self.write()?;
        for row in rows {
            let key = (table, row.tenant_id.clone(), row.external_id.clone());
            tables.records.insert(key, row.clone());
        }
        Ok(rows.len())
    }

    async fn prune_records(
        &self,
        table: Table,
        tenant: &TenantId,
        synced_before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tables = self.write()?;
        let before = tables.records.len();
        tables.records.retain(|(t, tenant_id, _), row| {
            !(*t == table && tenant_id == tenant && row.synced_at < synced_before)
        });
        Ok((before - tables.records.len()) as u64)
    }

    async fn get_record(
        &self,
        table: Table,
        tenant: &TenantId,
        external_id: &str,
    ) -> Result<Option<DestinationRecord>> {
        let tables = self.read()?;
        Ok(tables
            .records
            .get(&(table, tenant.clone(), external_id.to_string()))
            .cloned())
    }

    async fn count(&self, table: Table, tenant: &TenantId) -> Result<usize> {
        let tables = self.read()?;
        Ok(tables
            .records
            .keys()
            .filter(|(t, tenant_id, _)| *t == table && tenant_id == tenant)
            .count())
    }

    async fn upsert_lookups(&self, entries: &[LookupEntry]) -> Result<usize> {
        let mut tables = self.write()?;
        for entry in entries {
            let key = (
                entry.tenant_id.clone(),
                entry.kind,
                entry.reference_id.clone(),
            );
            tables.lookups.insert(key, entry.clone());
        }
        Ok(entries.len())
    }

    async fn prune_lookups(&self, tenant: &TenantId, synced_before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.write()?;
        let before = tables.lookups.len();
        tables
            .lookups
            .retain(|(tenant_id, _, _), entry| !(tenant_id == tenant && entry.synced_at < synced_before));
        Ok((before - tables.lookups.len()) as u64)
    }

    async fn list_lookups(&self, tenant: &TenantId) -> Result<Vec<LookupEntry>> {
        let tables = self.read()?;
        Ok(tables
            .lookups
            .values()
            .filter(|e| &e.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn load_sync_state(
        &self,
        entity: Entity,
        tenant: &TenantId,
    ) -> Result<Option<SyncStateRow>> {
        let tables = self.read()?;
        Ok(tables.states.get(&(entity, tenant.clone())).cloned())
    }

    async fn save_sync_state(&self, row: &SyncStateRow) -> Result<()> {
        let failing = self.fail_state_writes.read().map(|f| *f).unwrap_or(false);
        if failing {
            return Err(Error::Store("Injected sync state write failure".to_string()));
        }

        let mut tables = self.write()?;
        tables
            .states
            .insert((row.entity, row.tenant_id.clone()), row.clone());
        self.state_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_sync_states(&self, tenant: Option<&TenantId>) -> Result<Vec<SyncStateRow>> {
        let tables = self.read()?;
        let mut rows: Vec<SyncStateRow> = tables
            .states
            .values()
            .filter(|r| tenant.map_or(true, |t| &r.tenant_id == t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.tenant_id, a.entity).cmp(&(&b.tenant_id, b.entity)));
        Ok(rows)
    }

    async fn active_integrations(&self) -> Result<Vec<Integration>> {
        let tables = self.read()?;
        let mut active: Vec<Integration> = tables
            .integrations
            .values()
            .filter(|i| i.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(active)
    }

    async fn save_integration(&self, integration: &Integration) -> Result<()> {
        let mut tables = self.write()?;
        tables
            .integrations
            .insert(integration.tenant_id.clone(), integration.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{ContactFields, RecordFields};
    use chrono::{Duration, TimeZone};
    use crmsync_common::SecretString;

    fn tenant() -> TenantId {
        TenantId::new("loc_1").unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn contact(id: &str, synced_at: DateTime<Utc>) -> DestinationRecord {
        DestinationRecord {
            external_id: id.to_string(),
            tenant_id: tenant(),
            fields: RecordFields::Contact(ContactFields {
                email: Some(format!("{}@example.com", id)),
                ..Default::default()
            }),
            created_at: None,
            updated_at: None,
            raw: serde_json::json!({ "id": id }),
            synced_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let rows = vec![contact("a", at(0)), contact("b", at(0))];

        store.upsert_records(Table::Contacts, &rows).await.unwrap();
        store.upsert_records(Table::Contacts, &rows).await.unwrap();

        assert_eq!(store.count(Table::Contacts, &tenant()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_table() {
        let store = MemoryStore::new();
        let result = store
            .upsert_records(Table::Opportunities, &[contact("a", at(0))])
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_prune_only_older_rows_of_tenant() {
        let store = MemoryStore::new();
        let other = TenantId::new("loc_2").unwrap();
        let mut foreign = contact("x", at(0));
        foreign.tenant_id = other.clone();

        store
            .upsert_records(
                Table::Contacts,
                &[contact("old", at(0)), contact("new", at(10)), foreign],
            )
            .await
            .unwrap();

        let deleted = store
            .prune_records(Table::Contacts, &tenant(), at(10))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store
            .get_record(Table::Contacts, &tenant(), "new")
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.count(Table::Contacts, &other).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.fail_writes_to(Table::Contacts);
        assert!(store
            .upsert_records(Table::Contacts, &[contact("a", at(0))])
            .await
            .unwrap_err()
            .is_store());

        store.clear_failures();
        store
            .upsert_records(Table::Contacts, &[contact("a", at(0))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_active_integrations_newest_first() {
        let store = MemoryStore::new();
        for (id, age, active) in [("loc_a", 5, true), ("loc_b", 1, true), ("loc_c", 0, false)] {
            store
                .save_integration(&Integration {
                    tenant_id: TenantId::new(id).unwrap(),
                    api_token: SecretString::new("token"),
                    active,
                    updated_at: at(0) - Duration::hours(age),
                })
                .await
                .unwrap();
        }

        let active = store.active_integrations().await.unwrap();
        let ids: Vec<&str> = active.iter().map(|i| i.tenant_id.as_str()).collect();
        assert_eq!(ids, vec!["loc_b", "loc_a"]);
    }
}
