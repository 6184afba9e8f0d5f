//! Sync state tracking and persistence.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crmsync_common::{Entity, Result, TenantId};
use crmsync_storage::{DestinationStore, SyncStateRow};

use crate::cursor::Cursor;

/// Typed sync state of one (entity, tenant) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub entity: Entity,
    pub tenant_id: TenantId,
    pub cursor: Cursor,
    /// Time of the last successful persist.
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// State for a pair that was never synced.
    pub fn new(entity: Entity, tenant_id: TenantId) -> Self {
        Self {
            entity,
            tenant_id,
            cursor: Cursor::default(),
            last_synced_at: None,
            updated_at: None,
        }
    }

    /// Decode a stored row. A cursor blob that does not parse is replaced by
    /// an empty cursor, which makes the next pass start from the beginning.
    pub fn from_row(row: SyncStateRow) -> Self {
        let cursor = match row.cursor {
            None | Some(serde_json::Value::Null) => Cursor::default(),
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(
                    entity = %row.entity,
                    tenant = %row.tenant_id,
                    "Discarding unreadable sync cursor: {}",
                    e
                );
                Cursor::default()
            }),
        };
        Self {
            entity: row.entity,
            tenant_id: row.tenant_id,
            cursor,
            last_synced_at: row.last_synced_at,
            updated_at: Some(row.updated_at),
        }
    }

    pub fn to_row(&self, now: DateTime<Utc>) -> Result<SyncStateRow> {
        Ok(SyncStateRow {
            entity: self.entity,
            tenant_id: self.tenant_id.clone(),
            cursor: Some(serde_json::to_value(&self.cursor)?),
            last_synced_at: Some(now),
            updated_at: now,
        })
    }
}

/// Loads and saves [`SyncState`] through the destination store.
#[derive(Clone)]
pub struct SyncStateStore {
    store: Arc<dyn DestinationStore>,
}

impl SyncStateStore {
    pub fn new(store: Arc<dyn DestinationStore>) -> Self {
        Self { store }
    }

    /// Load the state of a pair; `None` on its first-ever sync.
    pub async fn load(&self, entity: Entity, tenant: &TenantId) -> Result<Option<SyncState>> {
        let row = self.store.load_sync_state(entity, tenant).await?;
        Ok(row.map(SyncState::from_row))
    }

    /// Persist `state`, stamping `last_synced_at` and `updated_at` with `now`.
    pub async fn save(&self, state: &mut SyncState, now: DateTime<Utc>) -> Result<()> {
        let row = state.to_row(now)?;
        self.store.save_sync_state(&row).await?;
        state.last_synced_at = Some(now);
        state.updated_at = Some(now);
        Ok(())
    }

    /// States of every tenant, or of one.
    pub async fn list(&self, tenant: Option<&TenantId>) -> Result<Vec<SyncState>> {
        let rows = self.store.list_sync_states(tenant).await?;
        Ok(rows.into_iter().map(SyncState::from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{PassState, Position};
    use crmsync_storage::MemoryStore;
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::new("loc_1").unwrap()
    }

    #[tokio::test]
    async fn test_missing_state_is_none() {
        let states = SyncStateStore::new(Arc::new(MemoryStore::new()));
        assert!(states.load(Entity::Contacts, &tenant()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let states = SyncStateStore::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();

        let mut state = SyncState::new(Entity::Opportunities, tenant());
        state.cursor.position = Position {
            start_after: Some(1_700_000_000_000),
            start_after_id: Some("o_5".to_string()),
        };
        state.cursor.pass = PassState::Full { started_at: now };
        states.save(&mut state, now).await.unwrap();
        assert_eq!(state.last_synced_at, Some(now));

        let loaded = states
            .load(Entity::Opportunities, &tenant())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.cursor, state.cursor);
        assert_eq!(loaded.last_synced_at, Some(now));

        let all = states.list(None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_unreadable_cursor_falls_back_to_default() {
        let row = SyncStateRow {
            entity: Entity::Contacts,
            tenant_id: tenant(),
            cursor: Some(json!({ "startAfter": "not a number" })),
            last_synced_at: None,
            updated_at: Utc::now(),
        };
        let state = SyncState::from_row(row);
        assert_eq!(state.cursor, Cursor::default());
    }
}
