//! SQLite-backed destination store.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with microsecond
//! precision in UTC, so string comparison in SQL is chronological.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crmsync_common::{Entity, Error, Result, SecretString, TenantId};

use crate::rows::{
    AppointmentFields, ContactFields, DestinationRecord, Integration, LookupEntry, LookupKind,
    OpportunityFields, RecordFields, SyncStateRow, Table,
};
use crate::store::{check_table, DestinationStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    first_name TEXT,
    last_name TEXT,
    email TEXT,
    phone TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT,
    updated_at TEXT,
    raw_data TEXT NOT NULL,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (id, location_id)
);

CREATE TABLE IF NOT EXISTS opportunities (
    id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    name TEXT,
    status TEXT,
    pipeline_id TEXT,
    pipeline_stage_id TEXT,
    monetary_value REAL,
    assigned_to TEXT,
    contact_id TEXT,
    lost_reason_id TEXT,
    created_at TEXT,
    updated_at TEXT,
    raw_data TEXT NOT NULL,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (id, location_id)
);

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    calendar_id TEXT NOT NULL,
    contact_id TEXT,
    appointment_status TEXT,
    assigned_user_id TEXT,
    title TEXT,
    start_time TEXT,
    end_time TEXT,
    created_at TEXT,
    updated_at TEXT,
    raw_data TEXT NOT NULL,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (id, location_id)
);

CREATE TABLE IF NOT EXISTS lookup_entries (
    location_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    reference_id TEXT NOT NULL,
    name TEXT NOT NULL,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (location_id, kind, reference_id)
);

CREATE TABLE IF NOT EXISTS sync_state (
    entity TEXT NOT NULL,
    location_id TEXT NOT NULL,
    cursor TEXT,
    last_synced_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (entity, location_id)
);

CREATE TABLE IF NOT EXISTS integrations (
    location_id TEXT PRIMARY KEY,
    api_token TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contacts_synced ON contacts(location_id, synced_at);
CREATE INDEX IF NOT EXISTS idx_opportunities_synced ON opportunities(location_id, synced_at);
CREATE INDEX IF NOT EXISTS idx_appointments_synced ON appointments(location_id, synced_at);
"#;

const UPSERT_CONTACT: &str = r#"
INSERT INTO contacts
    (id, location_id, first_name, last_name, email, phone, tags,
     created_at, updated_at, raw_data, synced_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(id, location_id) DO UPDATE SET
    first_name = excluded.first_name,
    last_name = excluded.last_name,
    email = excluded.email,
    phone = excluded.phone,
    tags = excluded.tags,
    created_at = excluded.created_at,
    updated_at = excluded.updated_at,
    raw_data = excluded.raw_data,
    synced_at = excluded.synced_at
"#;

const UPSERT_OPPORTUNITY: &str = r#"
INSERT INTO opportunities
    (id, location_id, name, status, pipeline_id, pipeline_stage_id, monetary_value,
     assigned_to, contact_id, lost_reason_id, created_at, updated_at, raw_data, synced_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
ON CONFLICT(id, location_id) DO UPDATE SET
    name = excluded.name,
    status = excluded.status,
    pipeline_id = excluded.pipeline_id,
    pipeline_stage_id = excluded.pipeline_stage_id,
    monetary_value = excluded.monetary_value,
    assigned_to = excluded.assigned_to,
    contact_id = excluded.contact_id,
    lost_reason_id = excluded.lost_reason_id,
    created_at = excluded.created_at,
    updated_at = excluded.updated_at,
    raw_data = excluded.raw_data,
    synced_at = excluded.synced_at
"#;

const UPSERT_APPOINTMENT: &str = r#"
INSERT INTO appointments
    (id, location_id, calendar_id, contact_id, appointment_status, assigned_user_id, title,
     start_time, end_time, created_at, updated_at, raw_data, synced_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(id, location_id) DO UPDATE SET
    calendar_id = excluded.calendar_id,
    contact_id = excluded.contact_id,
    appointment_status = excluded.appointment_status,
    assigned_user_id = excluded.assigned_user_id,
    title = excluded.title,
    start_time = excluded.start_time,
    end_time = excluded.end_time,
    created_at = excluded.created_at,
    updated_at = excluded.updated_at,
    raw_data = excluded.raw_data,
    synced_at = excluded.synced_at
"#;

/// Destination store backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a database and apply the schema.
    ///
    /// # Errors
    /// - Database creation or schema failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;

        info!(path = %db_path.display(), "SQLite store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Default database location under the user's data directory.
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::data_dir().map(|d| d.join("crmsync").join("crmsync.db"))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Store("SQLite connection lock poisoned".to_string()))?;
            f(&mut guard).map_err(store_err)
        })
        .await
        .map_err(|e| Error::Store(format!("SQLite task failed: {}", e)))?
    }
}

fn store_err(err: rusqlite::Error) -> Error {
    Error::Store(format!("SQLite: {}", err))
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(ts)
}

fn parse_ts(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(idx, row.get(idx)?)
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|v| parse_ts(idx, v))
        .transpose()
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_tenant(row: &Row<'_>, idx: usize) -> rusqlite::Result<TenantId> {
    let id: String = row.get(idx)?;
    TenantId::new(id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn write_record(conn: &Connection, row: &DestinationRecord) -> rusqlite::Result<usize> {
    let raw = row.raw.to_string();
    let tenant = row.tenant_id.as_str();
    match &row.fields {
        RecordFields::Contact(c) => {
            let tags = serde_json::to_string(&c.tags).unwrap_or_else(|_| "[]".to_string());
            conn.prepare_cached(UPSERT_CONTACT)?.execute(params![
                row.external_id,
                tenant,
                c.first_name,
                c.last_name,
                c.email,
                c.phone,
                tags,
                opt_ts(&row.created_at),
                opt_ts(&row.updated_at),
                raw,
                ts(&row.synced_at),
            ])
        }
        RecordFields::Opportunity(o) => conn.prepare_cached(UPSERT_OPPORTUNITY)?.execute(params![
            row.external_id,
            tenant,
            o.name,
            o.status,
            o.pipeline_id,
            o.pipeline_stage_id,
            o.monetary_value,
            o.assigned_to,
            o.contact_id,
            o.lost_reason_id,
            opt_ts(&row.created_at),
            opt_ts(&row.updated_at),
            raw,
            ts(&row.synced_at),
        ]),
        RecordFields::Appointment(a) => conn.prepare_cached(UPSERT_APPOINTMENT)?.execute(params![
            row.external_id,
            tenant,
            a.calendar_id,
            a.contact_id,
            a.appointment_status,
            a.assigned_user_id,
            a.title,
            opt_ts(&a.start_time),
            opt_ts(&a.end_time),
            opt_ts(&row.created_at),
            opt_ts(&row.updated_at),
            raw,
            ts(&row.synced_at),
        ]),
    }
}

fn read_record(table: Table, row: &Row<'_>) -> rusqlite::Result<DestinationRecord> {
    let external_id: String = row.get("id")?;
    let tenant_id = get_tenant(row, row.as_ref().column_index("location_id")?)?;
    let idx = |name: &str| row.as_ref().column_index(name);

    let fields = match table {
        Table::Contacts => RecordFields::Contact(ContactFields {
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            email: row.get("email")?,
            phone: row.get("phone")?,
            tags: get_json(row, idx("tags")?)?,
        }),
        Table::Opportunities => RecordFields::Opportunity(OpportunityFields {
            name: row.get("name")?,
            status: row.get("status")?,
            pipeline_id: row.get("pipeline_id")?,
            pipeline_stage_id: row.get("pipeline_stage_id")?,
            monetary_value: row.get("monetary_value")?,
            assigned_to: row.get("assigned_to")?,
            contact_id: row.get("contact_id")?,
            lost_reason_id: row.get("lost_reason_id")?,
        }),
        Table::Appointments => RecordFields::Appointment(AppointmentFields {
            calendar_id: row.get("calendar_id")?,
            contact_id: row.get("contact_id")?,
            appointment_status: row.get("appointment_status")?,
            assigned_user_id: row.get("assigned_user_id")?,
            title: row.get("title")?,
            start_time: get_opt_ts(row, idx("start_time")?)?,
            end_time: get_opt_ts(row, idx("end_time")?)?,
        }),
    };

    Ok(DestinationRecord {
        external_id,
        tenant_id,
        fields,
        created_at: get_opt_ts(row, idx("created_at")?)?,
        updated_at: get_opt_ts(row, idx("updated_at")?)?,
        raw: get_json(row, idx("raw_data")?)?,
        synced_at: get_ts(row, idx("synced_at")?)?,
    })
}

fn read_state(row: &Row<'_>) -> rusqlite::Result<SyncStateRow> {
    let entity_name: String = row.get(0)?;
    let entity = Entity::parse(&entity_name)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let cursor = match row.get::<_, Option<String>>(2)? {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(SyncStateRow {
        entity,
        tenant_id: get_tenant(row, 1)?,
        cursor,
        last_synced_at: get_opt_ts(row, 3)?,
        updated_at: get_ts(row, 4)?,
    })
}

#[async_trait]
impl DestinationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert_records(&self, table: Table, rows: &[DestinationRecord]) -> Result<usize> {
        check_table(table, rows)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let rows = rows.to_vec();
        let written = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                for row in &rows {
                    write_record(&tx, row)?;
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await?;

        debug!(table = %table, rows = written, "Upserted records");
        Ok(written)
    }

    async fn prune_records(
        &self,
        table: Table,
        tenant: &TenantId,
        synced_before: DateTime<Utc>,
    ) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE location_id = ?1 AND synced_at < ?2",
            table.as_str()
        );
        let tenant = tenant.to_string();
        let cutoff = ts(&synced_before);
        let deleted = self
            .with_conn(move |conn| conn.execute(&sql, params![tenant, cutoff]))
            .await?;
        Ok(deleted as u64)
    }

    async fn get_record(
        &self,
        table: Table,
        tenant: &TenantId,
        external_id: &str,
    ) -> Result<Option<DestinationRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = ?1 AND location_id = ?2",
            table.as_str()
        );
        let tenant = tenant.to_string();
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(&sql, params![external_id, tenant], |row| {
                read_record(table, row)
            })
            .optional()
        })
        .await
    }

    async fn count(&self, table: Table, tenant: &TenantId) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE location_id = ?1",
            table.as_str()
        );
        let tenant = tenant.to_string();
        let count: i64 = self
            .with_conn(move |conn| conn.query_row(&sql, [tenant], |row| row.get(0)))
            .await?;
        Ok(count as usize)
    }

    async fn upsert_lookups(&self, entries: &[LookupEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    r#"
                    INSERT INTO lookup_entries (location_id, kind, reference_id, name, synced_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(location_id, kind, reference_id) DO UPDATE SET
                        name = excluded.name,
                        synced_at = excluded.synced_at
                    "#,
                )?;
                for entry in &entries {
                    stmt.execute(params![
                        entry.tenant_id.as_str(),
                        entry.kind.as_str(),
                        entry.reference_id,
                        entry.name,
                        ts(&entry.synced_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
        .await
    }

    async fn prune_lookups(&self, tenant: &TenantId, synced_before: DateTime<Utc>) -> Result<u64> {
        let tenant = tenant.to_string();
        let cutoff = ts(&synced_before);
        let deleted = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM lookup_entries WHERE location_id = ?1 AND synced_at < ?2",
                    params![tenant, cutoff],
                )
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn list_lookups(&self, tenant: &TenantId) -> Result<Vec<LookupEntry>> {
        let tenant = tenant.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT location_id, kind, reference_id, name, synced_at
                FROM lookup_entries WHERE location_id = ?1
                ORDER BY kind, reference_id
                "#,
            )?;
            let entries = stmt.query_map([tenant], |row| {
                let kind_name: String = row.get(1)?;
                let kind = LookupKind::parse(&kind_name).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(1, kind_name.clone(), Type::Text)
                })?;
                Ok(LookupEntry {
                    tenant_id: get_tenant(row, 0)?,
                    kind,
                    reference_id: row.get(2)?,
                    name: row.get(3)?,
                    synced_at: get_ts(row, 4)?,
                })
            })?;
            entries.collect()
        })
        .await
    }

    async fn load_sync_state(
        &self,
        entity: Entity,
        tenant: &TenantId,
    ) -> Result<Option<SyncStateRow>> {
        let tenant = tenant.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                r#"
                SELECT entity, location_id, cursor, last_synced_at, updated_at
                FROM sync_state WHERE entity = ?1 AND location_id = ?2
                "#,
                params![entity.as_str(), tenant],
                read_state,
            )
            .optional()
        })
        .await
    }

    async fn save_sync_state(&self, row: &SyncStateRow) -> Result<()> {
        let cursor = row.cursor.as_ref().map(|c| c.to_string());
        let entity = row.entity.as_str();
        let tenant = row.tenant_id.to_string();
        let last_synced_at = opt_ts(&row.last_synced_at);
        let updated_at = ts(&row.updated_at);

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO sync_state (entity, location_id, cursor, last_synced_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(entity, location_id) DO UPDATE SET
                    cursor = excluded.cursor,
                    last_synced_at = excluded.last_synced_at,
                    updated_at = excluded.updated_at
                "#,
                params![entity, tenant, cursor, last_synced_at, updated_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn list_sync_states(&self, tenant: Option<&TenantId>) -> Result<Vec<SyncStateRow>> {
        let tenant = tenant.map(|t| t.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT entity, location_id, cursor, last_synced_at, updated_at
                FROM sync_state
                WHERE ?1 IS NULL OR location_id = ?1
                ORDER BY location_id, entity
                "#,
            )?;
            let rows = stmt.query_map([tenant], read_state)?;
            rows.collect()
        })
        .await
    }

    async fn active_integrations(&self) -> Result<Vec<Integration>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT location_id, api_token, active, updated_at
                FROM integrations WHERE active = 1
                ORDER BY updated_at DESC
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Integration {
                    tenant_id: get_tenant(row, 0)?,
                    api_token: SecretString::new(row.get::<_, String>(1)?),
                    active: row.get::<_, i32>(2)? != 0,
                    updated_at: get_ts(row, 3)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn save_integration(&self, integration: &Integration) -> Result<()> {
        let tenant = integration.tenant_id.to_string();
        let token = integration.api_token.expose().to_string();
        let active = integration.active as i32;
        let updated_at = ts(&integration.updated_at);

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO integrations (location_id, api_token, active, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(location_id) DO UPDATE SET
                    api_token = excluded.api_token,
                    active = excluded.active,
                    updated_at = excluded.updated_at
                "#,
                params![tenant, token, active, updated_at],
            )
            .map(|_| ())
        })
        .await
    }
}
