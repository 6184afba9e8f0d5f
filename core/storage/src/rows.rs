//! Row types written to and read from the destination store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crmsync_common::{Entity, SecretString, TenantId};

/// Destination tables holding per-record rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Contacts,
    Opportunities,
    Appointments,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Contacts, Table::Opportunities, Table::Appointments];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Contacts => "contacts",
            Table::Opportunities => "opportunities",
            Table::Appointments => "appointments",
        }
    }

    /// Table an entity writes to. `Lookup` has its own entry table.
    pub fn for_entity(entity: Entity) -> Option<Table> {
        match entity {
            Entity::Contacts => Some(Table::Contacts),
            Entity::Opportunities => Some(Table::Opportunities),
            Entity::Appointments => Some(Table::Appointments),
            Entity::Lookup => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityFields {
    pub name: Option<String>,
    pub status: Option<String>,
    pub pipeline_id: Option<String>,
    pub pipeline_stage_id: Option<String>,
    pub monetary_value: Option<f64>,
    pub assigned_to: Option<String>,
    pub contact_id: Option<String>,
    pub lost_reason_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentFields {
    pub calendar_id: String,
    pub contact_id: Option<String>,
    pub appointment_status: Option<String>,
    pub assigned_user_id: Option<String>,
    pub title: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Normalized columns, one variant per destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordFields {
    Contact(ContactFields),
    Opportunity(OpportunityFields),
    Appointment(AppointmentFields),
}

impl RecordFields {
    pub fn table(&self) -> Table {
        match self {
            RecordFields::Contact(_) => Table::Contacts,
            RecordFields::Opportunity(_) => Table::Opportunities,
            RecordFields::Appointment(_) => Table::Appointments,
        }
    }
}

/// One materialized CRM record.
///
/// Keyed by `(external_id, tenant_id)`. `synced_at` is the stamp pruning
/// compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub external_id: String,
    pub tenant_id: TenantId,
    pub fields: RecordFields,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Full source payload.
    pub raw: Value,
    pub synced_at: DateTime<Utc>,
}

impl DestinationRecord {
    pub fn table(&self) -> Table {
        self.fields.table()
    }
}

/// Kind of reference data held in the lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    Pipeline,
    PipelineStage,
    LostReason,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupKind::Pipeline => "pipeline",
            LookupKind::PipelineStage => "pipeline_stage",
            LookupKind::LostReason => "lost_reason",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pipeline" => Some(LookupKind::Pipeline),
            "pipeline_stage" => Some(LookupKind::PipelineStage),
            "lost_reason" => Some(LookupKind::LostReason),
            _ => None,
        }
    }
}

/// Reference id to display name, keyed by `(tenant_id, kind, reference_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub tenant_id: TenantId,
    pub kind: LookupKind,
    pub reference_id: String,
    pub name: String,
    pub synced_at: DateTime<Utc>,
}

/// Persisted sync state of one (entity, tenant) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStateRow {
    pub entity: Entity,
    pub tenant_id: TenantId,
    /// Opaque to the store; interpreted by the sync crate.
    pub cursor: Option<Value>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// CRM credentials of one tenant.
#[derive(Debug, Clone)]
pub struct Integration {
    pub tenant_id: TenantId,
    pub api_token: SecretString,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_for_entity() {
        assert_eq!(Table::for_entity(Entity::Contacts), Some(Table::Contacts));
        assert_eq!(Table::for_entity(Entity::Lookup), None);
    }

    #[test]
    fn test_lookup_kind_names() {
        for kind in [
            LookupKind::Pipeline,
            LookupKind::PipelineStage,
            LookupKind::LostReason,
        ] {
            assert_eq!(LookupKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(LookupKind::parse("stage"), None);
    }

    #[test]
    fn test_fields_know_their_table() {
        let fields = RecordFields::Appointment(AppointmentFields::default());
        assert_eq!(fields.table(), Table::Appointments);
    }
}
