//! Raw CRM JSON to destination rows.
//!
//! Every optional-field lookup on source payloads lives in this module.
//! Payloads are loosely typed: ids may be strings or numbers, dates may be
//! epoch milliseconds, numeric strings, ISO strings or nested objects, and
//! several fields have snake_case and camelCase spellings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crmsync_common::{Error, Result, TenantId};
use crmsync_storage::{
    AppointmentFields, ContactFields, DestinationRecord, LookupEntry, LookupKind,
    OpportunityFields, RecordFields,
};

use crate::cursor::Position;

/// Keys tried, in order, when a date arrives as an object.
const DATE_OBJECT_KEYS: [&str; 6] = ["dateTime", "time", "value", "iso", "startTime", "endTime"];

/// Parse a loosely typed date.
///
/// Numbers and numeric strings are epoch milliseconds. Other strings are
/// tried as RFC 3339, then as a naive datetime (UTC), then as a plain date.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let ms = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(ms).single()
        }
        Value::String(s) => parse_date_str(s.trim()),
        Value::Object(map) => DATE_OBJECT_KEYS
            .iter()
            .find_map(|k| map.get(*k).filter(|v| !v.is_null()))
            .and_then(parse_date),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// First of `keys` present on `raw` as a non-null value.
fn first<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| raw.get(*k).filter(|v| !v.is_null()))
}

/// String field, accepting numbers as well.
fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    match first(raw, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn date(raw: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    first(raw, keys).and_then(parse_date)
}

/// Record id as a string.
///
/// # Errors
/// - `Error::MalformedResponse` if the record has no usable `id`
pub fn record_id(raw: &Value) -> Result<String> {
    text(raw, &["id"]).ok_or_else(|| {
        Error::MalformedResponse(format!(
            "record without id: {}",
            truncate(&raw.to_string(), 200)
        ))
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn tags(raw: &Value) -> Vec<String> {
    match raw.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|t| t.as_str())
            .map(|t| t.to_string())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn number(raw: &Value, keys: &[&str]) -> Option<f64> {
    match first(raw, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn record(
    raw: &Value,
    tenant: &TenantId,
    fields: RecordFields,
    created: &[&str],
    updated: &[&str],
    synced_at: DateTime<Utc>,
) -> Result<DestinationRecord> {
    let created_at = date(raw, created);
    let updated_at = date(raw, updated).or(created_at);
    Ok(DestinationRecord {
        external_id: record_id(raw)?,
        tenant_id: tenant.clone(),
        fields,
        created_at,
        updated_at,
        raw: raw.clone(),
        synced_at,
    })
}

pub fn map_contact(
    raw: &Value,
    tenant: &TenantId,
    synced_at: DateTime<Utc>,
) -> Result<DestinationRecord> {
    let fields = ContactFields {
        first_name: text(raw, &["firstName", "first_name"]),
        last_name: text(raw, &["lastName", "last_name"]),
        email: text(raw, &["email"]),
        phone: text(raw, &["phone"]),
        tags: tags(raw),
    };
    record(
        raw,
        tenant,
        RecordFields::Contact(fields),
        &["dateAdded", "createdAt", "created_at"],
        &["dateUpdated", "updatedAt", "updated_at"],
        synced_at,
    )
}

pub fn map_opportunity(
    raw: &Value,
    tenant: &TenantId,
    synced_at: DateTime<Utc>,
) -> Result<DestinationRecord> {
    let fields = OpportunityFields {
        name: text(raw, &["name"]),
        status: text(raw, &["status"]),
        pipeline_id: text(raw, &["pipelineId", "pipeline_id"]),
        pipeline_stage_id: text(raw, &["pipelineStageId", "pipeline_stage_id"]),
        monetary_value: number(raw, &["monetaryValue", "monetary_value"]),
        assigned_to: text(raw, &["assignedTo", "assigned_to"]),
        contact_id: text(raw, &["contactId", "contact_id"]),
        lost_reason_id: text(raw, &["lostReasonId", "lost_reason_id"]),
    };
    record(
        raw,
        tenant,
        RecordFields::Opportunity(fields),
        &["createdAt", "created_at"],
        &["updatedAt", "updated_at"],
        synced_at,
    )
}

/// Map a calendar event. `calendar_id` is used when the event omits its own.
pub fn map_appointment(
    raw: &Value,
    tenant: &TenantId,
    calendar_id: &str,
    synced_at: DateTime<Utc>,
) -> Result<DestinationRecord> {
    let fields = AppointmentFields {
        calendar_id: text(raw, &["calendarId", "calendar_id"])
            .unwrap_or_else(|| calendar_id.to_string()),
        contact_id: text(raw, &["contactId", "contact_id"]),
        appointment_status: text(raw, &["appointmentStatus", "appointment_status", "status"]),
        assigned_user_id: text(raw, &["assignedUserId", "assigned_user_id"]),
        title: text(raw, &["title"]),
        start_time: date(raw, &["startTime", "start_time"]),
        end_time: date(raw, &["endTime", "end_time"]),
    };
    record(
        raw,
        tenant,
        RecordFields::Appointment(fields),
        &["dateAdded", "createdAt"],
        &["dateUpdated", "updatedAt"],
        synced_at,
    )
}

/// Position after `last` in a contacts listing.
pub fn contact_position(last: &Value, previous: &Position) -> Position {
    advance(last, previous, &["dateAdded", "createdAt", "dateUpdated", "updatedAt"])
}

/// Position after `last` in an opportunity search ordered by creation.
pub fn opportunity_position(last: &Value, previous: &Position) -> Position {
    advance(last, previous, &["createdAt", "updatedAt"])
}

fn advance(last: &Value, previous: &Position, keys: &[&str]) -> Position {
    let start_after = date(last, keys)
        .map(|d| d.timestamp_millis())
        .or(previous.start_after);
    let start_after_id = text(last, &["id"]).or_else(|| previous.start_after_id.clone());
    Position {
        start_after,
        start_after_id,
    }
}

/// Pipeline and stage names from a pipelines listing entry.
pub fn pipeline_lookups(
    raw: &Value,
    tenant: &TenantId,
    synced_at: DateTime<Utc>,
) -> Vec<LookupEntry> {
    let entry = |kind, reference_id: String, name: Option<String>| LookupEntry {
        tenant_id: tenant.clone(),
        kind,
        name: name.unwrap_or_else(|| reference_id.clone()),
        reference_id,
        synced_at,
    };

    let mut entries = Vec::new();
    if let Some(id) = text(raw, &["id"]) {
        entries.push(entry(LookupKind::Pipeline, id, text(raw, &["name"])));
    }
    if let Some(Value::Array(stages)) = raw.get("stages") {
        for stage in stages {
            if let Some(id) = text(stage, &["id"]) {
                entries.push(entry(LookupKind::PipelineStage, id, text(stage, &["name"])));
            }
        }
    }
    entries
}

/// Lost-reason entry from a lost opportunity, if it carries a reason id.
///
/// The name comes from `lostReason` (a string or an `{id, name}` object) or
/// `lostReasonName`, and falls back to the id itself.
pub fn lost_reason_lookup(
    raw: &Value,
    tenant: &TenantId,
    synced_at: DateTime<Utc>,
) -> Option<LookupEntry> {
    let reason = raw.get("lostReason");
    let reason_id = text(raw, &["lostReasonId", "lost_reason_id"])
        .or_else(|| reason.and_then(|r| text(r, &["id"])))?;

    let name = match reason {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(obj @ Value::Object(_)) => text(obj, &["name"]),
        _ => None,
    }
    .or_else(|| text(raw, &["lostReasonName", "lost_reason_name"]));

    Some(LookupEntry {
        tenant_id: tenant.clone(),
        kind: LookupKind::LostReason,
        name: name.unwrap_or_else(|| reason_id.clone()),
        reference_id: reason_id,
        synced_at,
    })
}
