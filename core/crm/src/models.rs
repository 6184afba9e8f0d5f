//! Wire models for the CRM list endpoints.
//!
//! Record payloads stay as raw JSON; normalization happens in one place in
//! the sync crate. Only the envelope is typed here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pagination position understood by the CRM: epoch-millisecond timestamp
/// plus a tie-breaking record id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after_id: Option<String>,
}

impl PageCursor {
    pub fn is_empty(&self) -> bool {
        self.start_after.is_none() && self.start_after_id.is_none()
    }
}

/// Parameters of one paginated list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: u32,
    pub start_after: Option<i64>,
    pub start_after_id: Option<String>,
}

impl PageQuery {
    pub fn first(limit: u32) -> Self {
        Self {
            limit,
            start_after: None,
            start_after_id: None,
        }
    }

    pub fn after(limit: u32, cursor: &PageCursor) -> Self {
        Self {
            limit,
            start_after: cursor.start_after,
            start_after_id: cursor.start_after_id.clone(),
        }
    }

    /// Same position without the timestamp component.
    pub fn id_only(&self) -> Self {
        Self {
            limit: self.limit,
            start_after: None,
            start_after_id: self.start_after_id.clone(),
        }
    }
}

/// One page of raw records.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Value>,
    /// Position reported by the server for the next page, when it reports one.
    pub next: Option<PageCursor>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Inclusive time window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactsResponse {
    #[serde(default)]
    pub contacts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpportunitiesResponse {
    #[serde(default)]
    pub opportunities: Vec<Value>,
    #[serde(default)]
    pub meta: Option<SearchMeta>,
}

/// Search metadata. Fields are loosely typed on the wire: `startAfter` has
/// been observed both as a number and as a numeric string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchMeta {
    #[serde(default)]
    pub start_after: Option<Value>,
    #[serde(default)]
    pub start_after_id: Option<Value>,
}

impl SearchMeta {
    pub fn cursor(&self) -> Option<PageCursor> {
        let start_after = self.start_after.as_ref().and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })?;
        let start_after_id = self
            .start_after_id
            .as_ref()
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(PageCursor {
            start_after: Some(start_after),
            start_after_id,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CalendarsResponse {
    #[serde(default)]
    pub calendars: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventsResponse {
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PipelinesResponse {
    #[serde(default)]
    pub pipelines: Vec<Value>,
}
