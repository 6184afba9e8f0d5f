//! Scripted in-memory CRM for engine tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crmsync_common::{Error, Result, TenantId};
use crmsync_crm::{CrmApi, Page, PageCursor, PageQuery, TimeWindow};

/// One recorded API call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub endpoint: &'static str,
    pub query: Option<PageQuery>,
    pub calendar_id: Option<String>,
    pub window: Option<TimeWindow>,
}

/// Fake CRM whose every call sleeps `page_delay` on the tokio clock.
///
/// Contacts and opportunities are served in `(timestamp, id)` order and
/// paginated by position like the real API.
pub struct FakeCrm {
    pub contacts: Vec<Value>,
    pub opportunities: Vec<Value>,
    pub calendars: Vec<Value>,
    pub events: HashMap<String, Vec<Value>>,
    pub pipelines: Vec<Value>,
    pub page_delay: Duration,
    /// Reject queries carrying `startAfter` with HTTP 422.
    pub reject_timestamp_cursor: bool,
    pub failures: Mutex<HashMap<&'static str, u16>>,
    pub calls: Mutex<Vec<Call>>,
}

impl Default for FakeCrm {
    fn default() -> Self {
        Self {
            contacts: Vec::new(),
            opportunities: Vec::new(),
            calendars: Vec::new(),
            events: HashMap::new(),
            pipelines: Vec::new(),
            page_delay: Duration::from_secs(1),
            reject_timestamp_cursor: false,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

pub const BASE_MS: i64 = 1_700_000_000_000;

/// `n` contacts added one second apart.
pub fn contacts(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            json!({
                "id": format!("c_{:04}", i),
                "firstName": format!("Contact {}", i),
                "dateAdded": BASE_MS + i as i64 * 1000,
            })
        })
        .collect()
}

/// `n` opportunities created one second apart; every third one is lost.
pub fn opportunities(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            let lost = i % 3 == 2;
            let mut raw = json!({
                "id": format!("o_{:04}", i),
                "name": format!("Deal {}", i),
                "status": if lost { "lost" } else { "open" },
                "pipelineId": "p_1",
                "monetaryValue": 100 * i,
                "createdAt": BASE_MS + i as i64 * 1000,
            });
            if lost {
                raw["lostReasonId"] = json!(format!("lr_{}", i % 2));
                raw["lostReason"] = json!(if i % 2 == 0 { "Price" } else { "Timing" });
            }
            raw
        })
        .collect()
}

fn position_of(raw: &Value, key: &str) -> (i64, String) {
    (
        raw[key].as_i64().unwrap_or_default(),
        raw["id"].as_str().unwrap_or_default().to_string(),
    )
}

fn paginate(records: &[Value], key: &str, query: &PageQuery) -> Vec<Value> {
    let start = match (query.start_after, query.start_after_id.as_deref()) {
        (None, None) => 0,
        (None, Some(id)) => records
            .iter()
            .position(|r| r["id"].as_str() == Some(id))
            .map(|i| i + 1)
            .unwrap_or(0),
        (Some(ts), id) => records
            .iter()
            .position(|r| {
                let (rts, rid) = position_of(r, key);
                match id {
                    Some(id) => (rts, rid.as_str()) > (ts, id),
                    None => rts > ts,
                }
            })
            .unwrap_or(records.len()),
    };
    records
        .iter()
        .skip(start)
        .take(query.limit as usize)
        .cloned()
        .collect()
}

impl FakeCrm {
    /// Make every call to `endpoint` fail with `status`.
    pub fn fail(&self, endpoint: &'static str, status: u16) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(endpoint, status);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint == endpoint)
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    async fn enter(
        &self,
        endpoint: &'static str,
        query: Option<&PageQuery>,
        calendar_id: Option<&str>,
        window: Option<&TimeWindow>,
    ) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                endpoint,
                query: query.cloned(),
                calendar_id: calendar_id.map(|c| c.to_string()),
                window: window.copied(),
            });
        }
        tokio::time::sleep(self.page_delay).await;

        let injected = self
            .failures
            .lock()
            .ok()
            .and_then(|f| f.get(endpoint).copied());
        if let Some(status) = injected {
            return Err(Error::Api {
                status,
                body: format!("{{\"message\":\"injected {} failure\"}}", endpoint),
                retry_after: None,
            });
        }
        if self.reject_timestamp_cursor && query.map_or(false, |q| q.start_after.is_some()) {
            return Err(Error::Api {
                status: 422,
                body: "{\"message\":\"startAfter not supported with this sort\"}".to_string(),
                retry_after: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn list_contacts(&self, _tenant: &TenantId, query: &PageQuery) -> Result<Page> {
        self.enter("contacts", Some(query), None, None).await?;
        Ok(Page {
            records: paginate(&self.contacts, "dateAdded", query),
            next: None,
        })
    }

    async fn search_opportunities(
        &self,
        _tenant: &TenantId,
        query: &PageQuery,
        status: &str,
    ) -> Result<Page> {
        let endpoint = if status == "lost" {
            "opportunities_lost"
        } else {
            "opportunities"
        };
        self.enter(endpoint, Some(query), None, None).await?;

        let matching: Vec<Value> = self
            .opportunities
            .iter()
            .filter(|o| status == "all" || o["status"].as_str() == Some(status))
            .cloned()
            .collect();
        let records = paginate(&matching, "createdAt", query);
        let next = records.last().map(|last| {
            let (ts, id) = position_of(last, "createdAt");
            PageCursor {
                start_after: Some(ts),
                start_after_id: Some(id),
            }
        });
        Ok(Page { records, next })
    }

    async fn list_calendars(&self, _tenant: &TenantId) -> Result<Vec<Value>> {
        self.enter("calendars", None, None, None).await?;
        Ok(self.calendars.clone())
    }

    async fn list_calendar_events(
        &self,
        _tenant: &TenantId,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Value>> {
        self.enter("events", None, Some(calendar_id), Some(window))
            .await?;
        Ok(self.events.get(calendar_id).cloned().unwrap_or_default())
    }

    async fn list_pipelines(&self, _tenant: &TenantId) -> Result<Vec<Value>> {
        self.enter("pipelines", None, None, None).await?;
        Ok(self.pipelines.clone())
    }
}
