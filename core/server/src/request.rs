//! Sync trigger parameters from the query string and the JSON body.
//!
//! Entities from both sources are merged. For the scalar flags the query
//! string wins over the body. A body that is not JSON is ignored.

use serde_json::Value;
use tracing::warn;

use crmsync_common::env::is_truthy;
use crmsync_common::{Error, Result, TenantId};
use crmsync_sync::InvocationRequest;

#[derive(Debug, Default)]
struct RawParams {
    entities: Vec<String>,
    full_sync: Option<bool>,
    initial_window_days: Option<String>,
    tenant: Option<String>,
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
}

fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().map_or(false, |n| n != 0.0)),
        Value::String(s) => Some(is_truthy(s)),
        Value::Null => None,
        _ => Some(false),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_of<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| body.get(k))
        .find(|v| !v.is_null())
}

fn from_query(query: Option<&str>) -> RawParams {
    let mut params = RawParams::default();
    let Some(query) = query else {
        return params;
    };
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "entities" => params.entities.extend(split_list(&value)),
            "full_sync" | "fullSync" => {
                if params.full_sync.is_none() && !value.trim().is_empty() {
                    params.full_sync = Some(is_truthy(&value));
                }
            }
            "initial_window_days" | "initialWindowDays" => {
                if params.initial_window_days.is_none() {
                    params.initial_window_days = Some(value.trim().to_string());
                }
            }
            "tenant" => {
                if params.tenant.is_none() {
                    params.tenant = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }
    params
}

fn from_body(body: &[u8]) -> RawParams {
    let mut params = RawParams::default();
    if body.iter().all(u8::is_ascii_whitespace) {
        return params;
    }
    let body: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring unparseable request body: {}", e);
            return params;
        }
    };

    match body.get("entities") {
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => params.entities.extend(split_list(s)),
                    other => params.entities.push(other.to_string()),
                }
            }
        }
        Some(Value::String(s)) => params.entities.extend(split_list(s)),
        _ => {}
    }
    params.full_sync = first_of(&body, &["full_sync", "fullSync"]).and_then(bool_value);
    params.initial_window_days =
        first_of(&body, &["initial_window_days", "initialWindowDays"]).and_then(scalar_string);
    params.tenant = first_of(&body, &["tenant"]).and_then(scalar_string);
    params
}

fn window_days(raw: Option<String>) -> Result<Option<i64>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => {
            let days: f64 = raw.parse().map_err(|_| {
                Error::InvalidInput(format!("initial_window_days must be a number: {}", raw))
            })?;
            if !days.is_finite() || days < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "initial_window_days must be non-negative: {}",
                    raw
                )));
            }
            Ok((days >= 1.0).then(|| days.floor() as i64))
        }
    }
}

/// Build the invocation request of a sync call.
///
/// # Errors
/// - `Error::InvalidInput` for unknown entities, a bad window or an empty tenant
pub fn parse_invocation(query: Option<&str>, body: &[u8]) -> Result<InvocationRequest> {
    let query = from_query(query);
    let body = from_body(body);

    let mut names = query.entities;
    names.extend(body.entities);
    let entities = InvocationRequest::parse_entities(&names)?;

    let tenant = match query.tenant.or(body.tenant) {
        Some(raw) if !raw.is_empty() => Some(TenantId::new(raw)?),
        _ => None,
    };

    Ok(InvocationRequest {
        entities,
        full_sync: query.full_sync.or(body.full_sync).unwrap_or(false),
        initial_window_days: window_days(query.initial_window_days.or(body.initial_window_days))?,
        tenant,
        received_at: None,
    })
}
