use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crmsync_sync::{InvocationReport, SharedSecret, SyncScheduler};

use crate::error::ApiError;
use crate::request::parse_invocation;

pub const SYNC_SECRET_HEADER: &str = "x-sync-secret";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: SyncScheduler,
    pub secret: SharedSecret,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync", any(sync))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn authorize(secret: &SharedSecret, headers: &HeaderMap) -> Result<(), ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(SharedSecret::bearer_token);
    let header = headers
        .get(SYNC_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    secret.verify(bearer, header).map_err(|e| {
        warn!("Rejected sync trigger: {}", e);
        ApiError::from(e)
    })
}

async fn sync(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<InvocationReport>, ApiError> {
    authorize(&state.secret, &headers)?;
    if method != Method::GET && method != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }

    let body: &[u8] = if method == Method::POST { &body } else { &[] };
    let request = parse_invocation(query.as_deref(), body)?;
    info!(
        entities = ?request.entities(),
        full_sync = request.full_sync,
        "Sync triggered"
    );

    match state.scheduler.invoke(request).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            error!("Sync invocation failed: {}", e);
            Err(e.into())
        }
    }
}
