//! HTTP trigger for crmsync.
//!
//! `POST /sync` (or `GET /sync`) runs one invocation through the process's
//! sync scheduler and answers with its report. `GET /health` is
//! unauthenticated.

pub mod config;
pub mod error;
pub mod request;
pub mod routes;

use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

use crmsync_common::Result;

pub use config::ServerConfig;
pub use error::ApiError;
pub use request::parse_invocation;
pub use routes::{router, AppState, SYNC_SECRET_HEADER};

/// Serve the sync routes on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "Sync server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Sync server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_common::TenantId;
    use crmsync_crm::CrmClientConfig;
    use crmsync_storage::MemoryStore;
    use crmsync_sync::{
        crm_connector, Orchestrator, SharedSecret, SyncMode, SyncScheduler, SyncSettings,
        TenantCredentials,
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn start(secret: Option<&str>, crm: Option<&MockServer>) -> SocketAddr {
        let config = CrmClientConfig::from_lookup(|key| match key {
            "CRM_BASE_URL" => crm.map(|server| server.uri()),
            "MAX_RETRIES" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();
        let credentials = crm.map(|_| TenantCredentials {
            tenant_id: TenantId::new("loc_1").unwrap(),
            api_token: crmsync_common::SecretString::new("token"),
        });
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryStore::new()),
            SyncSettings::default(),
            crm_connector(config),
        )
        .with_env_credentials(credentials);
        let (scheduler, _worker) = SyncScheduler::spawn(Arc::new(orchestrator), SyncMode::Manual);

        let state = AppState {
            scheduler,
            secret: SharedSecret::new(secret.map(str::to_string)),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, std::future::pending()));
        addr
    }

    #[tokio::test]
    async fn test_health_needs_no_secret() {
        let addr = start(Some("s3cret"), None).await;
        let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_missing_or_wrong_secret_is_401() {
        let addr = start(Some("s3cret"), None).await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/sync", addr);

        let response = client.post(&url).send().await.unwrap();
        assert_eq!(response.status(), 401);

        let response = client
            .post(&url)
            .header("authorization", "Bearer nope")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["ok"], false);

        // checked before the method
        let response = client.delete(&url).send().await.unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_unsupported_method_is_405() {
        let addr = start(Some("s3cret"), None).await;
        let response = reqwest::Client::new()
            .put(format!("http://{}/sync", addr))
            .header(SYNC_SECRET_HEADER, "s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_400() {
        let addr = start(None, None).await;
        let response = reqwest::Client::new()
            .post(format!("http://{}/sync?entities=deals", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_no_integration_is_500() {
        let addr = start(None, None).await;
        let response = reqwest::Client::new()
            .post(format!("http://{}/sync", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().contains("integration"));
    }

    #[tokio::test]
    async fn test_sync_contacts_end_to_end() {
        let crm = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contacts/"))
            .and(query_param("locationId", "loc_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "contacts": [
                    { "id": "c_1", "firstName": "Ada", "dateAdded": "2026-01-05T10:00:00Z" },
                    { "id": "c_2", "firstName": "Alan", "dateAdded": "2026-01-06T10:00:00Z" }
                ]
            })))
            .expect(1)
            .mount(&crm)
            .await;

        let addr = start(Some("s3cret"), Some(&crm)).await;
        let response = reqwest::Client::new()
            .post(format!("http://{}/sync", addr))
            .header("authorization", "Bearer s3cret")
            .json(&json!({ "entities": ["contacts"], "full_sync": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["results"]["contacts"], 2);
        assert_eq!(body["force_full_sync"], true);
        assert_eq!(body["partial"], false);
    }
}
