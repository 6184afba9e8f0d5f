//! reqwest-backed CRM API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crmsync_common::env::{self, parse_number, var_or};
use crmsync_common::{Error, Result, SecretString, TenantId};

use crate::api::CrmApi;
use crate::models::{
    CalendarsResponse, ContactsResponse, EventsResponse, OpportunitiesResponse, Page, PageQuery,
    PipelinesResponse, TimeWindow,
};
use crate::retry::{RetryConfig, RetryExecutor};

/// Default CRM API base URL.
pub const DEFAULT_BASE_URL: &str = "https://services.leadconnectorhq.com";
/// API version header sent with most endpoints.
pub const DEFAULT_API_VERSION: &str = "2021-07-28";
/// API version header the calendar endpoints require.
pub const DEFAULT_CALENDARS_VERSION: &str = "2021-04-15";

/// Connection settings for [`CrmClient`].
#[derive(Debug, Clone)]
pub struct CrmClientConfig {
    pub base_url: String,
    pub api_version: String,
    pub calendars_version: String,
    /// Hard limit for a single attempt, body included.
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl CrmClientConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env::process_env)
    }

    /// Read the configuration through `lookup`.
    ///
    /// # Errors
    /// - `Error::Config` if a numeric variable does not parse
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let timeout_ms: u64 = parse_number(&lookup, "REQUEST_TIMEOUT_MS", 30_000)?;
        let max_retries: u32 = parse_number(&lookup, "MAX_RETRIES", 5)?;
        let base_delay_ms: u64 = parse_number(&lookup, "RETRY_BASE_DELAY_MS", 1_000)?;

        Ok(Self {
            base_url: env::normalize_url(&var_or(&lookup, "CRM_BASE_URL", DEFAULT_BASE_URL)),
            api_version: var_or(&lookup, "CRM_API_VERSION", DEFAULT_API_VERSION),
            calendars_version: var_or(&lookup, "CRM_CALENDARS_VERSION", DEFAULT_CALENDARS_VERSION),
            request_timeout: Duration::from_millis(timeout_ms.max(1)),
            retry: RetryConfig::new(max_retries)
                .with_base_delay(Duration::from_millis(base_delay_ms)),
        })
    }
}

impl Default for CrmClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            calendars_version: DEFAULT_CALENDARS_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// CRM API client authenticated with one tenant's token.
pub struct CrmClient {
    http: Client,
    config: CrmClientConfig,
    token: SecretString,
    retry: RetryExecutor,
}

impl CrmClient {
    /// Create a new client.
    ///
    /// # Errors
    /// - `Error::Config` if the token is empty or the HTTP client cannot be built
    pub fn new(config: CrmClientConfig, token: SecretString) -> Result<Self> {
        if token.is_empty() {
            return Err(Error::Config("CRM API token is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent(concat!("crmsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let retry = RetryExecutor::new(config.retry.clone());

        Ok(Self {
            http,
            config,
            token,
            retry,
        })
    }

    pub fn config(&self) -> &CrmClientConfig {
        &self.config
    }

    /// Perform one logical request, retrying transient failures.
    ///
    /// Query parameters with empty values are not sent.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        version: &str,
    ) -> Result<Value> {
        let url = self.url(path, query)?;
        self.retry
            .execute(|| self.send_once(method.clone(), url.clone(), version))
            .await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        version: &str,
    ) -> Result<T> {
        let value = self.request(Method::GET, path, query, version).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::MalformedResponse(format!("{}: {}", path, e)))
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.config.base_url, path))
            .map_err(|e| Error::Config(format!("Invalid CRM URL for {}: {}", path, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.iter().filter(|(_, v)| !v.is_empty()) {
                pairs.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    async fn send_once(&self, method: Method, url: Url, version: &str) -> Result<Value> {
        debug!(%method, path = url.path(), "CRM request");

        let attempt = async {
            let response = self
                .http
                .request(method, url)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token.expose()))
                .header("Version", version)
                .header(header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| Error::Network(format!("Request failed: {}", e)))?;

            handle_response(response).await
        };

        tokio::time::timeout(self.config.request_timeout, attempt)
            .await
            .map_err(|_| Error::Timeout(self.config.request_timeout))?
    }
}

async fn handle_response(response: Response) -> Result<Value> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;

    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            body,
            retry_after,
        });
    }

    if body.trim().is_empty() || status == StatusCode::NO_CONTENT {
        return Ok(Value::Object(Default::default()));
    }

    serde_json::from_str(&body)
        .map_err(|e| Error::MalformedResponse(format!("Invalid JSON body: {}", e)))
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn opt_string<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn list_contacts(&self, tenant: &TenantId, query: &PageQuery) -> Result<Page> {
        let params = [
            ("locationId", tenant.to_string()),
            ("limit", query.limit.to_string()),
            ("startAfter", opt_string(query.start_after)),
            ("startAfterId", opt_string(query.start_after_id.as_ref())),
        ];
        let resp: ContactsResponse = self
            .request_json("/contacts/", &params, &self.config.api_version)
            .await?;

        Ok(Page {
            records: resp.contacts,
            next: None,
        })
    }

    async fn search_opportunities(
        &self,
        tenant: &TenantId,
        query: &PageQuery,
        status: &str,
    ) -> Result<Page> {
        let params = [
            ("location_id", tenant.to_string()),
            ("limit", query.limit.to_string()),
            ("startAfter", opt_string(query.start_after)),
            ("startAfterId", opt_string(query.start_after_id.as_ref())),
            ("status", status.to_string()),
            ("order", "added_asc".to_string()),
        ];
        let resp: OpportunitiesResponse = self
            .request_json("/opportunities/search", &params, &self.config.api_version)
            .await?;

        let next = resp.meta.as_ref().and_then(|m| m.cursor());
        Ok(Page {
            records: resp.opportunities,
            next,
        })
    }

    async fn list_calendars(&self, tenant: &TenantId) -> Result<Vec<Value>> {
        let params = [
            ("locationId", tenant.to_string()),
            ("showDrafted", "true".to_string()),
        ];
        let resp: CalendarsResponse = self
            .request_json("/calendars/", &params, &self.config.calendars_version)
            .await?;
        Ok(resp.calendars)
    }

    async fn list_calendar_events(
        &self,
        tenant: &TenantId,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Value>> {
        let params = [
            ("locationId", tenant.to_string()),
            ("calendarId", calendar_id.to_string()),
            ("startTime", window.start_ms.to_string()),
            ("endTime", window.end_ms.to_string()),
        ];
        let resp: EventsResponse = self
            .request_json("/calendars/events", &params, &self.config.calendars_version)
            .await?;
        Ok(resp.events)
    }

    async fn list_pipelines(&self, tenant: &TenantId) -> Result<Vec<Value>> {
        let params = [("locationId", tenant.to_string())];
        let resp: PipelinesResponse = self
            .request_json("/opportunities/pipelines", &params, &self.config.api_version)
            .await?;
        Ok(resp.pipelines)
    }
}
