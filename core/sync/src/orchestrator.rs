//! One sync invocation across entities.
//!
//! The orchestrator starts the budget at the request's arrival, resolves
//! the tenant's CRM credentials, and runs the requested entities one after
//! another. An entity is skipped when the remaining budget cannot fit its
//! first step. A failing entity is reported and the next one runs, except
//! for store failures, which stop the invocation.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crmsync_common::env;
use crmsync_common::{Entity, Error, Result, SecretString, TenantId};
use crmsync_crm::{CrmApi, CrmClient, CrmClientConfig};
use crmsync_storage::DestinationStore;

use crate::budget::SyncBudget;
use crate::config::SyncSettings;
use crate::engine::{EntityOutcome, EntitySyncer, SyncContext};

/// Parameters of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Entities to sync, in order. Empty means all.
    pub entities: Vec<Entity>,
    pub full_sync: bool,
    pub initial_window_days: Option<i64>,
    /// Sync this tenant instead of the most recently updated integration.
    pub tenant: Option<TenantId>,
    /// When the trigger arrived. The budget runs from here, so time spent
    /// queued behind another invocation counts against it.
    pub received_at: Option<Instant>,
}

impl InvocationRequest {
    /// Parse caller-supplied entity names. `all` (or nothing) selects every
    /// entity.
    ///
    /// # Errors
    /// - `Error::InvalidInput` for an unknown entity name
    pub fn parse_entities<S: AsRef<str>>(names: &[S]) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if name.eq_ignore_ascii_case("all") {
                return Ok(Vec::new());
            }
            let entity = Entity::parse(name)?;
            if !entities.contains(&entity) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Entities this request covers, in processing order.
    pub fn entities(&self) -> Vec<Entity> {
        if self.entities.is_empty() {
            return Entity::ALL.to_vec();
        }
        let mut unique = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            if !unique.contains(entity) {
                unique.push(*entity);
            }
        }
        unique
    }
}

/// Response of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvocationReport {
    pub ok: bool,
    /// Rows written per entity, including partial counts of paused passes.
    pub results: BTreeMap<String, usize>,
    pub errors: BTreeMap<String, String>,
    pub skipped: Vec<String>,
    /// Some entity was skipped or paused before finishing its pass.
    pub partial: bool,
    pub force_full_sync: bool,
}

impl InvocationReport {
    fn new(force_full_sync: bool) -> Self {
        Self {
            force_full_sync,
            ..Default::default()
        }
    }

    fn record(&mut self, entity: Entity, outcome: &EntityOutcome) {
        self.results.insert(entity.to_string(), outcome.records);
        if outcome.paused() {
            self.partial = true;
        }
    }

    fn fail(&mut self, entity: Entity, err: &Error) {
        self.errors.insert(entity.to_string(), err.to_string());
    }

    fn skip(&mut self, entity: Entity) {
        self.skipped.push(entity.to_string());
        self.partial = true;
    }

    fn finish(mut self) -> Self {
        self.ok = self.errors.is_empty();
        self
    }
}

/// Worst-case cost of the first step of an entity.
pub fn first_step_estimate(entity: Entity) -> Duration {
    match entity {
        Entity::Contacts | Entity::Opportunities => Duration::from_secs(3),
        Entity::Appointments => Duration::from_secs(5),
        // pipelines plus a lost-opportunity scan
        Entity::Lookup => Duration::from_secs(15),
    }
}

/// CRM credentials of one tenant.
#[derive(Debug, Clone)]
pub struct TenantCredentials {
    pub tenant_id: TenantId,
    pub api_token: SecretString,
}

impl TenantCredentials {
    /// Credentials from `CRM_LOCATION_ID` and `CRM_API_TOKEN`, if set.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(env::process_env)
    }

    /// # Errors
    /// - `Error::Config` if only one of the two variables is set
    pub fn from_lookup<L>(lookup: L) -> Result<Option<Self>>
    where
        L: Fn(&str) -> Option<String>,
    {
        let location = lookup("CRM_LOCATION_ID").filter(|v| !v.trim().is_empty());
        let token = lookup("CRM_API_TOKEN").filter(|v| !v.trim().is_empty());
        match (location, token) {
            (None, None) => Ok(None),
            (Some(location), Some(token)) => Ok(Some(Self {
                tenant_id: TenantId::new(location)?,
                api_token: SecretString::new(token.trim()),
            })),
            _ => Err(Error::Config(
                "CRM_LOCATION_ID and CRM_API_TOKEN must be set together".to_string(),
            )),
        }
    }
}

/// Builds a CRM API client for a tenant.
pub type ApiConnector =
    Box<dyn Fn(&TenantCredentials) -> Result<Arc<dyn CrmApi>> + Send + Sync>;

/// Connector producing reqwest-backed [`CrmClient`]s.
pub fn crm_connector(config: CrmClientConfig) -> ApiConnector {
    Box::new(move |credentials: &TenantCredentials| -> Result<Arc<dyn CrmApi>> {
        let client = CrmClient::new(config.clone(), credentials.api_token.clone())?;
        Ok(Arc::new(client))
    })
}

/// Runs sync invocations.
pub struct Orchestrator {
    store: Arc<dyn DestinationStore>,
    syncer: EntitySyncer,
    connector: ApiConnector,
    env_credentials: Option<TenantCredentials>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DestinationStore>,
        settings: SyncSettings,
        connector: ApiConnector,
    ) -> Self {
        Self {
            syncer: EntitySyncer::new(store.clone(), settings),
            store,
            connector,
            env_credentials: None,
        }
    }

    /// Use these credentials instead of the integrations table.
    pub fn with_env_credentials(mut self, credentials: Option<TenantCredentials>) -> Self {
        self.env_credentials = credentials;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        self.syncer.settings()
    }

    pub fn store(&self) -> &Arc<dyn DestinationStore> {
        &self.store
    }

    /// Credentials to sync with.
    ///
    /// Environment credentials win when they match the requested tenant (or
    /// no tenant was requested). Otherwise the most recently updated active
    /// integration is used, restricted to `tenant` when given.
    ///
    /// # Errors
    /// - `Error::Config` if no active integration exists
    /// - `Error::NotFound` if the requested tenant has no active integration
    pub async fn resolve_credentials(&self, tenant: Option<&TenantId>) -> Result<TenantCredentials> {
        if let Some(credentials) = &self.env_credentials {
            if tenant.map_or(true, |t| t == &credentials.tenant_id) {
                return Ok(credentials.clone());
            }
        }

        let integrations = self.store.active_integrations().await?;
        let mut candidates = integrations
            .into_iter()
            .filter(|i| tenant.map_or(true, |t| &i.tenant_id == t));

        let Some(chosen) = candidates.next() else {
            return Err(match tenant {
                Some(t) => Error::NotFound(format!("No active CRM integration for tenant {}", t)),
                None => Error::Config("No active CRM integration found".to_string()),
            });
        };
        if candidates.next().is_some() {
            warn!(
                tenant = %chosen.tenant_id,
                "Multiple active CRM integrations found, using the most recently updated one"
            );
        }
        Ok(TenantCredentials {
            tenant_id: chosen.tenant_id,
            api_token: chosen.api_token,
        })
    }

    /// Run one invocation.
    ///
    /// # Errors
    /// Only setup failures (credentials, client construction) are returned;
    /// entity failures are reported in the result.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationReport> {
        let id = Uuid::new_v4();
        self.run_invocation(request)
            .instrument(info_span!("invocation", id = %id))
            .await
    }

    async fn run_invocation(&self, request: InvocationRequest) -> Result<InvocationReport> {
        let settings = self.syncer.settings();
        let budget = SyncBudget::starting_at(
            request.received_at.unwrap_or_else(Instant::now),
            settings.max_runtime,
            settings.budget_buffer,
        );
        let now = Utc::now();
        let force_full = request.full_sync || settings.force_full_sync;
        let entities = request.entities();

        let credentials = self.resolve_credentials(request.tenant.as_ref()).await?;
        let api = (self.connector)(&credentials)?;
        let ctx = SyncContext {
            api: api.as_ref(),
            tenant: &credentials.tenant_id,
            budget: &budget,
            now,
            force_full,
            initial_window_days: request.initial_window_days,
        };

        info!(
            tenant = %credentials.tenant_id,
            entities = ?entities,
            force_full,
            "Starting sync invocation"
        );

        let mut report = InvocationReport::new(force_full);
        let mut halted = false;
        for entity in entities {
            if halted {
                report.skip(entity);
                continue;
            }
            if budget.should_stop(first_step_estimate(entity)) {
                info!(
                    entity = %entity,
                    remaining = ?budget.remaining(),
                    "Not enough budget left, skipping"
                );
                report.skip(entity);
                continue;
            }

            match self.syncer.run(entity, &ctx).await {
                Ok(outcome) => report.record(entity, &outcome),
                Err(e) => {
                    error!(entity = %entity, "Sync failed: {}", e);
                    if e.is_store() {
                        halted = true;
                    }
                    report.fail(entity, &e);
                }
            }
        }

        let report = report.finish();
        info!(
            ok = report.ok,
            partial = report.partial,
            elapsed = ?budget.elapsed(),
            "Sync invocation finished"
        );
        Ok(report)
    }
}
