//! Per-entity sync state machine.
//!
//! One call to [`EntitySyncer::run`] advances one entity of one tenant as
//! far as the budget allows:
//!
//! 1. Load the persisted state and plan the pass (resume, fresh full,
//!    fresh incremental or initial window). A fresh pass is persisted
//!    before the first fetch.
//! 2. Fetch pages while the budget allows, upsert each page, advance the
//!    position and persist the state after every page.
//! 3. An empty or short page completes the pass. A completed full pass
//!    prunes rows it did not refresh.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crmsync_common::{Entity, Result, TenantId};
use crmsync_crm::{CrmApi, Page, PageQuery};
use crmsync_storage::{DestinationRecord, DestinationStore, Table};

use crate::budget::{StepEstimator, SyncBudget};
use crate::config::SyncSettings;
use crate::cursor::{plan_pass, PaginationMode, PassPlan, PassPolicy, Position};
use crate::mapping;
use crate::state::{SyncState, SyncStateStore};
use crate::writer::RecordWriter;

/// Everything one entity run needs from its invocation.
pub struct SyncContext<'a> {
    pub api: &'a dyn CrmApi,
    pub tenant: &'a TenantId,
    pub budget: &'a SyncBudget,
    /// Invocation start; stamps rows of non-full passes.
    pub now: DateTime<Utc>,
    pub force_full: bool,
    /// Per-request override of the configured initial window.
    pub initial_window_days: Option<i64>,
}

/// Result of one entity run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityOutcome {
    /// Rows written during this run.
    pub records: usize,
    /// The pass reached the end of the dataset.
    pub completed: bool,
    /// Rows deleted by pruning.
    pub pruned: u64,
}

impl EntityOutcome {
    pub fn paused(&self) -> bool {
        !self.completed
    }
}

/// Paginated CRM listings driven by the page loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PagedSource {
    Contacts,
    Opportunities,
    LostOpportunities,
}

impl PagedSource {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            PagedSource::Contacts => "contacts",
            PagedSource::Opportunities => "opportunities",
            PagedSource::LostOpportunities => "lost opportunities",
        }
    }

    async fn fetch(&self, api: &dyn CrmApi, tenant: &TenantId, query: &PageQuery) -> Result<Page> {
        match self {
            PagedSource::Contacts => api.list_contacts(tenant, query).await,
            PagedSource::Opportunities => api.search_opportunities(tenant, query, "all").await,
            PagedSource::LostOpportunities => api.search_opportunities(tenant, query, "lost").await,
        }
    }

    /// Position after `page`: the server-reported one when present, else
    /// derived from the last record.
    pub(crate) fn advance(&self, page: &Page, previous: &Position) -> Position {
        if let Some(next) = page.next.as_ref().filter(|n| !n.is_empty()) {
            let mut position = previous.clone();
            position.apply(next);
            return position;
        }
        match page.records.last() {
            Some(last) => match self {
                PagedSource::Contacts => mapping::contact_position(last, previous),
                _ => mapping::opportunity_position(last, previous),
            },
            None => previous.clone(),
        }
    }
}

/// Fetch one page at `position`, switching to id-only pagination when the
/// CRM rejects the timestamp cursor. The switch is recorded in `mode`.
pub(crate) async fn fetch_page(
    source: PagedSource,
    api: &dyn CrmApi,
    tenant: &TenantId,
    limit: u32,
    position: &Position,
    mode: &mut PaginationMode,
) -> Result<Page> {
    let query = PageQuery {
        limit,
        start_after: position.start_after,
        start_after_id: position.start_after_id.clone(),
    };
    let query = match mode {
        PaginationMode::Timestamp => query,
        PaginationMode::IdOnly => query.id_only(),
    };

    match source.fetch(api, tenant, &query).await {
        Err(e)
            if e.is_cursor_rejection()
                && *mode == PaginationMode::Timestamp
                && query.start_after.is_some() =>
        {
            warn!(
                source = source.label(),
                tenant = %tenant,
                "CRM rejected timestamp cursor, falling back to id-only pagination: {}",
                e
            );
            *mode = PaginationMode::IdOnly;
            source.fetch(api, tenant, &query.id_only()).await
        }
        other => other,
    }
}

/// Runs the sync state machine of every entity.
pub struct EntitySyncer {
    pub(crate) store: Arc<dyn DestinationStore>,
    pub(crate) states: SyncStateStore,
    pub(crate) writer: RecordWriter,
    pub(crate) settings: SyncSettings,
}

impl EntitySyncer {
    pub fn new(store: Arc<dyn DestinationStore>, settings: SyncSettings) -> Self {
        Self {
            states: SyncStateStore::new(store.clone()),
            writer: RecordWriter::new(
                store.clone(),
                settings.upsert_chunk_size,
                settings.prune_on_full_sync,
            ),
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Advance `entity` for the context's tenant.
    pub async fn run(&self, entity: Entity, ctx: &SyncContext<'_>) -> Result<EntityOutcome> {
        match entity {
            Entity::Contacts => self.sync_paged(PagedSource::Contacts, ctx).await,
            Entity::Opportunities => self.sync_paged(PagedSource::Opportunities, ctx).await,
            Entity::Appointments => self.sync_appointments(ctx).await,
            Entity::Lookup => self.sync_lookups(ctx).await,
        }
    }

    pub(crate) fn policy(&self, ctx: &SyncContext<'_>, refresh_days: Option<i64>) -> PassPolicy {
        PassPolicy {
            now: ctx.now,
            force_full: ctx.force_full || self.settings.force_full_sync,
            full_interval: self.settings.full_sync_interval,
            refresh_window: refresh_days.filter(|d| *d > 0).map(ChronoDuration::days),
            initial_window: ctx
                .initial_window_days
                .or(self.settings.initial_window_days)
                .filter(|d| *d > 0)
                .map(ChronoDuration::days),
        }
    }

    /// Load the state of `entity` and apply the pass decision to its cursor.
    /// Nothing is persisted yet.
    pub(crate) async fn start_pass(
        &self,
        entity: Entity,
        ctx: &SyncContext<'_>,
        policy: &PassPolicy,
    ) -> Result<(SyncState, PassPlan)> {
        let existing = self.states.load(entity, ctx.tenant).await?;
        let plan = plan_pass(existing.as_ref().map(|s| &s.cursor), policy);
        let mut state =
            existing.unwrap_or_else(|| SyncState::new(entity, ctx.tenant.clone()));
        state.cursor = state.cursor.begin(&plan, ctx.now);

        info!(
            entity = %entity,
            tenant = %ctx.tenant,
            pass = state.cursor.pass.label(),
            resumed = !plan.is_fresh(),
            "Starting sync"
        );
        Ok((state, plan))
    }

    fn map_rows(
        &self,
        source: PagedSource,
        records: &[serde_json::Value],
        tenant: &TenantId,
        synced_at: DateTime<Utc>,
    ) -> Vec<DestinationRecord> {
        records
            .iter()
            .filter_map(|raw| {
                let mapped = match source {
                    PagedSource::Contacts => mapping::map_contact(raw, tenant, synced_at),
                    _ => mapping::map_opportunity(raw, tenant, synced_at),
                };
                mapped
                    .map_err(|e| warn!(source = source.label(), "Skipping record: {}", e))
                    .ok()
            })
            .collect()
    }

    async fn sync_paged(&self, source: PagedSource, ctx: &SyncContext<'_>) -> Result<EntityOutcome> {
        let (entity, table, refresh_days) = match source {
            PagedSource::Contacts => (
                Entity::Contacts,
                Table::Contacts,
                self.settings.contacts_refresh_days,
            ),
            _ => (
                Entity::Opportunities,
                Table::Opportunities,
                self.settings.opportunities_refresh_days,
            ),
        };

        let policy = self.policy(ctx, Some(refresh_days));
        let (mut state, plan) = self.start_pass(entity, ctx, &policy).await?;
        if plan.is_fresh() {
            self.states.save(&mut state, Utc::now()).await?;
        }

        let synced_at = state.cursor.synced_at(ctx.now);
        let page_size = self.settings.page_size;
        // The orchestrator already checked the budget for the first page.
        let mut estimator = StepEstimator::new(Duration::ZERO);
        let mut outcome = EntityOutcome::default();
        let mut pages = 0usize;

        loop {
            if ctx.budget.should_stop(estimator.estimate()) {
                info!(
                    entity = %entity,
                    tenant = %ctx.tenant,
                    pages,
                    records = outcome.records,
                    "Time budget reached, pausing pass"
                );
                return Ok(outcome);
            }

            estimator.start();
            let page = fetch_page(
                source,
                ctx.api,
                ctx.tenant,
                page_size,
                &state.cursor.position,
                &mut state.cursor.mode,
            )
            .await?;
            if page.is_empty() {
                estimator.finish();
                break;
            }

            let rows = self.map_rows(source, &page.records, ctx.tenant, synced_at);
            outcome.records += self.writer.upsert_page(table, &rows).await?;
            state.cursor.position = source.advance(&page, &state.cursor.position);
            self.states.save(&mut state, Utc::now()).await?;
            pages += 1;
            estimator.finish();

            debug!(
                entity = %entity,
                page = pages,
                fetched = page.len(),
                total = outcome.records,
                "Page synced"
            );

            if page.len() < page_size as usize {
                break;
            }
        }

        outcome.completed = true;
        if let Some(done) = state.cursor.complete() {
            outcome.pruned = self.writer.prune(table, ctx.tenant, &done).await?;
        }
        self.states.save(&mut state, Utc::now()).await?;

        info!(
            entity = %entity,
            tenant = %ctx.tenant,
            records = outcome.records,
            pruned = outcome.pruned,
            "Sync pass complete"
        );
        Ok(outcome)
    }
}
