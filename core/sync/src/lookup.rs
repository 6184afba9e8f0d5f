//! Reference data: pipeline names, stage names and lost reasons.
//!
//! Names come from two sources: the pipelines listing and a scan of lost
//! opportunities. Every lookup pass is a full pass and is pruned when it
//! completes. The lost-opportunity scan position is kept in the cursor, so a
//! paused pass continues the scan.

use chrono::SubsecRound;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

use crmsync_common::{Entity, Result};
use crmsync_storage::{LookupEntry, LookupKind};

use crate::budget::StepEstimator;
use crate::cursor::{PassState, Position};
use crate::engine::{fetch_page, EntityOutcome, EntitySyncer, PagedSource, SyncContext};
use crate::mapping;

/// Deduplicates lookup entries by `(kind, reference_id)`, keeping the
/// longest name seen.
#[derive(Debug, Default)]
pub struct LookupCollector {
    entries: BTreeMap<(LookupKind, String), LookupEntry>,
    dirty: BTreeSet<(LookupKind, String)>,
}

impl LookupCollector {
    /// Add an entry already stored; it is not written again unless improved.
    pub fn seed(&mut self, entry: LookupEntry) {
        self.entries
            .insert((entry.kind, entry.reference_id.clone()), entry);
    }

    /// Add an entry. Returns whether it was new or replaced a shorter name.
    pub fn insert(&mut self, entry: LookupEntry) -> bool {
        let key = (entry.kind, entry.reference_id.clone());
        let better = match self.entries.get(&key) {
            Some(existing) => entry.name.chars().count() > existing.name.chars().count(),
            None => true,
        };
        if better {
            self.entries.insert(key.clone(), entry);
            self.dirty.insert(key);
        }
        better
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = LookupEntry>) {
        for entry in entries {
            self.insert(entry);
        }
    }

    pub fn get(&self, kind: LookupKind, reference_id: &str) -> Option<&LookupEntry> {
        self.entries.get(&(kind, reference_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries added or improved since the last call.
    pub fn take_dirty(&mut self) -> Vec<LookupEntry> {
        std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|key| self.entries.get(&key).cloned())
            .collect()
    }
}

impl EntitySyncer {
    async fn flush_lookups(&self, collector: &mut LookupCollector) -> Result<usize> {
        let dirty = collector.take_dirty();
        if dirty.is_empty() {
            return Ok(0);
        }
        self.writer.upsert_lookups(&dirty).await
    }

    pub(crate) async fn sync_lookups(&self, ctx: &SyncContext<'_>) -> Result<EntityOutcome> {
        let mut policy = self.policy(ctx, None);
        policy.force_full = true;
        policy.initial_window = None;

        let (mut state, plan) = self.start_pass(Entity::Lookup, ctx, &policy).await?;
        if plan.is_fresh() {
            self.states.save(&mut state, chrono::Utc::now()).await?;
        }
        let synced_at = state.cursor.synced_at(ctx.now);

        // Entries written earlier in this pass. Stores may keep stamps at
        // microsecond precision only.
        let mut collector = LookupCollector::default();
        if let PassState::Full { started_at } = state.cursor.pass {
            let pass_floor = started_at.trunc_subsecs(6);
            for entry in self.store.list_lookups(ctx.tenant).await? {
                if entry.synced_at >= pass_floor {
                    collector.seed(entry);
                }
            }
        }

        let mut estimator = StepEstimator::new(Duration::ZERO);
        let mut outcome = EntityOutcome::default();

        if state.cursor.position == Position::default() {
            estimator.start();
            let pipelines = ctx.api.list_pipelines(ctx.tenant).await?;
            for pipeline in &pipelines {
                collector.extend(mapping::pipeline_lookups(pipeline, ctx.tenant, synced_at));
            }
            outcome.records += self.flush_lookups(&mut collector).await?;
            estimator.finish();
            debug!(pipelines = pipelines.len(), "Pipelines collected");
        }

        let source = PagedSource::LostOpportunities;
        let page_size = self.settings.page_size;
        loop {
            if ctx.budget.should_stop(estimator.estimate()) {
                info!(
                    tenant = %ctx.tenant,
                    entries = collector.len(),
                    "Time budget reached, pausing lookup collection"
                );
                self.states.save(&mut state, chrono::Utc::now()).await?;
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

            for raw in &page.records {
                if let Some(entry) = mapping::lost_reason_lookup(raw, ctx.tenant, synced_at) {
                    collector.insert(entry);
                }
            }
            outcome.records += self.flush_lookups(&mut collector).await?;
            state.cursor.position = source.advance(&page, &state.cursor.position);
            self.states.save(&mut state, chrono::Utc::now()).await?;
            estimator.finish();

            if page.len() < page_size as usize {
                break;
            }
        }

        outcome.completed = true;
        if let Some(done) = state.cursor.complete() {
            outcome.pruned = self.writer.prune_lookups(ctx.tenant, &done).await?;
        }
        self.states.save(&mut state, chrono::Utc::now()).await?;

        info!(
            tenant = %ctx.tenant,
            entries = collector.len(),
            pruned = outcome.pruned,
            "Lookup sync complete"
        );
        Ok(outcome)
    }
}
