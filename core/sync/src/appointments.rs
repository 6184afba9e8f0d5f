//! Calendar fan-out for appointments.
//!
//! Appointments are listed per calendar within a time window. The window is
//! fixed when a pass starts and stored in the cursor, so a pass spanning
//! several invocations asks every calendar the same question. Calendars are
//! processed in id order; `position.start_after_id` holds the last finished
//! calendar.

use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tracing::{debug, info, warn};

use crmsync_common::{Entity, Result};
use crmsync_crm::TimeWindow;
use crmsync_storage::Table;

use crate::budget::StepEstimator;
use crate::cursor::{PassPolicy, PassState, Position};
use crate::engine::{EntityOutcome, EntitySyncer, SyncContext};
use crate::mapping;
use crate::state::SyncState;

/// Calendar ids of a listing, sorted and deduplicated. Entries without an id
/// are dropped.
fn calendar_ids(calendars: &[serde_json::Value]) -> Vec<String> {
    let mut ids: Vec<String> = calendars
        .iter()
        .filter_map(|c| mapping::record_id(c).ok())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

impl EntitySyncer {
    fn event_window(
        &self,
        state: &SyncState,
        ctx: &SyncContext<'_>,
        policy: &PassPolicy,
    ) -> TimeWindow {
        let lookback = ChronoDuration::days(self.settings.appointments_lookback_days);
        let lookahead = ChronoDuration::days(self.settings.appointments_lookahead_days);

        let start = match state.cursor.pass {
            PassState::InitialWindow { .. } => {
                ctx.now - policy.initial_window.unwrap_or(lookback)
            }
            PassState::Incremental { .. } => state.last_synced_at.unwrap_or(ctx.now) - lookback,
            PassState::Full { .. } | PassState::Idle => ctx.now - lookback,
        };
        TimeWindow {
            start_ms: start.timestamp_millis(),
            end_ms: (ctx.now + lookahead).timestamp_millis(),
        }
    }

    pub(crate) async fn sync_appointments(&self, ctx: &SyncContext<'_>) -> Result<EntityOutcome> {
        let policy = self.policy(ctx, None);
        let (mut state, plan) = self.start_pass(Entity::Appointments, ctx, &policy).await?;
        if plan.is_fresh() || state.cursor.window.is_none() {
            if plan.is_fresh() {
                state.cursor.position = Position::default();
            }
            state.cursor.window = Some(self.event_window(&state, ctx, &policy));
            self.states.save(&mut state, chrono::Utc::now()).await?;
        }

        let calendars = calendar_ids(&ctx.api.list_calendars(ctx.tenant).await?);
        if calendars.is_empty() {
            // Close the pass but keep stored rows.
            warn!(tenant = %ctx.tenant, "No calendars found, skipping appointments");
            let _ = state.cursor.complete();
            self.states.save(&mut state, chrono::Utc::now()).await?;
            return Ok(EntityOutcome {
                completed: true,
                ..Default::default()
            });
        }
        let window = match state.cursor.window {
            Some(window) => window,
            None => self.event_window(&state, ctx, &policy),
        };

        let synced_at = state.cursor.synced_at(ctx.now);
        let mut estimator = StepEstimator::new(Duration::ZERO);
        let mut outcome = EntityOutcome::default();
        let done_through = state.cursor.position.start_after_id.clone();

        for calendar_id in calendars
            .iter()
            .filter(|id| done_through.as_deref().map_or(true, |done| id.as_str() > done))
        {
            if ctx.budget.should_stop(estimator.estimate()) {
                info!(
                    tenant = %ctx.tenant,
                    next_calendar = %calendar_id,
                    records = outcome.records,
                    "Time budget reached, pausing appointments"
                );
                return Ok(outcome);
            }

            estimator.start();
            let events = ctx
                .api
                .list_calendar_events(ctx.tenant, calendar_id, &window)
                .await?;
            let rows: Vec<_> = events
                .iter()
                .filter_map(|raw| {
                    mapping::map_appointment(raw, ctx.tenant, calendar_id, synced_at)
                        .map_err(|e| warn!(calendar = %calendar_id, "Skipping event: {}", e))
                        .ok()
                })
                .collect();
            if !rows.is_empty() {
                outcome.records += self.writer.upsert_page(Table::Appointments, &rows).await?;
            }

            state.cursor.position.start_after_id = Some(calendar_id.clone());
            self.states.save(&mut state, chrono::Utc::now()).await?;
            estimator.finish();
            debug!(calendar = %calendar_id, events = events.len(), "Calendar synced");
        }

        outcome.completed = true;
        if let Some(done) = state.cursor.complete() {
            outcome.pruned = self
                .writer
                .prune(Table::Appointments, ctx.tenant, &done)
                .await?;
        }
        self.states.save(&mut state, chrono::Utc::now()).await?;

        info!(
            tenant = %ctx.tenant,
            calendars = calendars.len(),
            records = outcome.records,
            pruned = outcome.pruned,
            "Appointments sync complete"
        );
        Ok(outcome)
    }
}
