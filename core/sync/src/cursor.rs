//! Typed sync cursor and pass planning.
//!
//! The cursor is persisted as JSON inside the sync-state row. It records
//! where pagination stopped and which logical pass (full, incremental or
//! initial window) is under way. A full pass carries its start stamp in the
//! variant itself, so "full in progress without a stamp" cannot be built.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crmsync_crm::{PageCursor, TimeWindow};

/// Pagination position: epoch-millisecond timestamp plus tie-breaking id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(default)]
    pub start_after: Option<i64>,
    #[serde(default)]
    pub start_after_id: Option<String>,
}

impl Position {
    /// Apply a position reported by the server. Missing parts keep their value.
    pub fn apply(&mut self, next: &PageCursor) {
        if next.start_after.is_some() {
            self.start_after = next.start_after;
        }
        if next.start_after_id.is_some() {
            self.start_after_id = next.start_after_id.clone();
        }
    }
}

/// How the position is sent to the CRM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    /// `startAfter` + `startAfterId`.
    #[default]
    Timestamp,
    /// `startAfterId` only; used after the CRM rejected a timestamp cursor.
    IdOnly,
}

/// Logical pass the cursor belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PassState {
    /// No pass in progress.
    #[default]
    Idle,
    /// Full refresh; every record written carries `started_at`.
    Full { started_at: DateTime<Utc> },
    /// Bounded refresh of recent records.
    Incremental { started_at: DateTime<Utc> },
    /// First-ever sync scoped to a recent window.
    InitialWindow { started_at: DateTime<Utc> },
}

impl PassState {
    pub fn in_progress(&self) -> bool {
        !matches!(self, PassState::Idle)
    }

    pub fn is_full(&self) -> bool {
        matches!(self, PassState::Full { .. })
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            PassState::Idle => None,
            PassState::Full { started_at }
            | PassState::Incremental { started_at }
            | PassState::InitialWindow { started_at } => Some(*started_at),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PassState::Idle => "idle",
            PassState::Full { .. } => "full",
            PassState::Incremental { .. } => "incremental",
            PassState::InitialWindow { .. } => "initial_window",
        }
    }
}

/// Proof that a full pass reached the end of the dataset.
///
/// Only [`Cursor::complete`] creates one, and pruning requires one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedFullPass {
    started_at: DateTime<Utc>,
}

impl CompletedFullPass {
    /// Rows stamped before this instant were not refreshed by the pass.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Persisted sync cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CursorRepr", into = "CursorRepr")]
pub struct Cursor {
    pub position: Position,
    pub mode: PaginationMode,
    pub pass: PassState,
    /// Event window fixed at pass start (appointments).
    pub window: Option<TimeWindow>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
}

/// Inputs to the pass decision.
#[derive(Debug, Clone)]
pub struct PassPolicy {
    pub now: DateTime<Utc>,
    /// Caller or environment forced a full pass.
    pub force_full: bool,
    pub full_interval: Option<Duration>,
    /// Incremental passes re-read this far back. `None` keeps the stored position.
    pub refresh_window: Option<Duration>,
    pub initial_window: Option<Duration>,
}

/// Outcome of [`plan_pass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassPlan {
    /// Continue the pass stored in the cursor.
    Resume,
    FreshFull,
    FreshIncremental { from: Position },
    FreshInitialWindow { from: Position },
}

impl PassPlan {
    pub fn is_fresh(&self) -> bool {
        !matches!(self, PassPlan::Resume)
    }
}

fn window_start(now: DateTime<Utc>, window: Duration) -> Position {
    Position {
        start_after: Some((now - window).timestamp_millis()),
        start_after_id: None,
    }
}

fn full_due(existing: Option<&Cursor>, policy: &PassPolicy) -> bool {
    if policy.force_full {
        return true;
    }
    match existing {
        None => policy.initial_window.is_none(),
        Some(cursor) => match (policy.full_interval, cursor.last_full_sync_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(interval), Some(last)) => policy.now - last >= interval,
        },
    }
}

/// Decide which pass this invocation runs.
///
/// `existing` is `None` when the entity was never synced for the tenant.
///
/// 1. A full pass in progress always resumes with its original stamp.
/// 2. An initial-window pass in progress resumes unless a full pass is forced.
/// 3. A due full pass starts fresh.
/// 4. An incremental pass in progress resumes.
/// 5. A first-ever sync with an initial window configured scopes to that window.
/// 6. Otherwise a fresh incremental pass starts, narrowed to the refresh window.
pub fn plan_pass(existing: Option<&Cursor>, policy: &PassPolicy) -> PassPlan {
    let pass = existing.map(|c| c.pass).unwrap_or_default();

    if pass.is_full() {
        return PassPlan::Resume;
    }
    if matches!(pass, PassState::InitialWindow { .. }) && !policy.force_full {
        return PassPlan::Resume;
    }
    if full_due(existing, policy) {
        return PassPlan::FreshFull;
    }
    if matches!(pass, PassState::Incremental { .. }) {
        return PassPlan::Resume;
    }

    match (existing, policy.initial_window) {
        (None, Some(window)) => PassPlan::FreshInitialWindow {
            from: window_start(policy.now, window),
        },
        _ => {
            let current = existing.map(|c| c.position.clone()).unwrap_or_default();
            let from = match policy.refresh_window {
                None => current,
                Some(window) => {
                    let refresh = window_start(policy.now, window);
                    match (current.start_after, refresh.start_after) {
                        (Some(at), Some(start)) if at <= start => current,
                        _ => refresh,
                    }
                }
            };
            PassPlan::FreshIncremental { from }
        }
    }
}

impl Cursor {
    /// Cursor for the pass `plan` describes. Fresh passes reset pagination
    /// mode and window; `last_full_sync_at` is kept.
    pub fn begin(&self, plan: &PassPlan, now: DateTime<Utc>) -> Cursor {
        let fresh = |position: Position, pass: PassState| Cursor {
            position,
            mode: PaginationMode::Timestamp,
            pass,
            window: None,
            last_full_sync_at: self.last_full_sync_at,
        };

        match plan {
            PassPlan::Resume => self.clone(),
            PassPlan::FreshFull => fresh(Position::default(), PassState::Full { started_at: now }),
            PassPlan::FreshIncremental { from } => {
                fresh(from.clone(), PassState::Incremental { started_at: now })
            }
            PassPlan::FreshInitialWindow { from } => {
                fresh(from.clone(), PassState::InitialWindow { started_at: now })
            }
        }
    }

    /// Stamp for rows written during this invocation: the pass start for
    /// full passes, the invocation time otherwise.
    pub fn synced_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.pass {
            PassState::Full { started_at } => started_at,
            _ => now,
        }
    }

    /// Close the pass after the dataset was exhausted.
    ///
    /// Full and initial-window passes set `last_full_sync_at`; only a full
    /// pass yields a [`CompletedFullPass`].
    pub fn complete(&mut self) -> Option<CompletedFullPass> {
        let pass = std::mem::take(&mut self.pass);
        match pass {
            PassState::Full { started_at } => {
                self.last_full_sync_at = Some(started_at);
                Some(CompletedFullPass { started_at })
            }
            PassState::InitialWindow { started_at } => {
                self.last_full_sync_at = Some(started_at);
                None
            }
            PassState::Incremental { .. } | PassState::Idle => None,
        }
    }
}

/// Wire shape of the cursor. Also accepts blobs written before passes were
/// typed (`fullSyncInProgress` / `fullSyncStartedAt`), and writes those
/// fields back for readers of the raw column.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorRepr {
    #[serde(default)]
    start_after: Option<i64>,
    #[serde(default)]
    start_after_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pagination: Option<PaginationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pass: Option<PassState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    window: Option<TimeWindow>,
    #[serde(default)]
    last_full_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    full_sync_in_progress: Option<bool>,
    #[serde(default)]
    full_sync_started_at: Option<DateTime<Utc>>,
}

impl From<CursorRepr> for Cursor {
    fn from(repr: CursorRepr) -> Self {
        let pass = match (repr.pass, repr.full_sync_in_progress, repr.full_sync_started_at) {
            (Some(pass), _, _) => pass,
            (None, Some(true), Some(started_at)) => PassState::Full { started_at },
            _ => PassState::Idle,
        };
        Cursor {
            position: Position {
                start_after: repr.start_after,
                start_after_id: repr.start_after_id,
            },
            mode: repr.pagination.unwrap_or_default(),
            pass,
            window: repr.window,
            last_full_sync_at: repr.last_full_sync_at,
        }
    }
}

impl From<Cursor> for CursorRepr {
    fn from(cursor: Cursor) -> Self {
        let full_started = match cursor.pass {
            PassState::Full { started_at } => Some(started_at),
            _ => None,
        };
        CursorRepr {
            start_after: cursor.position.start_after,
            start_after_id: cursor.position.start_after_id,
            pagination: Some(cursor.mode),
            pass: Some(cursor.pass),
            window: cursor.window,
            last_full_sync_at: cursor.last_full_sync_at,
            full_sync_in_progress: Some(full_started.is_some()),
            full_sync_started_at: full_started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn policy() -> PassPolicy {
        PassPolicy {
            now: now(),
            force_full: false,
            full_interval: Some(Duration::hours(24)),
            refresh_window: Some(Duration::days(30)),
            initial_window: None,
        }
    }

    fn idle_after_full(hours_ago: i64) -> Cursor {
        Cursor {
            position: Position {
                start_after: Some(now().timestamp_millis() - 1000),
                start_after_id: Some("c_9".to_string()),
            },
            last_full_sync_at: Some(now() - Duration::hours(hours_ago)),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_sync_is_full() {
        assert_eq!(plan_pass(None, &policy()), PassPlan::FreshFull);
    }

    #[test]
    fn test_first_sync_with_initial_window() {
        let mut p = policy();
        p.initial_window = Some(Duration::days(7));
        let plan = plan_pass(None, &p);
        assert_eq!(
            plan,
            PassPlan::FreshInitialWindow {
                from: Position {
                    start_after: Some((now() - Duration::days(7)).timestamp_millis()),
                    start_after_id: None,
                }
            }
        );
    }

    #[test]
    fn test_forced_full_wins_over_initial_window() {
        let mut p = policy();
        p.initial_window = Some(Duration::days(7));
        p.force_full = true;
        assert_eq!(plan_pass(None, &p), PassPlan::FreshFull);
    }

    #[test]
    fn test_full_in_progress_resumes_even_when_forced() {
        let started = now() - Duration::hours(2);
        let cursor = Cursor {
            pass: PassState::Full { started_at: started },
            ..Default::default()
        };
        let mut p = policy();
        p.force_full = true;

        assert_eq!(plan_pass(Some(&cursor), &p), PassPlan::Resume);
        let resumed = cursor.begin(&PassPlan::Resume, now());
        assert_eq!(resumed.pass, PassState::Full { started_at: started });
        assert_eq!(resumed.synced_at(now()), started);
    }

    #[test]
    fn test_interval_elapsed_starts_full() {
        assert_eq!(plan_pass(Some(&idle_after_full(25)), &policy()), PassPlan::FreshFull);
    }

    #[test]
    fn test_disabled_interval_never_triggers_full() {
        let mut p = policy();
        p.full_interval = None;
        let cursor = Cursor::default();
        assert!(matches!(
            plan_pass(Some(&cursor), &p),
            PassPlan::FreshIncremental { .. }
        ));
    }

    #[test]
    fn test_incremental_narrows_recent_cursor_to_refresh_window() {
        let plan = plan_pass(Some(&idle_after_full(1)), &policy());
        let refresh_start = (now() - Duration::days(30)).timestamp_millis();
        assert_eq!(
            plan,
            PassPlan::FreshIncremental {
                from: Position {
                    start_after: Some(refresh_start),
                    start_after_id: None,
                }
            }
        );
    }

    #[test]
    fn test_incremental_keeps_older_cursor() {
        let mut cursor = idle_after_full(1);
        let old = (now() - Duration::days(90)).timestamp_millis();
        cursor.position.start_after = Some(old);

        match plan_pass(Some(&cursor), &policy()) {
            PassPlan::FreshIncremental { from } => {
                assert_eq!(from.start_after, Some(old));
                assert_eq!(from.start_after_id.as_deref(), Some("c_9"));
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn test_no_refresh_window_keeps_position() {
        let mut p = policy();
        p.refresh_window = None;
        let cursor = idle_after_full(1);
        assert_eq!(
            plan_pass(Some(&cursor), &p),
            PassPlan::FreshIncremental {
                from: cursor.position.clone()
            }
        );
    }

    #[test]
    fn test_incremental_in_progress_resumes() {
        let mut cursor = idle_after_full(1);
        cursor.pass = PassState::Incremental {
            started_at: now() - Duration::minutes(15),
        };
        assert_eq!(plan_pass(Some(&cursor), &policy()), PassPlan::Resume);
    }

    #[test]
    fn test_due_full_replaces_incremental_in_progress() {
        let mut cursor = idle_after_full(30);
        cursor.pass = PassState::Incremental {
            started_at: now() - Duration::minutes(15),
        };
        assert_eq!(plan_pass(Some(&cursor), &policy()), PassPlan::FreshFull);
    }

    #[test]
    fn test_initial_window_in_progress_resumes_unless_forced() {
        let cursor = Cursor {
            pass: PassState::InitialWindow {
                started_at: now() - Duration::minutes(5),
            },
            ..Default::default()
        };
        assert_eq!(plan_pass(Some(&cursor), &policy()), PassPlan::Resume);

        let mut p = policy();
        p.force_full = true;
        assert_eq!(plan_pass(Some(&cursor), &p), PassPlan::FreshFull);
    }

    #[test]
    fn test_fresh_pass_resets_mode_and_window() {
        let cursor = Cursor {
            mode: PaginationMode::IdOnly,
            window: Some(TimeWindow {
                start_ms: 1,
                end_ms: 2,
            }),
            last_full_sync_at: Some(now() - Duration::days(2)),
            ..Default::default()
        };
        let begun = cursor.begin(&PassPlan::FreshFull, now());
        assert_eq!(begun.mode, PaginationMode::Timestamp);
        assert_eq!(begun.window, None);
        assert_eq!(begun.position, Position::default());
        assert_eq!(begun.last_full_sync_at, cursor.last_full_sync_at);
        assert_eq!(begun.pass, PassState::Full { started_at: now() });
    }

    #[test]
    fn test_complete_full_pass_yields_token() {
        let started = now() - Duration::minutes(3);
        let mut cursor = Cursor {
            pass: PassState::Full { started_at: started },
            ..Default::default()
        };
        let done = cursor.complete().unwrap();
        assert_eq!(done.started_at(), started);
        assert_eq!(cursor.pass, PassState::Idle);
        assert_eq!(cursor.last_full_sync_at, Some(started));
    }

    #[test]
    fn test_complete_initial_window_never_prunes() {
        let started = now();
        let mut cursor = Cursor {
            pass: PassState::InitialWindow { started_at: started },
            ..Default::default()
        };
        assert!(cursor.complete().is_none());
        assert_eq!(cursor.last_full_sync_at, Some(started));
    }

    #[test]
    fn test_complete_incremental_keeps_last_full() {
        let last_full = now() - Duration::hours(3);
        let mut cursor = Cursor {
            pass: PassState::Incremental { started_at: now() },
            last_full_sync_at: Some(last_full),
            ..Default::default()
        };
        assert!(cursor.complete().is_none());
        assert_eq!(cursor.last_full_sync_at, Some(last_full));
    }

    #[test]
    fn test_serialized_shape() {
        let started = now();
        let cursor = Cursor {
            position: Position {
                start_after: Some(42),
                start_after_id: Some("c_1".to_string()),
            },
            pass: PassState::Full { started_at: started },
            ..Default::default()
        };
        let value = serde_json::to_value(&cursor).unwrap();

        assert_eq!(value["startAfter"], json!(42));
        assert_eq!(value["startAfterId"], json!("c_1"));
        assert_eq!(value["pagination"], json!("timestamp"));
        assert_eq!(value["pass"]["kind"], json!("full"));
        assert!(value["pass"]["startedAt"].is_string());
        assert_eq!(value["fullSyncInProgress"], json!(true));

        let back: Cursor = serde_json::from_value(value).unwrap();
        assert_eq!(back, cursor);
    }

    #[test]
    fn test_legacy_blob_loads() {
        let legacy = json!({
            "startAfter": 1700000000000i64,
            "startAfterId": "c_77",
            "lastFullSyncAt": "2026-02-28T10:00:00.000Z"
        });
        let cursor: Cursor = serde_json::from_value(legacy).unwrap();
        assert_eq!(cursor.position.start_after, Some(1_700_000_000_000));
        assert_eq!(cursor.position.start_after_id.as_deref(), Some("c_77"));
        assert_eq!(cursor.pass, PassState::Idle);
        assert_eq!(
            cursor.last_full_sync_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 28, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_legacy_in_progress_flag() {
        let with_stamp = json!({
            "fullSyncInProgress": true,
            "fullSyncStartedAt": "2026-03-01T11:00:00Z"
        });
        let cursor: Cursor = serde_json::from_value(with_stamp).unwrap();
        assert!(cursor.pass.is_full());

        let without_stamp = json!({ "fullSyncInProgress": true });
        let cursor: Cursor = serde_json::from_value(without_stamp).unwrap();
        assert_eq!(cursor.pass, PassState::Idle);
    }
}
