//! Sync settings read from the environment.

use std::time::Duration;

use crmsync_common::env::{self, parse_bool, parse_number};
use crmsync_common::Result;

/// Largest page the CRM list endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Largest number of rows written in one store call.
pub const MAX_UPSERT_CHUNK: usize = 1000;

/// Tunables of the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Records requested per page.
    pub page_size: u32,
    /// Rows per store upsert call.
    pub upsert_chunk_size: usize,
    /// Force a full pass on every invocation.
    pub force_full_sync: bool,
    /// Delete rows not refreshed by a completed full pass.
    pub prune_on_full_sync: bool,
    /// Time between interval-triggered full passes. `None` disables them.
    pub full_sync_interval: Option<chrono::Duration>,
    pub contacts_refresh_days: i64,
    pub opportunities_refresh_days: i64,
    pub appointments_lookback_days: i64,
    pub appointments_lookahead_days: i64,
    /// Scope a first-ever sync to the last N days instead of a full pass.
    pub initial_window_days: Option<i64>,
    pub max_runtime: Duration,
    pub budget_buffer: Duration,
    /// Interval of the periodic scheduler mode.
    pub sync_interval: Duration,
}

impl SyncSettings {
    /// Read the settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env::process_env)
    }

    /// Read the settings through `lookup`.
    ///
    /// # Errors
    /// - `Error::Config` if a numeric variable does not parse
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let page_size: u32 = parse_number(&lookup, "SYNC_BATCH_SIZE", MAX_PAGE_SIZE)?;
        let chunk: usize = parse_number(&lookup, "UPSERT_CHUNK_SIZE", 500)?;
        let interval_hours: i64 = parse_number(&lookup, "FULL_SYNC_INTERVAL_HOURS", 24)?;
        let initial_window: i64 = parse_number(&lookup, "INITIAL_WINDOW_DAYS", 0)?;
        let max_runtime: u64 = parse_number(&lookup, "SYNC_MAX_RUNTIME_SECS", 110)?;
        let buffer: u64 = parse_number(&lookup, "SYNC_BUDGET_BUFFER_SECS", 4)?;
        let sync_minutes: u64 = parse_number(&lookup, "SYNC_INTERVAL_MINUTES", 15)?;

        Ok(Self {
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            upsert_chunk_size: chunk.clamp(1, MAX_UPSERT_CHUNK),
            force_full_sync: parse_bool(&lookup, "FULL_SYNC", false),
            prune_on_full_sync: parse_bool(&lookup, "PRUNE_ON_FULL_SYNC", true),
            full_sync_interval: (interval_hours > 0).then(|| chrono::Duration::hours(interval_hours)),
            contacts_refresh_days: parse_number(&lookup, "CONTACTS_REFRESH_DAYS", 30i64)?.max(0),
            opportunities_refresh_days: parse_number(&lookup, "OPPORTUNITIES_REFRESH_DAYS", 30i64)?
                .max(0),
            appointments_lookback_days: parse_number(&lookup, "APPOINTMENTS_LOOKBACK_DAYS", 365i64)?
                .max(0),
            appointments_lookahead_days: parse_number(
                &lookup,
                "APPOINTMENTS_LOOKAHEAD_DAYS",
                365i64,
            )?
            .max(0),
            initial_window_days: (initial_window > 0).then_some(initial_window),
            max_runtime: Duration::from_secs(max_runtime),
            budget_buffer: Duration::from_secs(buffer),
            sync_interval: Duration::from_secs(sync_minutes.max(1) * 60),
        })
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            upsert_chunk_size: 500,
            force_full_sync: false,
            prune_on_full_sync: true,
            full_sync_interval: Some(chrono::Duration::hours(24)),
            contacts_refresh_days: 30,
            opportunities_refresh_days: 30,
            appointments_lookback_days: 365,
            appointments_lookahead_days: 365,
            initial_window_days: None,
            max_runtime: Duration::from_secs(110),
            budget_buffer: Duration::from_secs(4),
            sync_interval: Duration::from_secs(15 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_common::Error;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<SyncSettings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncSettings::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_match_empty_environment() {
        assert_eq!(settings(&[]).unwrap(), SyncSettings::default());
    }

    #[test]
    fn test_page_and_chunk_sizes_are_clamped() {
        let s = settings(&[("SYNC_BATCH_SIZE", "500"), ("UPSERT_CHUNK_SIZE", "0")]).unwrap();
        assert_eq!(s.page_size, 100);
        assert_eq!(s.upsert_chunk_size, 1);
    }

    #[test]
    fn test_zero_interval_disables_interval_full_sync() {
        let s = settings(&[("FULL_SYNC_INTERVAL_HOURS", "0")]).unwrap();
        assert_eq!(s.full_sync_interval, None);
    }

    #[test]
    fn test_flags_and_windows() {
        let s = settings(&[
            ("FULL_SYNC", "yes"),
            ("PRUNE_ON_FULL_SYNC", "false"),
            ("INITIAL_WINDOW_DAYS", "14"),
            ("SYNC_MAX_RUNTIME_SECS", "50"),
        ])
        .unwrap();
        assert!(s.force_full_sync);
        assert!(!s.prune_on_full_sync);
        assert_eq!(s.initial_window_days, Some(14));
        assert_eq!(s.max_runtime, Duration::from_secs(50));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        assert!(matches!(
            settings(&[("SYNC_BATCH_SIZE", "lots")]),
            Err(Error::Config(_))
        ));
    }
}
