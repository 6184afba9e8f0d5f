//! crmsync Sync Engine
//!
//! This module provides incremental, resumable CRM synchronization:
//! - A soft time budget checked before every unit of work
//! - Typed per-entity cursors persisted after every written page
//! - Full passes that prune stale rows only once they complete
//! - Calendar fan-out for appointments and lookup collection
//! - An orchestrator running one invocation across entities
//! - A scheduler serializing invocations for a process

pub mod appointments;
pub mod auth;
pub mod budget;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod lookup;
pub mod mapping;
pub mod orchestrator;
pub mod scheduler;
pub mod state;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-export main types
pub use auth::SharedSecret;
pub use budget::{StepEstimator, SyncBudget};
pub use config::SyncSettings;
pub use cursor::{
    plan_pass, CompletedFullPass, Cursor, PaginationMode, PassPlan, PassPolicy, PassState,
    Position,
};
pub use engine::{EntityOutcome, EntitySyncer, SyncContext};
pub use lookup::LookupCollector;
pub use orchestrator::{
    crm_connector, first_step_estimate, ApiConnector, InvocationReport, InvocationRequest,
    Orchestrator, TenantCredentials,
};
pub use scheduler::{SyncMode, SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use state::{SyncState, SyncStateStore};
pub use writer::RecordWriter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _settings = SyncSettings::default();
        let _secret = SharedSecret::default();
        let _collector = LookupCollector::default();
        let _request = InvocationRequest::default();
        assert_eq!(Cursor::default().pass, PassState::Idle);
    }
}
