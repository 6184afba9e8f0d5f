//! The seam between the sync engine and the external CRM.

use async_trait::async_trait;
use serde_json::Value;

use crmsync_common::{Result, TenantId};

use crate::models::{Page, PageQuery, TimeWindow};

/// Read-only view of the CRM endpoints the sync engine needs.
///
/// Implementations handle their own authentication and retries; errors
/// that reach the caller are final for the current attempt.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// One page of contacts, oldest first.
    async fn list_contacts(&self, tenant: &TenantId, query: &PageQuery) -> Result<Page>;

    /// One page of opportunities matching `status` (`all`, `lost`, ...), oldest first.
    async fn search_opportunities(
        &self,
        tenant: &TenantId,
        query: &PageQuery,
        status: &str,
    ) -> Result<Page>;

    /// All calendars of the tenant, drafts included.
    async fn list_calendars(&self, tenant: &TenantId) -> Result<Vec<Value>>;

    /// Events of one calendar within `window`.
    async fn list_calendar_events(
        &self,
        tenant: &TenantId,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Value>>;

    /// Opportunity pipelines with their stages.
    async fn list_pipelines(&self, tenant: &TenantId) -> Result<Vec<Value>>;
}
