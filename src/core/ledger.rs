//! Request ledger: the durable lifecycle record behind every token.

use serde::{Deserialize, Serialize};

use crate::core::store::RecordStore;
use crate::core::{QrmError, RequestStatus, ResourcesRequest, ResourcesRequestResponse};

/// Durable record of a request and its current projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The request as submitted, with the engine-assigned token.
    pub request: ResourcesRequest,
    /// The projection returned to clients.
    pub response: ResourcesRequestResponse,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: u64,
    /// Last transition timestamp in milliseconds since epoch.
    pub updated_at_ms: u64,
}

impl LedgerEntry {
    /// A pending entry for a request that already carries its token.
    pub fn new(request: ResourcesRequest, now_ms: u64) -> Self {
        let response = ResourcesRequestResponse::pending(request.token.clone());
        Self {
            request,
            response,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Token of this entry.
    pub fn token(&self) -> &str {
        &self.response.token
    }

    /// Current status.
    pub const fn status(&self) -> RequestStatus {
        self.response.status
    }

    /// Resources currently granted.
    pub fn assigned(&self) -> &[String] {
        &self.response.assigned_resources
    }

    /// pending -> active with the granted resources.
    pub fn activate(&mut self, assigned: Vec<String>, now_ms: u64) {
        self.response.status = RequestStatus::Active;
        self.response.assigned_resources = assigned;
        self.updated_at_ms = now_ms;
    }

    /// Move between `active` and `filled`; other statuses are left alone.
    pub fn set_filled(&mut self, filled: bool, now_ms: u64) {
        let next = if filled {
            RequestStatus::Filled
        } else {
            RequestStatus::Active
        };
        if self.status().holds_resources() && self.status() != next {
            self.response.status = next;
            self.updated_at_ms = now_ms;
        }
    }

    /// Enter a terminal status, dropping the resource list.
    pub fn terminate(&mut self, status: RequestStatus, now_ms: u64) {
        debug_assert!(status.is_terminal());
        self.response.status = status;
        self.response.assigned_resources.clear();
        self.updated_at_ms = now_ms;
    }

    /// Whether a terminal entry has outlived `retention_ms`.
    pub const fn is_expired(&self, now_ms: u64, retention_ms: u64) -> bool {
        self.status().is_terminal() && now_ms.saturating_sub(self.updated_at_ms) >= retention_ms
    }
}

/// Pending entries in matching order: oldest first, ties broken by token.
pub fn pending_in_order<S: RecordStore + ?Sized>(store: &S) -> Result<Vec<LedgerEntry>, QrmError> {
    let mut pending: Vec<LedgerEntry> = store
        .entries()?
        .into_iter()
        .filter(|e| e.status() == RequestStatus::Pending)
        .collect();
    pending.sort_by(|a, b| {
        a.created_at_ms
            .cmp(&b.created_at_ms)
            .then_with(|| a.token().cmp(b.token()))
    });
    Ok(pending)
}

/// Delete terminal entries older than `retention_ms`; returns how many were removed.
pub fn evict_expired<S: RecordStore + ?Sized>(
    store: &mut S,
    now_ms: u64,
    retention_ms: u64,
) -> Result<usize, QrmError> {
    let expired: Vec<String> = store
        .entries()?
        .into_iter()
        .filter(|e| e.is_expired(now_ms, retention_ms))
        .map(|e| e.token().to_string())
        .collect();
    for token in &expired {
        store.remove_entry(token)?;
    }
    Ok(expired.len())
}
