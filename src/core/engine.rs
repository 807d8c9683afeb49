//! Queue/allocation engine.
//!
//! `QueueManager` owns the store behind a single `parking_lot::RwLock`. Every
//! mutation of resource records or ledger entries happens while the write lock
//! is held, and no `.await` occurs while any guard is alive. Lock acquisition
//! is bounded by [`EngineLimits::lock_timeout`]; a caller that cannot get the
//! lock in time receives [`QrmError::StoreUnavailable`]. The async
//! [`QrmIfc`] entry points run the locked section on tokio's blocking pool.
//!
//! Multi-record transitions (grant, cancel, force release) are written as one
//! [`WriteBatch`], so a store failure never leaves a resource released while
//! its ledger entry still lists it, or allocated to an unregistered token.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::ledger::{pending_in_order, LedgerEntry};
use crate::core::store::{KvStore, RecordStore, WriteBatch};
use crate::core::{
    build_audit_event, AuditSink, QrmError, RequestStatus, Resource, ResourceSpec,
    ResourcesRequest, ResourcesRequestResponse, ServerStatus, TokenGenerator,
};
use crate::util::clock::now_ms;

/// The broker contract consumed by the transport adapter.
///
/// Implemented by [`QueueManager`] and by test doubles.
#[async_trait]
pub trait QrmIfc: Send + Sync {
    /// Register a request, assign its token and try to grant it immediately.
    async fn new_request(
        &self,
        request: ResourcesRequest,
    ) -> Result<ResourcesRequestResponse, QrmError>;

    /// Cancel a request and release what it holds. Unknown or finished tokens are a no-op.
    async fn cancel_request(&self, token: &str) -> Result<(), QrmError>;

    /// Whether the token currently holds resources.
    async fn is_request_active(&self, token: &str) -> Result<bool, QrmError>;

    /// Renewed token derived from `token`.
    async fn get_new_token(&self, token: &str) -> String;

    /// Current projection of the request.
    async fn get_filled_request(&self, token: &str)
        -> Result<ResourcesRequestResponse, QrmError>;

    /// Broker status reported by the liveness probe.
    async fn broker_status(&self) -> Result<ServerStatus, QrmError> {
        Ok(ServerStatus::Active)
    }
}

/// Configuration values for engine behaviour.
#[derive(Debug, Clone)]
pub struct EngineLimits {
    /// Upper bound on waiting for the broker lock.
    pub lock_timeout: Duration,
    /// How long terminal ledger entries are kept. `None` keeps them forever.
    pub retention: Option<Duration>,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            retention: None,
        }
    }
}

/// The queue/allocation engine.
pub struct QueueManager<S> {
    state: Arc<RwLock<S>>,
    tokens: TokenGenerator,
    limits: EngineLimits,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
}

impl<S> Clone for QueueManager<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            tokens: self.tokens,
            limits: self.limits.clone(),
            audit: self.audit.clone(),
        }
    }
}

/// Reject specs that can never be valid regardless of pool contents.
fn validate_shape(specs: &[ResourceSpec]) -> Result<(), QrmError> {
    if specs.is_empty() {
        return Err(QrmError::InvalidRequest(
            "requested_resources must not be empty".into(),
        ));
    }
    let mut names = HashSet::new();
    for spec in specs {
        match spec {
            ResourceSpec::ByType {
                resource_type,
                count,
            } => {
                if *count == 0 {
                    return Err(QrmError::InvalidRequest(format!(
                        "count for type `{resource_type}` must be greater than 0"
                    )));
                }
            }
            ResourceSpec::ByName { name } => {
                if !names.insert(name.as_str()) {
                    return Err(QrmError::InvalidRequest(format!(
                        "resource `{name}` requested more than once"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Every requested name and type must exist somewhere in the pool, free or not.
pub(crate) fn validate_against_pool(
    pool: &[Resource],
    specs: &[ResourceSpec],
) -> Result<(), QrmError> {
    for spec in specs {
        match spec {
            ResourceSpec::ByName { name } => {
                if !pool.iter().any(|r| r.name == *name) {
                    return Err(QrmError::InvalidRequest(format!(
                        "no resource named `{name}` in the pool"
                    )));
                }
            }
            ResourceSpec::ByType { resource_type, .. } => {
                if !pool.iter().any(|r| r.resource_type == *resource_type) {
                    return Err(QrmError::InvalidRequest(format!(
                        "no resource of type `{resource_type}` in the pool"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// All-or-nothing selection over free resources in pool order.
///
/// Named specs are reserved before typed ones so a typed spec cannot take a
/// resource that a later named spec needs. The result lists names in spec order.
pub(crate) fn select(pool: &[Resource], specs: &[ResourceSpec]) -> Option<Vec<String>> {
    let mut taken: HashSet<&str> = HashSet::new();
    let mut picks: Vec<Vec<&str>> = vec![Vec::new(); specs.len()];

    for (slot, spec) in specs.iter().enumerate() {
        if let ResourceSpec::ByName { name } = spec {
            let found = pool.iter().find(|r| r.name == *name && r.is_free())?;
            if !taken.insert(found.name.as_str()) {
                return None;
            }
            picks[slot].push(found.name.as_str());
        }
    }

    for (slot, spec) in specs.iter().enumerate() {
        if let ResourceSpec::ByType {
            resource_type,
            count,
        } = spec
        {
            let chosen: Vec<&str> = pool
                .iter()
                .filter(|r| {
                    r.resource_type == *resource_type
                        && r.is_free()
                        && !taken.contains(r.name.as_str())
                })
                .take(*count)
                .map(|r| r.name.as_str())
                .collect();
            if chosen.len() < *count {
                return None;
            }
            taken.extend(chosen.iter().copied());
            picks[slot] = chosen;
        }
    }

    Some(
        picks
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect(),
    )
}

impl<S> QueueManager<S>
where
    S: KvStore + 'static,
{
    /// Create an engine over `store`.
    pub fn new(store: S, limits: EngineLimits) -> Self {
        Self {
            state: Arc::new(RwLock::new(store)),
            tokens: TokenGenerator::new(),
            limits,
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    /// Engine limits in effect.
    pub const fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, S>, QrmError> {
        self.state
            .try_write_for(self.limits.lock_timeout)
            .ok_or_else(|| {
                tracing::warn!(timeout = ?self.limits.lock_timeout, "broker write lock timed out");
                QrmError::StoreUnavailable(format!(
                    "broker lock not acquired within {:?}",
                    self.limits.lock_timeout
                ))
            })
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, S>, QrmError> {
        self.state
            .try_read_for(self.limits.lock_timeout)
            .ok_or_else(|| {
                tracing::warn!(timeout = ?self.limits.lock_timeout, "broker read lock timed out");
                QrmError::StoreUnavailable(format!(
                    "broker lock not acquired within {:?}",
                    self.limits.lock_timeout
                ))
            })
    }

    /// Record an audit event (sync operation with parking_lot mutex).
    pub(crate) fn record_audit(
        &self,
        subject: &str,
        actor: &str,
        action: &str,
        payload: Option<String>,
    ) {
        if let Some(audit_sink) = &self.audit {
            let mut sink = audit_sink.lock();
            sink.record(build_audit_event(subject, actor, action, payload));
        }
    }

    /// Run a re-match pass over every pending request.
    ///
    /// Returns how many requests became active.
    pub fn rematch(&self) -> Result<usize, QrmError> {
        let mut store = self.write()?;
        self.rematch_locked(&mut *store)
    }

    pub(crate) fn rematch_locked(&self, store: &mut S) -> Result<usize, QrmError> {
        if store.server_status()? == ServerStatus::Disabled {
            tracing::debug!("broker disabled, skipping re-match");
            return Ok(0);
        }
        let mut pool = store.resources()?;
        let now = now_ms();
        let mut activated = 0;
        for mut entry in pending_in_order(&*store)? {
            if !pool.iter().any(Resource::is_free) {
                break;
            }
            match self.try_match_locked(store, &mut pool, &mut entry, now) {
                Ok(true) => activated += 1,
                Ok(false) => {}
                Err(err @ QrmError::ConflictDuringMatch(_)) => {
                    tracing::error!(token = %entry.token(), error = %err, "re-match conflict, request left pending");
                }
                Err(err) => return Err(err),
            }
        }
        if activated > 0 {
            tracing::info!(activated, "re-match pass granted requests");
        }
        Ok(activated)
    }

    /// Try to grant `entry` from `pool`; on success both the store and `pool` are updated.
    pub(crate) fn try_match_locked(
        &self,
        store: &mut S,
        pool: &mut [Resource],
        entry: &mut LedgerEntry,
        now: u64,
    ) -> Result<bool, QrmError> {
        let Some(picked) = select(pool, &entry.request.requested_resources) else {
            tracing::debug!(token = %entry.token(), "no match yet, request stays pending");
            return Ok(false);
        };
        self.commit_locked(store, pool, entry, picked, now)?;
        tracing::info!(
            token = %entry.token(),
            requestor = %entry.request.requestor,
            resources = ?entry.assigned(),
            "request active"
        );
        self.record_audit(
            entry.token(),
            &entry.request.requestor,
            "activate",
            Some(entry.assigned().join(",")),
        );
        Ok(true)
    }

    /// Allocate `picked` to `entry` and activate it in one batch.
    ///
    /// `entry` and `pool` change only once the batch is durable.
    fn commit_locked(
        &self,
        store: &mut S,
        pool: &mut [Resource],
        entry: &mut LedgerEntry,
        picked: Vec<String>,
        now: u64,
    ) -> Result<(), QrmError> {
        let mut batch = WriteBatch::new();
        let mut records = Vec::with_capacity(picked.len());
        for name in &picked {
            match store.resource(name)? {
                Some(mut res) if res.is_free() => {
                    res.allocate(entry.token());
                    batch.put_resource(&res)?;
                    records.push(res);
                }
                Some(res) => {
                    return Err(QrmError::ConflictDuringMatch(format!(
                        "resource `{name}` is {} while matching {}",
                        res.status,
                        entry.token()
                    )))
                }
                None => {
                    return Err(QrmError::ConflictDuringMatch(format!(
                        "resource `{name}` vanished while matching {}",
                        entry.token()
                    )))
                }
            }
        }
        let mut activated = entry.clone();
        activated.activate(picked, now);
        batch.put_entry(&activated)?;
        store.apply(batch)?;

        *entry = activated;
        for res in records {
            if let Some(slot) = pool.iter_mut().find(|p| p.name == res.name) {
                *slot = res;
            }
        }
        Ok(())
    }

    /// Stage the release of every resource `entry` still holds; returns how many.
    pub(crate) fn stage_release(
        store: &S,
        entry: &LedgerEntry,
        batch: &mut WriteBatch,
    ) -> Result<usize, QrmError> {
        let mut released = 0;
        for name in entry.assigned() {
            if let Some(mut res) = store.resource(name)? {
                if res.is_held_by(entry.token()) {
                    res.release();
                    batch.put_resource(&res)?;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    /// Release what `entry` holds and move it to the terminal `status` atomically.
    pub(crate) fn terminate_locked(
        store: &mut S,
        entry: &mut LedgerEntry,
        status: RequestStatus,
        now: u64,
    ) -> Result<usize, QrmError> {
        let mut batch = WriteBatch::new();
        let released = Self::stage_release(store, entry, &mut batch)?;
        let mut terminated = entry.clone();
        terminated.terminate(status, now);
        batch.put_entry(&terminated)?;
        store.apply(batch)?;
        *entry = terminated;
        Ok(released)
    }

    /// Re-match after a release; failures are logged because the release itself is committed.
    pub(crate) fn rematch_after_release(&self, store: &mut S) {
        if let Err(err) = self.rematch_locked(store) {
            tracing::warn!(error = %err, "re-match after release failed, maintenance will retry");
        }
    }
}

impl<S> QueueManager<S>
where
    S: KvStore + 'static,
{
    /// Run `op` on the blocking pool so lock waits never stall an async worker.
    pub async fn blocking<T, F>(&self, op: F) -> Result<T, QrmError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, QrmError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|err| QrmError::Internal(format!("engine task failed: {err}")))?
    }

    /// Register a request and try to grant it immediately.
    ///
    /// The pending entry is persisted only when no grant is possible, so a
    /// failed grant leaves nothing behind that the caller holds no token for.
    pub fn submit(
        &self,
        mut request: ResourcesRequest,
    ) -> Result<ResourcesRequestResponse, QrmError> {
        validate_shape(&request.requested_resources)?;
        request.token = self.tokens.generate();
        let now = now_ms();

        let mut store = self.write()?;
        let mut pool = store.resources()?;
        validate_against_pool(&pool, &request.requested_resources)?;

        let mut entry = LedgerEntry::new(request, now);
        self.record_audit(entry.token(), &entry.request.requestor, "submit", None);
        let granted = if store.server_status()? == ServerStatus::Active {
            self.try_match_locked(&mut *store, &mut pool, &mut entry, now)
                .inspect_err(|err| {
                    tracing::error!(
                        token = %entry.token(),
                        requestor = %entry.request.requestor,
                        error = %err,
                        "immediate match failed, request not registered"
                    );
                })?
        } else {
            tracing::debug!(token = %entry.token(), "broker disabled, request queued");
            false
        };
        if !granted {
            store.put_entry(&entry)?;
        }
        tracing::info!(
            token = %entry.token(),
            requestor = %entry.request.requestor,
            status = %entry.status(),
            "request registered"
        );
        Ok(entry.response)
    }

    /// Cancel a request and release what it holds.
    pub fn cancel(&self, token: &str) -> Result<(), QrmError> {
        let mut store = self.write()?;
        let Some(mut entry) = store.entry(token)? else {
            tracing::debug!(token, "cancel of unknown token ignored");
            return Ok(());
        };
        if entry.status().is_terminal() {
            tracing::debug!(token, status = %entry.status(), "cancel of finished request ignored");
            return Ok(());
        }

        let released =
            Self::terminate_locked(&mut *store, &mut entry, RequestStatus::Cancelled, now_ms())?;
        tracing::info!(token, released, "request cancelled");
        self.record_audit(token, &entry.request.requestor, "cancel", None);

        if released > 0 {
            self.rematch_after_release(&mut *store);
        }
        Ok(())
    }

    /// Whether the token currently holds resources.
    pub fn is_active(&self, token: &str) -> Result<bool, QrmError> {
        let store = self.read()?;
        Ok(store
            .entry(token)?
            .is_some_and(|e| e.status().holds_resources()))
    }

    /// Current projection of the request.
    pub fn projection(&self, token: &str) -> Result<ResourcesRequestResponse, QrmError> {
        let store = self.read()?;
        store
            .entry(token)?
            .map(|e| e.response)
            .ok_or_else(|| QrmError::TokenNotFound(token.to_string()))
    }

    /// Broker status flag.
    pub fn server_status(&self) -> Result<ServerStatus, QrmError> {
        let store = self.read()?;
        store.server_status()
    }
}

#[async_trait]
impl<S> QrmIfc for QueueManager<S>
where
    S: KvStore + 'static,
{
    async fn new_request(
        &self,
        request: ResourcesRequest,
    ) -> Result<ResourcesRequestResponse, QrmError> {
        self.blocking(move |qm| qm.submit(request)).await
    }

    async fn cancel_request(&self, token: &str) -> Result<(), QrmError> {
        let token = token.to_string();
        self.blocking(move |qm| qm.cancel(&token)).await
    }

    async fn is_request_active(&self, token: &str) -> Result<bool, QrmError> {
        let token = token.to_string();
        self.blocking(move |qm| qm.is_active(&token)).await
    }

    async fn get_new_token(&self, token: &str) -> String {
        self.tokens.derive(token)
    }

    async fn get_filled_request(
        &self,
        token: &str,
    ) -> Result<ResourcesRequestResponse, QrmError> {
        let token = token.to_string();
        self.blocking(move |qm| qm.projection(&token)).await
    }

    async fn broker_status(&self) -> Result<ServerStatus, QrmError> {
        self.blocking(Self::server_status).await
    }
}
