//! Management plane operations.
//!
//! These bypass the queue but run under the same write lock as matching, so an
//! operator action can never interleave with an allocation in progress.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::engine::validate_against_pool;
use crate::core::ledger::{evict_expired, pending_in_order};
use crate::core::store::{KvStore, RecordStore, WriteBatch};
use crate::core::{QrmError, QueueManager, RequestStatus, Resource, ResourceStatus, ServerStatus};
use crate::util::clock::now_ms;

const OPERATOR: &str = "management";

/// Point-in-time view of the pool for `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    /// Broker status flag.
    pub server_status: ServerStatus,
    /// Every resource in insertion order.
    pub resources: Vec<Resource>,
    /// Requests still waiting for resources.
    pub pending_requests: usize,
}

/// What startup reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Allocated resources that had no live holder and were freed.
    pub freed_resources: usize,
    /// Live requests that lost a resource and were moved to `error`.
    pub failed_requests: usize,
    /// Pending requests granted by the closing re-match pass.
    pub activated: usize,
}

impl<S> QueueManager<S>
where
    S: KvStore + 'static,
{
    /// Register resources. Existing names are left untouched; returns how many were added.
    pub fn add_resources(&self, resources: Vec<Resource>) -> Result<usize, QrmError> {
        for res in &resources {
            if res.name.is_empty() || res.resource_type.is_empty() {
                return Err(QrmError::InvalidRequest(
                    "resources need a non-empty name and type".into(),
                ));
            }
            if res.status == ResourceStatus::Allocated {
                return Err(QrmError::InvalidRequest(format!(
                    "resource `{}` cannot be added as allocated",
                    res.name
                )));
            }
        }

        let mut store = self.write()?;
        let mut added = 0;
        for mut res in resources {
            if store.resource(&res.name)?.is_some() {
                tracing::warn!(resource = %res.name, "resource already registered, skipping");
                continue;
            }
            res.token = None;
            res.assigned_job = None;
            store.put_resource(&res)?;
            tracing::info!(resource = %res.name, kind = %res.resource_type, status = %res.status, "resource added");
            self.record_audit(&res.name, OPERATOR, "add", Some(res.resource_type.clone()));
            added += 1;
        }
        if added > 0 {
            self.rematch_after_release(&mut *store);
        }
        Ok(added)
    }

    /// Remove resources by name. Unknown names are skipped.
    ///
    /// Without `force`, any allocated target fails the whole call with
    /// [`QrmError::ResourceBusy`] before anything is removed.
    pub fn remove_resources(&self, names: &[String], force: bool) -> Result<usize, QrmError> {
        let mut store = self.write()?;
        if !force {
            for name in names {
                if let Some(res) = store.resource(name)? {
                    if res.status == ResourceStatus::Allocated {
                        return Err(QrmError::ResourceBusy(format!(
                            "resource `{name}` is allocated; force release first"
                        )));
                    }
                }
            }
        }

        let now = now_ms();
        let mut removed = 0;
        let mut forced = false;
        for name in names {
            let Some(res) = store.resource(name)? else {
                tracing::warn!(resource = %name, "remove of unknown resource skipped");
                continue;
            };
            if res.status == ResourceStatus::Allocated {
                self.force_release_locked(&mut *store, name, now)?;
                forced = true;
            }
            store.remove_resource(name)?;
            tracing::info!(resource = %name, "resource removed");
            self.record_audit(name, OPERATOR, "remove", None);
            removed += 1;
        }
        if removed > 0 {
            self.fail_unsatisfiable_locked(&mut *store, now)?;
        }
        if forced {
            self.rematch_after_release(&mut *store);
        }
        Ok(removed)
    }

    /// Fail pending requests that name a resource or type no longer in the pool.
    fn fail_unsatisfiable_locked(&self, store: &mut S, now: u64) -> Result<usize, QrmError> {
        let pool = store.resources()?;
        let mut failed = 0;
        for mut entry in pending_in_order(&*store)? {
            let Err(reason) = validate_against_pool(&pool, &entry.request.requested_resources)
            else {
                continue;
            };
            entry.terminate(RequestStatus::Error, now);
            store.put_entry(&entry)?;
            tracing::warn!(
                token = %entry.token(),
                reason = %reason,
                "pending request can no longer be satisfied"
            );
            self.record_audit(
                entry.token(),
                &entry.request.requestor,
                "fail",
                Some(reason.to_string()),
            );
            failed += 1;
        }
        Ok(failed)
    }

    /// Free an allocated resource regardless of its holder.
    ///
    /// The holding request moves to `error` and its other resources are freed.
    /// Returns the holder's token, if any.
    pub fn force_release(&self, name: &str) -> Result<Option<String>, QrmError> {
        let mut store = self.write()?;
        let holder = self.force_release_locked(&mut *store, name, now_ms())?;
        if holder.is_some() {
            self.rematch_after_release(&mut *store);
        }
        Ok(holder)
    }

    /// Free `name` and fail its holder in one batch.
    fn force_release_locked(
        &self,
        store: &mut S,
        name: &str,
        now: u64,
    ) -> Result<Option<String>, QrmError> {
        let mut res = store
            .resource(name)?
            .ok_or_else(|| QrmError::ResourceNotFound(name.to_string()))?;
        if res.status != ResourceStatus::Allocated {
            return Ok(None);
        }
        let holder = res.token.clone();
        let mut batch = WriteBatch::new();
        let mut failed = None;
        if let Some(token) = holder.as_deref() {
            if let Some(entry) = store.entry(token)? {
                if entry.status().holds_resources() {
                    Self::stage_release(store, &entry, &mut batch)?;
                    let mut terminated = entry;
                    terminated.terminate(RequestStatus::Error, now);
                    batch.put_entry(&terminated)?;
                    failed = Some(terminated);
                }
            }
        }
        res.release();
        batch.put_resource(&res)?;
        store.apply(batch)?;

        tracing::warn!(resource = %name, holder = ?holder, "resource force-released");
        self.record_audit(name, OPERATOR, "release", holder.clone());
        if let Some(entry) = failed {
            tracing::warn!(token = %entry.token(), resource = %name, "request failed after force release");
            self.record_audit(
                entry.token(),
                &entry.request.requestor,
                "fail",
                Some(format!("resource {name} force-released")),
            );
        }
        Ok(holder)
    }

    /// Write the broker status flag. Re-enabling triggers a re-match pass.
    pub fn set_server_status(&self, status: ServerStatus) -> Result<(), QrmError> {
        let mut store = self.write()?;
        store.set_server_status(status)?;
        tracing::info!(status = status.as_str(), "broker status changed");
        self.record_audit("broker", OPERATOR, "set_server_status", Some(status.as_str().into()));
        if status == ServerStatus::Active {
            self.rematch_after_release(&mut *store);
        }
        Ok(())
    }

    /// Set a resource's status. Changing an allocated resource requires `force`.
    pub fn set_resource_status(
        &self,
        name: &str,
        status: ResourceStatus,
        force: bool,
    ) -> Result<(), QrmError> {
        if status == ResourceStatus::Allocated {
            return Err(QrmError::InvalidRequest(
                "resources become allocated only through matching".into(),
            ));
        }
        let mut store = self.write()?;
        let current = store
            .resource(name)?
            .ok_or_else(|| QrmError::ResourceNotFound(name.to_string()))?;
        if current.status == ResourceStatus::Allocated {
            if !force {
                return Err(QrmError::ResourceBusy(format!(
                    "resource `{name}` is allocated; force release first"
                )));
            }
            self.force_release_locked(&mut *store, name, now_ms())?;
        }

        let mut res = store
            .resource(name)?
            .ok_or_else(|| QrmError::ResourceNotFound(name.to_string()))?;
        res.status = status;
        store.put_resource(&res)?;
        tracing::info!(resource = %name, status = %status, "resource status changed");
        self.record_audit(name, OPERATOR, "set_resource_status", Some(status.to_string()));

        if status == ResourceStatus::Free || current.status == ResourceStatus::Allocated {
            self.rematch_after_release(&mut *store);
        }
        Ok(())
    }

    /// Attach a job to an allocated resource.
    pub fn add_job_to_resource(&self, name: &str, job: &str) -> Result<(), QrmError> {
        let mut store = self.write()?;
        let mut res = store
            .resource(name)?
            .ok_or_else(|| QrmError::ResourceNotFound(name.to_string()))?;
        if res.status != ResourceStatus::Allocated {
            return Err(QrmError::InvalidRequest(format!(
                "resource `{name}` is {}; jobs attach only to allocated resources",
                res.status
            )));
        }
        res.assigned_job = Some(job.to_string());
        self.write_job_locked(&mut *store, &res)?;
        tracing::info!(resource = %name, job, "job attached");
        self.record_audit(name, OPERATOR, "add_job", Some(job.to_string()));
        Ok(())
    }

    /// Detach the job from a resource.
    pub fn remove_job(&self, name: &str) -> Result<(), QrmError> {
        let mut store = self.write()?;
        let mut res = store
            .resource(name)?
            .ok_or_else(|| QrmError::ResourceNotFound(name.to_string()))?;
        let Some(job) = res.assigned_job.take() else {
            tracing::debug!(resource = %name, "no job to remove");
            return Ok(());
        };
        self.write_job_locked(&mut *store, &res)?;
        tracing::info!(resource = %name, job = %job, "job removed");
        self.record_audit(name, OPERATOR, "remove_job", Some(job));
        Ok(())
    }

    /// Write `res` together with its holder's fill state.
    ///
    /// The holder is `filled` iff every resource it holds carries a job.
    fn write_job_locked(&self, store: &mut S, res: &Resource) -> Result<(), QrmError> {
        let mut batch = WriteBatch::new();
        batch.put_resource(res)?;
        let holder = match res.token.as_deref() {
            Some(token) => store.entry(token)?,
            None => None,
        };
        let Some(mut entry) = holder else {
            return store.apply(batch);
        };

        let before = entry.status();
        let mut all_jobs = true;
        for name in entry.assigned() {
            let has_job = if *name == res.name {
                res.assigned_job.is_some()
            } else {
                store
                    .resource(name)?
                    .is_some_and(|r| r.is_held_by(entry.token()) && r.assigned_job.is_some())
            };
            all_jobs &= has_job;
        }
        entry.set_filled(all_jobs, now_ms());
        if entry.status() != before {
            batch.put_entry(&entry)?;
        }
        store.apply(batch)?;
        if entry.status() != before {
            tracing::info!(token = %entry.token(), status = %entry.status(), "request fill state changed");
        }
        Ok(())
    }

    /// Snapshot of the pool and queue depth.
    pub fn status(&self) -> Result<BrokerSnapshot, QrmError> {
        let store = self.read()?;
        Ok(BrokerSnapshot {
            server_status: store.server_status()?,
            resources: store.resources()?,
            pending_requests: pending_in_order(&*store)?.len(),
        })
    }

    /// Delete terminal ledger entries older than the retention window.
    pub fn evict_terminal(&self, now_ms: u64) -> Result<usize, QrmError> {
        let Some(retention) = self.limits().retention else {
            return Ok(0);
        };
        let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
        let mut store = self.write()?;
        let evicted = evict_expired(&mut *store, now_ms, retention_ms)?;
        if evicted > 0 {
            tracing::info!(evicted, "evicted terminal ledger entries");
            self.record_audit("ledger", OPERATOR, "evict", Some(evicted.to_string()));
        }
        Ok(evicted)
    }

    /// Reconcile resource records with the ledger after a restart.
    ///
    /// A crash can land between writing resource records and the ledger entry
    /// that owns them. Orphaned allocations are freed, live requests missing a
    /// resource are failed, then pending requests are re-matched.
    pub fn recover(&self) -> Result<RecoveryReport, QrmError> {
        let mut store = self.write()?;
        let now = now_ms();
        let mut report = RecoveryReport::default();

        let live: HashMap<String, Vec<String>> = store
            .entries()?
            .into_iter()
            .filter(|e| e.status().holds_resources())
            .map(|e| (e.token().to_string(), e.assigned().to_vec()))
            .collect();

        for mut res in store.resources()? {
            if res.status != ResourceStatus::Allocated {
                continue;
            }
            let owned = res
                .token
                .as_deref()
                .and_then(|t| live.get(t))
                .is_some_and(|assigned| assigned.contains(&res.name));
            if !owned {
                tracing::warn!(resource = %res.name, holder = ?res.token, "freeing orphaned allocation");
                res.release();
                store.put_resource(&res)?;
                report.freed_resources += 1;
            }
        }

        for token in live.keys() {
            let Some(mut entry) = store.entry(token)? else {
                continue;
            };
            let mut intact = true;
            for name in entry.assigned() {
                intact &= store.resource(name)?.is_some_and(|r| r.is_held_by(token));
            }
            if !intact {
                Self::terminate_locked(&mut *store, &mut entry, RequestStatus::Error, now)?;
                tracing::warn!(token = %token, "request lost a resource while down, marked error");
                report.failed_requests += 1;
            }
        }

        report.activated = self.rematch_locked(&mut *store)?;
        tracing::info!(
            freed = report.freed_resources,
            failed = report.failed_requests,
            activated = report.activated,
            "recovery complete"
        );
        Ok(report)
    }
}
