//! Key-value store contract and the typed record layer on top of it.
//!
//! Resources and ledger entries share one store, separated by key prefix.
//! Values are JSON documents so any string store can back the broker.

use crate::core::ledger::LedgerEntry;
use crate::core::{QrmError, Resource, ServerStatus};

/// Key prefix for resource records.
pub const RESOURCE_PREFIX: &str = "resource:";
/// Key prefix for ledger entries.
pub const REQUEST_PREFIX: &str = "request:";
/// Scalar holding the broker status.
pub const BROKER_STATUS_KEY: &str = "broker_status";

/// Abstraction for store backends.
///
/// `list` returns entries in insertion order. Overwriting an existing key keeps
/// its original position.
pub trait KvStore: Send + Sync {
    /// Fetch a value.
    fn get(&self, key: &str) -> Result<Option<String>, QrmError>;
    /// Insert or overwrite a value.
    fn set(&mut self, key: &str, value: String) -> Result<(), QrmError>;
    /// Remove a key. Removing a missing key is not an error.
    fn delete(&mut self, key: &str) -> Result<(), QrmError>;
    /// All entries whose key starts with `prefix`, in insertion order.
    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, QrmError>;
    /// Fetch a scalar flag.
    fn get_scalar(&self, key: &str) -> Result<Option<String>, QrmError>;
    /// Write a scalar flag.
    fn set_scalar(&mut self, key: &str, value: String) -> Result<(), QrmError>;
}

impl KvStore for Box<dyn KvStore> {
    fn get(&self, key: &str) -> Result<Option<String>, QrmError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), QrmError> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<(), QrmError> {
        (**self).delete(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, QrmError> {
        (**self).list(prefix)
    }

    fn get_scalar(&self, key: &str) -> Result<Option<String>, QrmError> {
        (**self).get_scalar(key)
    }

    fn set_scalar(&mut self, key: &str, value: String) -> Result<(), QrmError> {
        (**self).set_scalar(key, value)
    }
}

fn resource_key(name: &str) -> String {
    format!("{RESOURCE_PREFIX}{name}")
}

fn request_key(token: &str) -> String {
    format!("{REQUEST_PREFIX}{token}")
}

/// Record writes staged under the engine lock and applied together.
///
/// A later write to the same key replaces the earlier one.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<(String, Option<String>)>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&mut self, key: String, value: Option<String>) {
        if let Some(slot) = self.writes.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.writes.push((key, value));
        }
    }

    /// Stage a resource write.
    pub fn put_resource(&mut self, resource: &Resource) -> Result<(), QrmError> {
        let raw = serde_json::to_string(resource)?;
        self.stage(resource_key(&resource.name), Some(raw));
        Ok(())
    }

    /// Stage a ledger entry write.
    pub fn put_entry(&mut self, entry: &LedgerEntry) -> Result<(), QrmError> {
        let raw = serde_json::to_string(entry)?;
        self.stage(request_key(entry.token()), Some(raw));
        Ok(())
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

fn write_raw<S: KvStore + ?Sized>(
    store: &mut S,
    key: &str,
    value: Option<String>,
) -> Result<(), QrmError> {
    match value {
        Some(raw) => store.set(key, raw),
        None => store.delete(key),
    }
}

/// Restore prior values in reverse order. A failed undo is left to `recover()`.
fn undo<S: KvStore + ?Sized>(store: &mut S, applied: Vec<(String, Option<String>)>) {
    for (key, prior) in applied.into_iter().rev() {
        if let Err(err) = write_raw(store, &key, prior) {
            tracing::error!(key = %key, error = %err, "rollback of staged write failed");
        }
    }
}

/// Typed access to resource records, ledger entries and the broker status.
pub trait RecordStore: KvStore {
    /// Look up a resource by name.
    fn resource(&self, name: &str) -> Result<Option<Resource>, QrmError> {
        self.get(&resource_key(name))?
            .map(|raw| serde_json::from_str(&raw).map_err(QrmError::from))
            .transpose()
    }

    /// Insert or overwrite a resource record.
    fn put_resource(&mut self, resource: &Resource) -> Result<(), QrmError> {
        let raw = serde_json::to_string(resource)?;
        self.set(&resource_key(&resource.name), raw)
    }

    /// Delete a resource record.
    fn remove_resource(&mut self, name: &str) -> Result<(), QrmError> {
        self.delete(&resource_key(name))
    }

    /// Every resource in insertion order.
    fn resources(&self) -> Result<Vec<Resource>, QrmError> {
        self.list(RESOURCE_PREFIX)?
            .into_iter()
            .map(|(_, raw)| serde_json::from_str(&raw).map_err(QrmError::from))
            .collect()
    }

    /// Look up a ledger entry.
    fn entry(&self, token: &str) -> Result<Option<LedgerEntry>, QrmError> {
        self.get(&request_key(token))?
            .map(|raw| serde_json::from_str(&raw).map_err(QrmError::from))
            .transpose()
    }

    /// Insert or overwrite a ledger entry.
    fn put_entry(&mut self, entry: &LedgerEntry) -> Result<(), QrmError> {
        let raw = serde_json::to_string(entry)?;
        self.set(&request_key(entry.token()), raw)
    }

    /// Delete a ledger entry.
    fn remove_entry(&mut self, token: &str) -> Result<(), QrmError> {
        self.delete(&request_key(token))
    }

    /// Every ledger entry in insertion order.
    fn entries(&self) -> Result<Vec<LedgerEntry>, QrmError> {
        self.list(REQUEST_PREFIX)?
            .into_iter()
            .map(|(_, raw)| serde_json::from_str(&raw).map_err(QrmError::from))
            .collect()
    }

    /// Current broker status; an unset scalar means active.
    fn server_status(&self) -> Result<ServerStatus, QrmError> {
        Ok(self
            .get_scalar(BROKER_STATUS_KEY)?
            .map_or(ServerStatus::Active, |raw| ServerStatus::from_scalar(&raw)))
    }

    /// Apply a batch. On failure every write already applied is undone and the
    /// error is returned, so callers see either all of it or none of it.
    fn apply(&mut self, batch: WriteBatch) -> Result<(), QrmError> {
        let mut applied = Vec::with_capacity(batch.writes.len());
        for (key, value) in batch.writes {
            let result = match self.get(&key) {
                Ok(prior) => write_raw(self, &key, value).map(|()| prior),
                Err(err) => Err(err),
            };
            match result {
                Ok(prior) => applied.push((key, prior)),
                Err(err) => {
                    tracing::warn!(
                        key = %key,
                        undo = applied.len(),
                        error = %err,
                        "batch write failed, rolling back"
                    );
                    undo(self, applied);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Write the broker status scalar.
    fn set_server_status(&mut self, status: ServerStatus) -> Result<(), QrmError> {
        self.set_scalar(BROKER_STATUS_KEY, status.as_str().to_string())
    }
}

impl<S: KvStore + ?Sized> RecordStore for S {}
