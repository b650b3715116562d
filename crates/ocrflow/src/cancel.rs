//! Cooperative cancellation of running tasks and batches.
//!
//! A cancel request only flips a flag. The worker that owns the record checks
//! the flag between units of work and commits its terminal state through
//! [`CancellationGate::conclude`], which runs under the same lock as
//! [`CancellationGate::request_cancel`]. A cancel either lands before the
//! worker concludes and is honored, or after and is rejected because the
//! record is already terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::store::TaskStore;
use crate::task::TaskStatus;

pub const DEFAULT_CANCEL_REASON: &str = "cancelled by user";

/// Acknowledgement of an accepted cancel request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelAck {
    pub id: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    /// `true` while the owning worker has not yet observed the request.
    /// `false` when the record was cancelled directly.
    pub pending: bool,
}

#[derive(Debug, Default)]
struct Slot {
    cancel: Option<CancelAck>,
}

pub struct CancellationGate {
    store: Arc<dyn TaskStore>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl CancellationGate {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks `id` as owned by a live worker. Called before the record is
    /// stored so that a cancel never sees a live record without an owner.
    pub fn register(&self, id: &str) {
        self.slots().insert(id.to_string(), Slot::default());
    }

    /// Drops ownership without writing anything.
    pub fn release(&self, id: &str) {
        self.slots().remove(id);
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.slots().contains_key(id)
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.slots()
            .get(id)
            .is_some_and(|slot| slot.cancel.is_some())
    }

    /// Requests cancellation of a task or batch.
    pub fn request_cancel(&self, id: &str, reason: Option<&str>) -> Result<CancelAck, TaskError> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCEL_REASON);

        let mut slots = self.slots();
        let status = self.stored_status(id)?;
        if status.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                id: id.to_string(),
                status,
            });
        }

        if let Some(slot) = slots.get_mut(id) {
            if let Some(ack) = &slot.cancel {
                debug!("Cancel for {} already pending", id);
                return Ok(ack.clone());
            }
            let ack = CancelAck {
                id: id.to_string(),
                reason: reason.to_string(),
                requested_at: Utc::now(),
                pending: true,
            };
            slot.cancel = Some(ack.clone());
            info!("Cancel requested for {}", id);
            return Ok(ack);
        }

        // No worker owns the record; it was left behind by an earlier process.
        let now = Utc::now();
        self.cancel_orphan(id, reason, now)?;
        info!("Cancelled orphaned record {}", id);
        Ok(CancelAck {
            id: id.to_string(),
            reason: reason.to_string(),
            requested_at: now,
            pending: false,
        })
    }

    /// Runs the worker's terminal write under the gate lock and releases
    /// the slot. `finish` receives the pending cancel request, if any.
    pub fn conclude<T>(&self, id: &str, finish: impl FnOnce(Option<&CancelAck>) -> T) -> T {
        let mut slots = self.slots();
        let cancel = slots.get(id).and_then(|slot| slot.cancel.clone());
        let outcome = finish(cancel.as_ref());
        slots.remove(id);
        outcome
    }

    fn stored_status(&self, id: &str) -> Result<TaskStatus, TaskError> {
        if let Some(task) = self.store.find_task(id)? {
            return Ok(task.status);
        }
        if let Some(batch) = self.store.find_batch(id)? {
            return Ok(batch.status);
        }
        Err(TaskError::NotFound(id.to_string()))
    }

    fn cancel_orphan(&self, id: &str, reason: &str, at: DateTime<Utc>) -> Result<(), TaskError> {
        let written = if let Some(mut task) = self.store.find_task(id)? {
            task.mark_cancelled(reason, at);
            self.store.update_task(&task)?
        } else if let Some(mut batch) = self.store.find_batch(id)? {
            batch.mark_cancelled(reason, at);
            self.store.update_batch(&batch)?
        } else {
            return Err(TaskError::NotFound(id.to_string()));
        };

        if written {
            Ok(())
        } else {
            let status = self.stored_status(id)?;
            Err(TaskError::AlreadyTerminal {
                id: id.to_string(),
                status,
            })
        }
    }
}
