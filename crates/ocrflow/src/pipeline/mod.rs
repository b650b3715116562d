//! Runners that drive tasks and batches from `processing` to a terminal state.
//!
//! Each runner is the single writer of its record while it runs. Progress is
//! persisted after every unit of work and the terminal write goes through the
//! cancellation gate so a pending cancel always wins.

pub mod batch;
pub mod document_task;
pub mod page_task;
pub mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::cancel::{CancellationGate, DEFAULT_CANCEL_REASON};
use crate::db::DatabaseError;
use crate::documents::DocumentLookup;
use crate::processor::{ExtractedPage, PageExtractor};
use crate::store::TaskStore;
use crate::task::{BatchRecord, BatchResult, ResultEntry, TaskRecord, TaskResult};

pub use batch::BatchCoordinator;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};

/// Message written to records that failed for reasons outside the content.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error while processing task";

/// Message written to records still queued when the workers stopped.
pub const SHUTDOWN_MESSAGE: &str = "Service stopped before the task could run";

/// Message written at startup to records a previous run left `processing`.
pub const INTERRUPTED_MESSAGE: &str = "Task interrupted by a service restart";

/// How a runner left its record.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Completed,
    Failed(String),
    Cancelled(String),
    /// The record was already terminal when the runner tried to write it.
    Superseded,
}

/// Shared collaborators of all runners.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn TaskStore>,
    documents: Arc<dyn DocumentLookup>,
    extractor: PageExtractor,
    gate: Arc<CancellationGate>,
}

enum TaskEnd {
    Completed(TaskResult),
    Failed(String),
    Cancelled,
}

enum BatchEnd {
    Completed(BatchResult),
    Failed(String),
    Cancelled,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        documents: Arc<dyn DocumentLookup>,
        extractor: PageExtractor,
        gate: Arc<CancellationGate>,
    ) -> Self {
        Self {
            store,
            documents,
            extractor,
            gate,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<CancellationGate> {
        &self.gate
    }

    pub(crate) fn extractor(&self) -> &PageExtractor {
        &self.extractor
    }

    pub(crate) fn document_path(&self, document_id: &str) -> Option<PathBuf> {
        self.documents.file_path(document_id)
    }

    /// Stores an extracted page in the result sink.
    pub(crate) fn store_page(
        &self,
        document_id: &str,
        page: &ExtractedPage,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now();
        self.store.upsert_result(&ResultEntry {
            document_id: document_id.to_string(),
            page_number: page.page,
            text: page.text.clone(),
            confidence: page.confidence,
            layout: page.layout.clone(),
            metadata: page.metadata.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Writes intermediate state. `Ok(false)` means the record is no longer
    /// ours to write.
    pub(crate) fn persist_task(&self, task: &TaskRecord) -> Result<bool, DatabaseError> {
        self.store.update_task(task)
    }

    pub(crate) fn persist_batch(&self, batch: &BatchRecord) -> Result<bool, DatabaseError> {
        self.store.update_batch(batch)
    }

    fn finish_task(
        &self,
        task: &mut TaskRecord,
        end: TaskEnd,
        progress: &dyn ProgressReporter,
    ) -> WorkOutcome {
        let id = task.task_id.clone();
        self.gate.conclude(&id, |cancel| {
            let now = Utc::now();
            let outcome = match (cancel, end) {
                (Some(ack), _) => {
                    task.mark_cancelled(&ack.reason, now);
                    WorkOutcome::Cancelled(ack.reason.clone())
                }
                (None, TaskEnd::Cancelled) => {
                    task.mark_cancelled(DEFAULT_CANCEL_REASON, now);
                    WorkOutcome::Cancelled(DEFAULT_CANCEL_REASON.to_string())
                }
                (None, TaskEnd::Completed(result)) => {
                    task.mark_completed(result, now);
                    WorkOutcome::Completed
                }
                (None, TaskEnd::Failed(message)) => {
                    task.mark_failed(&message, now);
                    WorkOutcome::Failed(message)
                }
            };
            self.commit(&id, self.store.update_task(task), outcome, task.progress, progress)
        })
    }

    fn finish_batch(
        &self,
        batch: &mut BatchRecord,
        end: BatchEnd,
        progress: &dyn ProgressReporter,
    ) -> WorkOutcome {
        let id = batch.batch_id.clone();
        self.gate.conclude(&id, |cancel| {
            let now = Utc::now();
            let outcome = match (cancel, end) {
                (Some(ack), _) => {
                    batch.mark_cancelled(&ack.reason, now);
                    WorkOutcome::Cancelled(ack.reason.clone())
                }
                (None, BatchEnd::Cancelled) => {
                    batch.mark_cancelled(DEFAULT_CANCEL_REASON, now);
                    WorkOutcome::Cancelled(DEFAULT_CANCEL_REASON.to_string())
                }
                (None, BatchEnd::Completed(result)) => {
                    batch.mark_completed(result, now);
                    WorkOutcome::Completed
                }
                (None, BatchEnd::Failed(message)) => {
                    batch.mark_failed(&message, now);
                    WorkOutcome::Failed(message)
                }
            };
            self.commit(&id, self.store.update_batch(batch), outcome, batch.progress, progress)
        })
    }

    /// Fails a record whose runner stopped without concluding it.
    pub fn abort(&self, id: &str) -> WorkOutcome {
        self.abandon(id, INTERNAL_ERROR_MESSAGE)
    }

    /// Concludes a record no runner will finish: cancelled when a cancel is
    /// pending, failed with `message` otherwise. Progress is left as stored.
    pub fn abandon(&self, id: &str, message: &str) -> WorkOutcome {
        self.gate.conclude(id, |cancel| {
            let now = Utc::now();
            let outcome = match cancel {
                Some(ack) => WorkOutcome::Cancelled(ack.reason.clone()),
                None => WorkOutcome::Failed(message.to_string()),
            };
            let written = match self.store.find_task(id) {
                Ok(Some(mut task)) => {
                    match &outcome {
                        WorkOutcome::Cancelled(reason) => task.mark_cancelled(reason, now),
                        _ => task.mark_failed(message, now),
                    }
                    self.store.update_task(&task)
                }
                Ok(None) => match self.store.find_batch(id) {
                    Ok(Some(mut batch)) => {
                        match &outcome {
                            WorkOutcome::Cancelled(reason) => batch.mark_cancelled(reason, now),
                            _ => batch.mark_failed(message, now),
                        }
                        self.store.update_batch(&batch)
                    }
                    Ok(None) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            self.commit(id, written, outcome, 0, &NoopProgress)
        })
    }

    fn commit(
        &self,
        id: &str,
        written: Result<bool, DatabaseError>,
        outcome: WorkOutcome,
        last_progress: u8,
        progress: &dyn ProgressReporter,
    ) -> WorkOutcome {
        match written {
            Ok(true) => {
                match &outcome {
                    WorkOutcome::Completed => {
                        info!("{} completed", id);
                        progress.report(ProgressEvent::Completed);
                    }
                    WorkOutcome::Failed(message) => {
                        warn!("{} failed: {}", id, message);
                        progress.report(ProgressEvent::Failed {
                            progress: last_progress,
                            error: message.clone(),
                        });
                    }
                    WorkOutcome::Cancelled(reason) => {
                        info!("{} cancelled: {}", id, reason);
                        progress.report(ProgressEvent::Cancelled {
                            progress: last_progress,
                            reason: reason.clone(),
                        });
                    }
                    WorkOutcome::Superseded => {}
                }
                outcome
            }
            Ok(false) => {
                warn!("{} was already terminal, dropping final state", id);
                WorkOutcome::Superseded
            }
            Err(e) => {
                error!("Failed to write final state of {}: {}", id, e);
                WorkOutcome::Failed(INTERNAL_ERROR_MESSAGE.to_string())
            }
        }
    }
}
