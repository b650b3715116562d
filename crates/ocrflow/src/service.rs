//! Public entry point: accepts requests, schedules work and answers polls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info_span;

use crate::broadcast::{TaskProgressBroadcaster, TaskProgressEvent};
use crate::cancel::{CancelAck, CancellationGate};
use crate::config::loader::validate_config;
use crate::config::Config;
use crate::db::Database;
use crate::documents::{missing_documents, DocumentLookup};
use crate::error::{OcrflowError, TaskError, WorkerError};
use crate::pipeline::{Pipeline, INTERRUPTED_MESSAGE};
use crate::processor::{ContentDescriptor, PageExtractor, Strategy};
use crate::sanitize;
use crate::status::{self, StatusSnapshot};
use crate::store::{PruneReport, TaskStore};
use crate::task::{
    batch_default_options, count_batch_pages, default_options, new_task_id, normalize_pages,
    require_document_id, BatchRecord, BatchRequest, DocumentRequest, DocumentStatistics,
    OutputFormat, PageMetadata, PageRequest, ResultCorrection, ResultEntry, Statistics,
    TaskKind, TaskRecord, TaskStatus,
};
use crate::worker::{WorkItem, WorkerPool};

/// Engine recorded on pages whose text was corrected by hand.
pub const MANUAL_ENGINE: &str = "manual";

/// Returned when a request has been accepted and scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAccepted {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub estimated_seconds: u64,
    pub created_at: DateTime<Utc>,
}

pub struct OcrService {
    config: Config,
    store: Arc<dyn TaskStore>,
    documents: Arc<dyn DocumentLookup>,
    pipeline: Pipeline,
    pool: Mutex<Option<WorkerPool>>,
    broadcaster: TaskProgressBroadcaster,
}

impl OcrService {
    /// Builds a service over the given collaborators and starts
    /// `config.worker_count` workers. Records a previous run left
    /// `processing` are failed first, since nothing will finish them.
    pub fn new(
        config: Config,
        store: Arc<dyn TaskStore>,
        documents: Arc<dyn DocumentLookup>,
        extractor: PageExtractor,
    ) -> Result<Self, OcrflowError> {
        validate_config(&config)?;

        let recovered = store.fail_interrupted(INTERRUPTED_MESSAGE, Utc::now())?;
        if recovered.total() > 0 {
            warn!(
                "Failed {} tasks and {} batches interrupted by a previous run",
                recovered.tasks, recovered.batches
            );
        }

        let gate = Arc::new(CancellationGate::new(Arc::clone(&store)));
        let pipeline = Pipeline::new(Arc::clone(&store), Arc::clone(&documents), extractor, gate);
        let broadcaster = TaskProgressBroadcaster::default();
        let pool = WorkerPool::with_broadcaster(
            pipeline.clone(),
            config.worker_count,
            Some(broadcaster.clone()),
        )?;

        Ok(Self {
            config,
            store,
            documents,
            pipeline,
            pool: Mutex::new(Some(pool)),
            broadcaster,
        })
    }

    /// Production setup: SQLite at the configured path, Tesseract, poppler
    /// and antiword.
    pub fn open(config: Config, documents: Arc<dyn DocumentLookup>) -> Result<Self, OcrflowError> {
        let database = match config.database_path() {
            Some(path) => Database::open(&path)?,
            None => {
                log::warn!("No home directory found, using an in-memory database");
                Database::open_in_memory()?
            }
        };
        let extractor = PageExtractor::with_defaults(&config.ocr);
        Self::new(config, Arc::new(database), documents, extractor)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stream of progress events for all tasks.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskProgressEvent> {
        self.broadcaster.subscribe()
    }

    pub fn submit_page(&self, request: PageRequest) -> Result<TaskAccepted, TaskError> {
        let _span = info_span!("service.submit_page",
            document_id = %request.document_id,
            page = request.page_number,
        )
        .entered();

        require_document_id(&request.document_id)?;
        if request.page_number == 0 {
            return Err(TaskError::InvalidInput(
                "Page number must be greater than 0".to_string(),
            ));
        }
        match &request.content {
            Some(content) if content.data.trim().is_empty() => {
                return Err(TaskError::InvalidInput(
                    "Content must not be empty".to_string(),
                ));
            }
            Some(content) => {
                log::debug!(
                    "Inline {} content: {}",
                    content.kind.as_str(),
                    sanitize::preview(&content.data, 40)
                );
            }
            None => self.require_documents(std::slice::from_ref(&request.document_id))?,
        }
        let options = request
            .options
            .resolve(default_options(&self.config.tasks))?;

        let mut task = self.new_task(
            TaskKind::Page,
            request.document_id,
            options,
            self.config.tasks.page_estimate_secs,
        );
        task.page_number = Some(request.page_number);
        task.content_kind = request.content.as_ref().map(|c| c.kind);
        task.content_length = request.content.as_ref().map(|c| c.data.len() as u64);

        self.accept_task(
            task,
            |task| WorkItem::Page {
                task,
                content: request.content,
            },
        )
    }

    pub fn submit_document(&self, request: DocumentRequest) -> Result<TaskAccepted, TaskError> {
        let _span =
            info_span!("service.submit_document", document_id = %request.document_id).entered();

        require_document_id(&request.document_id)?;
        self.require_documents(std::slice::from_ref(&request.document_id))?;
        let options = request
            .options
            .resolve(default_options(&self.config.tasks))?;

        let task = self.new_task(
            TaskKind::Document,
            request.document_id,
            options,
            self.config.tasks.document_estimate_secs,
        );
        self.accept_task(task, |task| WorkItem::Document { task })
    }

    pub fn submit_batch(&self, request: BatchRequest) -> Result<TaskAccepted, TaskError> {
        let _span =
            info_span!("service.submit_batch", documents = request.document_ids.len()).entered();

        if request.document_ids.is_empty() {
            return Err(TaskError::InvalidInput(
                "At least one document id is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for id in &request.document_ids {
            require_document_id(id)?;
            if !seen.insert(id.as_str()) {
                return Err(TaskError::InvalidInput(format!(
                    "Duplicate document id '{}'",
                    id
                )));
            }
        }
        self.require_documents(&request.document_ids)?;
        let pages = normalize_pages(&request.document_ids, &request.pages)?;
        let options = request
            .options
            .resolve(batch_default_options(&self.config.tasks))?;

        let total_pages = count_batch_pages(&request.document_ids, &pages);
        let now = Utc::now();
        let batch = BatchRecord {
            batch_id: new_task_id(TaskKind::Batch),
            total_documents: request.document_ids.len() as u32,
            document_ids: request.document_ids,
            pages,
            options,
            total_pages,
            processed_documents: 0,
            processed_pages: 0,
            successful_pages: 0,
            failed_pages: 0,
            confidence_sum: 0.0,
            average_confidence: 0.0,
            status: TaskStatus::Processing,
            progress: 0,
            estimated_seconds: u64::from(total_pages) * self.config.tasks.batch_page_estimate_secs,
            result: None,
            error_message: None,
            cancel_reason: None,
            cancelled_at: None,
            created_at: now,
            started_at: now,
            updated_at: now,
            completed_at: None,
        };

        let accepted = TaskAccepted {
            id: batch.batch_id.clone(),
            kind: TaskKind::Batch,
            status: batch.status,
            estimated_seconds: batch.estimated_seconds,
            created_at: batch.created_at,
        };

        let documents = batch.total_documents;
        let gate = self.pipeline.gate();
        gate.register(&batch.batch_id);
        if let Err(e) = self.store.insert_batch(&batch) {
            gate.release(&batch.batch_id);
            return Err(e.into());
        }
        self.schedule(WorkItem::Batch { batch })?;

        info!(
            "Accepted batch {} ({} documents, {} pages)",
            accepted.id, documents, total_pages
        );
        Ok(accepted)
    }

    pub fn status(&self, id: &str) -> Result<StatusSnapshot, TaskError> {
        status::status(self.store.as_ref(), id)
    }

    pub fn cancel(&self, id: &str, reason: Option<&str>) -> Result<CancelAck, TaskError> {
        self.pipeline.gate().request_cancel(id, reason)
    }

    /// Stored extraction for one page.
    pub fn result(
        &self,
        document_id: &str,
        page_number: u32,
    ) -> Result<Option<ResultEntry>, TaskError> {
        Ok(self.store.find_result(document_id, page_number)?)
    }

    pub fn results_for_document(&self, document_id: &str) -> Result<Vec<ResultEntry>, TaskError> {
        Ok(self.store.results_for_document(document_id)?)
    }

    /// Replaces the stored text of one page, creating the entry if the page
    /// was never extracted. Layout is dropped since it no longer matches.
    pub fn update_result(&self, correction: ResultCorrection) -> Result<ResultEntry, TaskError> {
        let _span = info_span!("service.update_result",
            document_id = %correction.document_id,
            page = correction.page_number,
        )
        .entered();

        require_document_id(&correction.document_id)?;
        if correction.page_number == 0 {
            return Err(TaskError::InvalidInput(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if correction.text.trim().is_empty() {
            return Err(TaskError::InvalidInput(
                "Text must not be empty".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&correction.confidence) {
            return Err(TaskError::InvalidInput(
                "Confidence must be between 0 and 100".to_string(),
            ));
        }
        self.require_documents(std::slice::from_ref(&correction.document_id))?;

        let existing = self
            .store
            .find_result(&correction.document_id, correction.page_number)?;
        let strategy = match &existing {
            Some(entry) => entry.metadata.strategy,
            None => self.stored_strategy(&correction.document_id),
        };
        let threshold = f64::from(self.config.tasks.default_confidence_threshold);
        let now = Utc::now();
        self.store.upsert_result(&ResultEntry {
            document_id: correction.document_id.clone(),
            page_number: correction.page_number,
            text: correction.text,
            confidence: correction.confidence,
            layout: None,
            metadata: PageMetadata {
                engine: MANUAL_ENGINE.to_string(),
                language: None,
                processing_ms: 0,
                strategy,
                low_confidence: correction.confidence < threshold,
                format: OutputFormat::Text,
            },
            created_at: now,
            updated_at: now,
        })?;

        info!(
            "{} page {} of {}",
            if existing.is_some() { "Corrected" } else { "Added" },
            correction.page_number,
            correction.document_id
        );
        self.store
            .find_result(&correction.document_id, correction.page_number)?
            .ok_or_else(|| {
                TaskError::NotFound(format!(
                    "{}/{}",
                    correction.document_id, correction.page_number
                ))
            })
    }

    /// Page count and confidence aggregates over a document's stored pages.
    pub fn document_statistics(&self, document_id: &str) -> Result<DocumentStatistics, TaskError> {
        require_document_id(document_id)?;
        self.require_documents(&[document_id.to_string()])?;
        let entries = self.store.results_for_document(document_id)?;
        Ok(DocumentStatistics::from_results(
            document_id,
            &entries,
            self.config.tasks.default_confidence_threshold,
        ))
    }

    /// Task history of a document, newest first.
    pub fn tasks_for_document(&self, document_id: &str) -> Result<Vec<TaskRecord>, TaskError> {
        Ok(self.store.tasks_for_document(document_id)?)
    }

    pub fn statistics(&self) -> Result<Statistics, TaskError> {
        Ok(self.store.statistics()?)
    }

    /// Removes task and batch records that finished before `older_than`.
    pub fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<PruneReport, TaskError> {
        let report = self.store.prune_finished(older_than)?;
        info!(
            "Pruned {} tasks and {} batches finished before {}",
            report.tasks, report.batches, older_than
        );
        Ok(report)
    }

    /// Stops accepting work and joins the workers. Items still queued are
    /// failed, or cancelled if a cancel was requested for them.
    pub fn shutdown(&self) {
        let pool = match self.pool.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait();
        }
    }

    fn require_documents(&self, document_ids: &[String]) -> Result<(), TaskError> {
        let missing = missing_documents(self.documents.as_ref(), document_ids);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TaskError::DocumentNotFound(missing))
        }
    }

    fn stored_strategy(&self, document_id: &str) -> Strategy {
        self.documents
            .file_path(document_id)
            .map(|path| Strategy::select(&ContentDescriptor::Path(&path)))
            .unwrap_or(Strategy::FallbackOcr)
    }

    fn new_task(
        &self,
        kind: TaskKind,
        document_id: String,
        options: crate::task::TaskOptions,
        estimated_seconds: u64,
    ) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            task_id: new_task_id(kind),
            document_id,
            page_number: None,
            kind,
            content_kind: None,
            content_length: None,
            status: TaskStatus::Processing,
            progress: 0,
            options,
            estimated_seconds,
            result: None,
            error_message: None,
            cancel_reason: None,
            cancelled_at: None,
            created_at: now,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Stores the task as `processing`, then hands it to the pool.
    fn accept_task(
        &self,
        task: TaskRecord,
        item: impl FnOnce(TaskRecord) -> WorkItem,
    ) -> Result<TaskAccepted, TaskError> {
        let accepted = TaskAccepted {
            id: task.task_id.clone(),
            kind: task.kind,
            status: task.status,
            estimated_seconds: task.estimated_seconds,
            created_at: task.created_at,
        };

        let gate = self.pipeline.gate();
        gate.register(&task.task_id);
        if let Err(e) = self.store.insert_task(&task) {
            gate.release(&task.task_id);
            return Err(e.into());
        }
        self.schedule(item(task))?;

        info!("Accepted {} task {}", accepted.kind, accepted.id);
        Ok(accepted)
    }

    fn schedule(&self, item: WorkItem) -> Result<(), TaskError> {
        let id = item.id().to_string();
        let submitted = match self.pool.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(pool) => pool.submit(item),
                None => Err(WorkerError::ChannelClosed),
            },
            Err(_) => Err(WorkerError::ChannelClosed),
        };

        if let Err(e) = submitted {
            error!("Could not schedule {}: {}", id, e);
            self.pipeline.abort(&id);
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for OcrService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
