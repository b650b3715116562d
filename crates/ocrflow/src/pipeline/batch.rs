//! Sequential processing of multi-document batches.

use chrono::Utc;
use log::{debug, error, warn};
use tracing::info_span;

use crate::db::DatabaseError;
use crate::processor::{ContentDescriptor, LoadedSource, PageSource, Strategy};
use crate::task::{BatchItem, BatchRecord, ItemStatus};

use super::{
    BatchEnd, Pipeline, ProgressEvent, ProgressReporter, WorkOutcome, INTERNAL_ERROR_MESSAGE,
};

/// Runs batches one document and one page at a time. Page failures are
/// counted, only orchestration errors fail the batch.
#[derive(Clone)]
pub struct BatchCoordinator {
    pipeline: Pipeline,
}

enum Halt {
    Cancelled,
    Superseded,
    Store(DatabaseError),
}

impl From<DatabaseError> for Halt {
    fn from(e: DatabaseError) -> Self {
        Halt::Store(e)
    }
}

impl BatchCoordinator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn run(&self, mut batch: BatchRecord, progress: &dyn ProgressReporter) -> WorkOutcome {
        let _span = info_span!("pipeline.batch",
            batch_id = %batch.batch_id,
            documents = batch.total_documents,
            pages = batch.total_pages,
        )
        .entered();

        let mut items = Vec::with_capacity(batch.total_pages as usize);
        match self.process(&mut batch, &mut items, progress) {
            Ok(()) => {
                let summary = batch.summary(items);
                self.pipeline
                    .finish_batch(&mut batch, BatchEnd::Completed(summary), progress)
            }
            Err(Halt::Cancelled) => self
                .pipeline
                .finish_batch(&mut batch, BatchEnd::Cancelled, progress),
            Err(Halt::Superseded) => {
                self.pipeline.gate.release(&batch.batch_id);
                WorkOutcome::Superseded
            }
            Err(Halt::Store(e)) => {
                error!("Batch {} aborted: {}", batch.batch_id, e);
                self.pipeline.finish_batch(
                    &mut batch,
                    BatchEnd::Failed(INTERNAL_ERROR_MESSAGE.to_string()),
                    progress,
                )
            }
        }
    }

    fn process(
        &self,
        batch: &mut BatchRecord,
        items: &mut Vec<BatchItem>,
        progress: &dyn ProgressReporter,
    ) -> Result<(), Halt> {
        let document_ids = batch.document_ids.clone();

        for document_id in &document_ids {
            self.check_cancel(batch)?;

            let source = self.open(document_id);
            for page in batch.pages_for(document_id) {
                self.check_cancel(batch)?;

                let item = match &source {
                    Ok((loaded, strategy)) => {
                        self.process_page(batch, document_id, loaded, *strategy, page)?
                    }
                    Err(message) => failed_item(document_id, page, message.clone()),
                };
                batch.record_page(item.confidence);
                batch.updated_at = Utc::now();
                items.push(item);
                self.persist(batch)?;

                progress.report(ProgressEvent::Progress {
                    progress: batch.progress,
                    document_id: Some(document_id.clone()),
                    page: Some(page),
                    message: format!(
                        "{} of {} pages processed",
                        batch.processed_pages, batch.total_pages
                    ),
                });
            }

            batch.processed_documents += 1;
            batch.updated_at = Utc::now();
            self.persist(batch)?;
        }

        Ok(())
    }

    /// Resolves and reads a document once for all of its pages.
    fn open(&self, document_id: &str) -> Result<(LoadedSource, Strategy), String> {
        let path = self
            .pipeline
            .document_path(document_id)
            .ok_or_else(|| format!("Document not found: {}", document_id))?;
        let strategy = Strategy::select(&ContentDescriptor::Path(&path));
        debug!("Batch document {} uses {}", document_id, strategy);

        let loaded = self
            .pipeline
            .extractor()
            .load(&PageSource::File(path))
            .map_err(|e| e.to_string())?;
        Ok((loaded, strategy))
    }

    fn process_page(
        &self,
        batch: &BatchRecord,
        document_id: &str,
        source: &LoadedSource,
        strategy: Strategy,
        page: u32,
    ) -> Result<BatchItem, Halt> {
        match self
            .pipeline
            .extractor()
            .extract_loaded(source, page, strategy, &batch.options)
        {
            Ok(extracted) => {
                self.pipeline.store_page(document_id, &extracted)?;
                Ok(BatchItem {
                    document_id: document_id.to_string(),
                    page,
                    status: ItemStatus::Success,
                    confidence: Some(extracted.confidence),
                    error: None,
                })
            }
            Err(e) => {
                warn!("Page {} of {} failed: {}", page, document_id, e);
                Ok(failed_item(document_id, page, e.to_string()))
            }
        }
    }

    fn check_cancel(&self, batch: &BatchRecord) -> Result<(), Halt> {
        if self.pipeline.gate.is_cancelled(&batch.batch_id) {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn persist(&self, batch: &BatchRecord) -> Result<(), Halt> {
        if self.pipeline.persist_batch(batch)? {
            Ok(())
        } else {
            Err(Halt::Superseded)
        }
    }
}

fn failed_item(document_id: &str, page: u32, error: String) -> BatchItem {
    BatchItem {
        document_id: document_id.to_string(),
        page,
        status: ItemStatus::Failed,
        confidence: None,
        error: Some(error),
    }
}
