use chrono::Utc;
use log::{error, info, warn};
use tracing::info_span;

use crate::processor::{ContentDescriptor, ExtractedPage, PageSource, Strategy};
use crate::sanitize;
use crate::task::{average, progress_percent, ItemStatus, PageOutcome, TaskRecord, TaskResult};

use super::{
    Pipeline, ProgressEvent, ProgressReporter, TaskEnd, WorkOutcome, INTERNAL_ERROR_MESSAGE,
};

impl Pipeline {
    /// Runs a whole-document task. Pages are processed in order; the task
    /// fails only when no page could be extracted.
    pub fn run_document_task(
        &self,
        mut task: TaskRecord,
        progress: &dyn ProgressReporter,
    ) -> WorkOutcome {
        let _span = info_span!("pipeline.document",
            task_id = %task.task_id,
            document_id = %task.document_id,
        )
        .entered();

        if self.gate.is_cancelled(&task.task_id) {
            return self.finish_task(&mut task, TaskEnd::Cancelled, progress);
        }

        let Some(path) = self.document_path(&task.document_id) else {
            let message = format!("Document not found: {}", task.document_id);
            return self.finish_task(&mut task, TaskEnd::Failed(message), progress);
        };
        let strategy = Strategy::select(&ContentDescriptor::Path(&path));
        info!(
            "Extracting {} with {}",
            sanitize::redact_path(&path),
            strategy
        );

        let loaded = match self.extractor.load(&PageSource::File(path)) {
            Ok(loaded) => loaded,
            Err(e) => return self.finish_task(&mut task, TaskEnd::Failed(e.to_string()), progress),
        };
        let total_pages = match self.extractor.page_count(&loaded, strategy) {
            Ok(count) => count,
            Err(e) => return self.finish_task(&mut task, TaskEnd::Failed(e.to_string()), progress),
        };

        let units = if strategy.is_paginated() {
            total_pages.min(self.extractor.max_pdf_pages())
        } else {
            total_pages
        };
        if units < total_pages {
            info!(
                "Processing first {} of {} pages of {}",
                units, total_pages, task.document_id
            );
        }

        let mut extracted: Vec<ExtractedPage> = Vec::new();
        let mut outcomes = Vec::with_capacity(units as usize);
        let mut last_error = None;

        for page_number in 1..=units {
            if self.gate.is_cancelled(&task.task_id) {
                return self.finish_task(&mut task, TaskEnd::Cancelled, progress);
            }

            match self
                .extractor
                .extract_loaded(&loaded, page_number, strategy, &task.options)
            {
                Ok(page) => {
                    if let Err(e) = self.store_page(&task.document_id, &page) {
                        error!("Failed to store page {} of {}: {}", page_number, task.task_id, e);
                        return self.finish_task(
                            &mut task,
                            TaskEnd::Failed(INTERNAL_ERROR_MESSAGE.to_string()),
                            progress,
                        );
                    }
                    outcomes.push(PageOutcome {
                        page: page_number,
                        status: ItemStatus::Success,
                        confidence: Some(page.confidence),
                        error: None,
                    });
                    extracted.push(page);
                }
                Err(e) => {
                    warn!("Page {} of {} failed: {}", page_number, task.document_id, e);
                    outcomes.push(PageOutcome {
                        page: page_number,
                        status: ItemStatus::Failed,
                        confidence: None,
                        error: Some(e.to_string()),
                    });
                    last_error = Some(e.to_string());
                }
            }

            task.advance(progress_percent(page_number, units), Utc::now());
            match self.persist_task(&task) {
                Ok(true) => {}
                Ok(false) => {
                    self.gate.release(&task.task_id);
                    return WorkOutcome::Superseded;
                }
                Err(e) => {
                    error!("Failed to persist progress of {}: {}", task.task_id, e);
                    return self.finish_task(
                        &mut task,
                        TaskEnd::Failed(INTERNAL_ERROR_MESSAGE.to_string()),
                        progress,
                    );
                }
            }
            progress.report(ProgressEvent::Progress {
                progress: task.progress,
                document_id: Some(task.document_id.clone()),
                page: Some(page_number),
                message: format!("Page {} of {} processed", page_number, units),
            });
        }

        match combine_pages(extracted, outcomes, total_pages, units, &task) {
            Some(result) => self.finish_task(&mut task, TaskEnd::Completed(result), progress),
            None => {
                let message = match last_error {
                    Some(e) => format!("No page could be extracted: {}", e),
                    None => "No page could be extracted".to_string(),
                };
                self.finish_task(&mut task, TaskEnd::Failed(message), progress)
            }
        }
    }
}

/// Joins successful pages into one result; `None` when there are none.
/// Layout is kept only for single-page documents, per-page layout lives in
/// the result sink.
fn combine_pages(
    pages: Vec<ExtractedPage>,
    outcomes: Vec<PageOutcome>,
    total_pages: u32,
    pages_processed: u32,
    task: &TaskRecord,
) -> Option<TaskResult> {
    let mut metadata = pages.first()?.metadata.clone();
    let layout = match pages.as_slice() {
        [only] if pages_processed == 1 => only.layout.clone(),
        _ => None,
    };

    let confidence_sum: f64 = pages.iter().map(|p| p.confidence).sum();
    let confidence = average(confidence_sum, pages.len() as u32);
    metadata.processing_ms = pages.iter().map(|p| p.metadata.processing_ms).sum();
    metadata.low_confidence = metadata.strategy.uses_ocr()
        && confidence < f64::from(task.options.confidence_threshold);

    let text = pages
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("\n\n");

    Some(TaskResult {
        text,
        confidence,
        metadata,
        layout,
        total_pages,
        pages_processed,
        truncated: pages_processed < total_pages,
        pages: outcomes,
    })
}
