use chrono::Utc;
use log::{debug, error};
use tracing::info_span;

use crate::processor::{ContentDescriptor, PageSource, Strategy};
use crate::sanitize;
use crate::task::{ContentKind, InlineContent, ItemStatus, PageOutcome, TaskRecord, TaskResult};

use super::{
    Pipeline, ProgressEvent, ProgressReporter, TaskEnd, WorkOutcome, INTERNAL_ERROR_MESSAGE,
};

/// Progress once the source has been read.
pub const SOURCE_LOADED: u8 = 25;
/// Progress once the page has been extracted.
pub const EXTRACTED: u8 = 75;

enum Step {
    Continue,
    Stop(WorkOutcome),
}

impl Pipeline {
    /// Runs a single-page task to a terminal state.
    pub fn run_page_task(
        &self,
        mut task: TaskRecord,
        content: Option<InlineContent>,
        progress: &dyn ProgressReporter,
    ) -> WorkOutcome {
        let page_number = task.page_number.unwrap_or(1);
        let _span = info_span!("pipeline.page",
            task_id = %task.task_id,
            document_id = %task.document_id,
            page = page_number,
        )
        .entered();

        if self.gate.is_cancelled(&task.task_id) {
            return self.finish_task(&mut task, TaskEnd::Cancelled, progress);
        }

        let (source, strategy) = match &content {
            Some(inline) => inline_source(inline),
            None => match self.document_path(&task.document_id) {
                Some(path) => {
                    debug!("Reading document file {}", sanitize::redact_path(&path));
                    let strategy = Strategy::select(&ContentDescriptor::Path(&path));
                    (PageSource::File(path), strategy)
                }
                None => {
                    let message = format!("Document not found: {}", task.document_id);
                    return self.finish_task(&mut task, TaskEnd::Failed(message), progress);
                }
            },
        };

        let loaded = match self.extractor.load(&source) {
            Ok(loaded) => loaded,
            Err(e) => {
                return self.finish_task(&mut task, TaskEnd::Failed(e.to_string()), progress)
            }
        };
        if let Step::Stop(outcome) =
            self.checkpoint(&mut task, SOURCE_LOADED, "Source loaded", progress)
        {
            return outcome;
        }

        let page = match self
            .extractor
            .extract_loaded(&loaded, page_number, strategy, &task.options)
        {
            Ok(page) => page,
            Err(e) => {
                return self.finish_task(&mut task, TaskEnd::Failed(e.to_string()), progress)
            }
        };
        if let Step::Stop(outcome) =
            self.checkpoint(&mut task, EXTRACTED, "Page extracted", progress)
        {
            return outcome;
        }

        if let Err(e) = self.store_page(&task.document_id, &page) {
            error!("Failed to store result of {}: {}", task.task_id, e);
            return self.finish_task(
                &mut task,
                TaskEnd::Failed(INTERNAL_ERROR_MESSAGE.to_string()),
                progress,
            );
        }

        let total_pages = self.extractor.page_count(&loaded, strategy).unwrap_or(1);
        let result = TaskResult {
            text: page.text,
            confidence: page.confidence,
            metadata: page.metadata,
            layout: page.layout,
            total_pages,
            pages_processed: 1,
            truncated: false,
            pages: vec![PageOutcome {
                page: page.page,
                status: ItemStatus::Success,
                confidence: Some(page.confidence),
                error: None,
            }],
        };
        self.finish_task(&mut task, TaskEnd::Completed(result), progress)
    }

    /// Persists a milestone and looks for a pending cancel.
    fn checkpoint(
        &self,
        task: &mut TaskRecord,
        milestone: u8,
        message: &str,
        progress: &dyn ProgressReporter,
    ) -> Step {
        task.advance(milestone, Utc::now());
        match self.persist_task(task) {
            Ok(true) => {}
            Ok(false) => {
                self.gate.release(&task.task_id);
                return Step::Stop(WorkOutcome::Superseded);
            }
            Err(e) => {
                error!("Failed to persist progress of {}: {}", task.task_id, e);
                return Step::Stop(self.finish_task(
                    task,
                    TaskEnd::Failed(INTERNAL_ERROR_MESSAGE.to_string()),
                    progress,
                ));
            }
        }
        progress.report(ProgressEvent::Progress {
            progress: task.progress,
            document_id: Some(task.document_id.clone()),
            page: task.page_number,
            message: message.to_string(),
        });

        if self.gate.is_cancelled(&task.task_id) {
            return Step::Stop(self.finish_task(task, TaskEnd::Cancelled, progress));
        }
        Step::Continue
    }
}

fn inline_source(inline: &InlineContent) -> (PageSource, Strategy) {
    match inline.kind {
        ContentKind::Image => (
            PageSource::InlineImage(inline.data.clone()),
            Strategy::select(&ContentDescriptor::Inline { is_image: true }),
        ),
        ContentKind::Html => {
            debug!("Inline HTML: {}", sanitize::preview(&inline.data, 40));
            (
                PageSource::InlineHtml(inline.data.clone()),
                Strategy::select(&ContentDescriptor::Inline { is_image: false }),
            )
        }
    }
}
