//! Point-in-time status views of tasks and batches for polling clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::store::TaskStore;
use crate::task::{BatchItem, BatchRecord, TaskKind, TaskRecord, TaskResult, TaskStatus};

/// Counters of a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub processed_pages: u32,
    pub successful_pages: u32,
    pub failed_pages: u32,
    pub average_confidence: f64,
    /// Present once the batch completed.
    pub items: Option<Vec<BatchItem>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotResult {
    Task(TaskResult),
    Batch(BatchSummary),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    /// Seconds, only while processing with some progress made.
    pub estimated_time_remaining: Option<u64>,
    pub current_document: Option<String>,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub result: Option<SnapshotResult>,
    pub error_message: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `estimated_seconds - elapsed`, floored at zero. `None` unless the
/// record is processing and has made progress.
pub fn estimate_remaining(
    status: TaskStatus,
    progress: u8,
    estimated_seconds: u64,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<u64> {
    if status != TaskStatus::Processing || progress == 0 {
        return None;
    }
    let elapsed = (now - started_at).num_seconds().max(0) as u64;
    Some(estimated_seconds.saturating_sub(elapsed))
}

pub fn task_snapshot(task: &TaskRecord, now: DateTime<Utc>) -> StatusSnapshot {
    let total_pages = match (&task.result, task.page_number) {
        (Some(result), _) => Some(result.total_pages),
        (None, Some(_)) => Some(1),
        (None, None) => None,
    };

    StatusSnapshot {
        id: task.task_id.clone(),
        kind: task.kind,
        status: task.status,
        progress: task.progress,
        estimated_time_remaining: estimate_remaining(
            task.status,
            task.progress,
            task.estimated_seconds,
            task.started_at,
            now,
        ),
        current_document: Some(task.document_id.clone()),
        current_page: task.page_number,
        total_pages,
        result: match task.status {
            TaskStatus::Completed => task.result.clone().map(SnapshotResult::Task),
            _ => None,
        },
        error_message: task.error_message.clone(),
        cancel_reason: task.cancel_reason.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
    }
}

pub fn batch_snapshot(batch: &BatchRecord, now: DateTime<Utc>) -> StatusSnapshot {
    // The document being worked on is the first one not yet finished.
    let current_document = match batch.status {
        TaskStatus::Processing => batch
            .document_ids
            .get(batch.processed_documents as usize)
            .cloned(),
        _ => None,
    };

    let result = match batch.status {
        TaskStatus::Completed | TaskStatus::Failed => Some(SnapshotResult::Batch(BatchSummary {
            processed_pages: batch.processed_pages,
            successful_pages: batch.successful_pages,
            failed_pages: batch.failed_pages,
            average_confidence: batch.average_confidence,
            items: batch.result.as_ref().map(|r| r.items.clone()),
        })),
        _ => None,
    };

    StatusSnapshot {
        id: batch.batch_id.clone(),
        kind: TaskKind::Batch,
        status: batch.status,
        progress: batch.progress,
        estimated_time_remaining: estimate_remaining(
            batch.status,
            batch.progress,
            batch.estimated_seconds,
            batch.started_at,
            now,
        ),
        current_document,
        current_page: None,
        total_pages: Some(batch.total_pages),
        result,
        error_message: batch.error_message.clone(),
        cancel_reason: batch.cancel_reason.clone(),
        created_at: batch.created_at,
        updated_at: batch.updated_at,
    }
}

/// Looks up a task or batch by id.
pub fn status(store: &dyn TaskStore, id: &str) -> Result<StatusSnapshot, TaskError> {
    let now = Utc::now();
    if let Some(task) = store.find_task(id)? {
        return Ok(task_snapshot(&task, now));
    }
    if let Some(batch) = store.find_batch(id)? {
        return Ok(batch_snapshot(&batch, now));
    }
    Err(TaskError::NotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::task::{BatchResult, ItemStatus, OutputFormat, TaskOptions};
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn options() -> TaskOptions {
        TaskOptions {
            language: "auto".to_string(),
            confidence_threshold: 70,
            preprocess: true,
            format: OutputFormat::Text,
            page_seg_mode: Some(6),
        }
    }

    fn batch(started_at: DateTime<Utc>) -> BatchRecord {
        BatchRecord {
            batch_id: "batch_ocr_0000beef".to_string(),
            document_ids: vec!["a".to_string(), "b".to_string()],
            pages: BTreeMap::new(),
            options: options(),
            total_documents: 2,
            total_pages: 2,
            processed_documents: 0,
            processed_pages: 0,
            successful_pages: 0,
            failed_pages: 0,
            confidence_sum: 0.0,
            average_confidence: 0.0,
            status: TaskStatus::Processing,
            progress: 0,
            estimated_seconds: 20,
            result: None,
            error_message: None,
            cancel_reason: None,
            cancelled_at: None,
            created_at: started_at,
            started_at,
            updated_at: started_at,
            completed_at: None,
        }
    }

    #[test]
    fn test_no_estimate_without_progress() {
        let now = Utc::now();
        assert_eq!(
            estimate_remaining(TaskStatus::Processing, 0, 30, now, now),
            None
        );
        assert_eq!(
            estimate_remaining(TaskStatus::Completed, 100, 30, now, now),
            None
        );
    }

    #[test]
    fn test_estimate_counts_down_to_zero() {
        let now = Utc::now();
        let started = now - Duration::seconds(10);
        assert_eq!(
            estimate_remaining(TaskStatus::Processing, 25, 15, started, now),
            Some(5)
        );
        let long_ago = now - Duration::seconds(100);
        assert_eq!(
            estimate_remaining(TaskStatus::Processing, 50, 15, long_ago, now),
            Some(0)
        );
    }

    #[test]
    fn test_batch_snapshot_while_processing() {
        let now = Utc::now();
        let mut b = batch(now - Duration::seconds(4));
        b.record_page(Some(90.0));
        b.processed_documents = 1;

        let snap = batch_snapshot(&b, now);
        assert_eq!(snap.kind, TaskKind::Batch);
        assert_eq!(snap.progress, 50);
        assert_eq!(snap.current_document.as_deref(), Some("b"));
        assert_eq!(snap.total_pages, Some(2));
        assert_eq!(snap.estimated_time_remaining, Some(16));
        assert!(snap.result.is_none());
    }

    #[test]
    fn test_completed_batch_snapshot_has_items() {
        let now = Utc::now();
        let mut b = batch(now);
        b.record_page(Some(90.0));
        b.record_page(None);
        b.processed_documents = 2;
        let items = vec![BatchItem {
            document_id: "a".to_string(),
            page: 1,
            status: ItemStatus::Success,
            confidence: Some(90.0),
            error: None,
        }];
        let summary: BatchResult = b.summary(items);
        b.mark_completed(summary, now);

        let snap = batch_snapshot(&b, now);
        assert_eq!(snap.estimated_time_remaining, None);
        assert_eq!(snap.current_document, None);
        match snap.result {
            Some(SnapshotResult::Batch(summary)) => {
                assert_eq!(summary.successful_pages, 1);
                assert_eq!(summary.failed_pages, 1);
                assert_eq!(summary.average_confidence, 90.0);
                assert_eq!(summary.items.map(|i| i.len()), Some(1));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_failed_batch_reports_counts_without_items() {
        let now = Utc::now();
        let mut b = batch(now);
        b.record_page(Some(80.0));
        b.mark_failed("Internal error while processing task", now);

        match batch_snapshot(&b, now).result {
            Some(SnapshotResult::Batch(summary)) => {
                assert_eq!(summary.processed_pages, 1);
                assert!(summary.items.is_none());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_status_lookup() {
        let db = Database::open_in_memory().unwrap();
        db.insert_batch(&batch(Utc::now())).unwrap();

        let snap = status(&db, "batch_ocr_0000beef").unwrap();
        assert_eq!(snap.status, TaskStatus::Processing);
        assert!(matches!(
            status(&db, "page_ocr_nothere"),
            Err(TaskError::NotFound(_))
        ));
    }
}
