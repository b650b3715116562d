//! Persistence seam for task records, batch records and extracted pages.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::batch_repo::{self, BatchRow};
use crate::db::result_repo::{self, ResultRow};
use crate::db::task_repo::{self, TaskRow};
use crate::db::{Database, DatabaseError};
use crate::task::{
    BatchRecord, ResultEntry, Statistics, StatusCounts, TaskRecord, TaskStatus,
};

/// Rows removed by [`TaskStore::prune_finished`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub tasks: u64,
    pub batches: u64,
}

/// Records failed by [`TaskStore::fail_interrupted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub tasks: u64,
    pub batches: u64,
}

impl RecoveryReport {
    pub fn total(&self) -> u64 {
        self.tasks + self.batches
    }
}

/// Durable storage used by the pipeline. Every call is atomic per row.
pub trait TaskStore: Send + Sync {
    fn insert_task(&self, task: &TaskRecord) -> Result<(), DatabaseError>;

    /// Writes the task if the stored record is still processing. Returns
    /// `false` when the stored record was missing or already terminal.
    fn update_task(&self, task: &TaskRecord) -> Result<bool, DatabaseError>;

    fn find_task(&self, task_id: &str) -> Result<Option<TaskRecord>, DatabaseError>;

    /// Task history for a document, newest first.
    fn tasks_for_document(&self, document_id: &str) -> Result<Vec<TaskRecord>, DatabaseError>;

    fn insert_batch(&self, batch: &BatchRecord) -> Result<(), DatabaseError>;

    /// Same contract as [`TaskStore::update_task`].
    fn update_batch(&self, batch: &BatchRecord) -> Result<bool, DatabaseError>;

    fn find_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, DatabaseError>;

    fn upsert_result(&self, entry: &ResultEntry) -> Result<(), DatabaseError>;

    fn find_result(
        &self,
        document_id: &str,
        page_number: u32,
    ) -> Result<Option<ResultEntry>, DatabaseError>;

    fn results_for_document(&self, document_id: &str) -> Result<Vec<ResultEntry>, DatabaseError>;

    fn statistics(&self) -> Result<Statistics, DatabaseError>;

    /// Removes terminal task and batch records finished before `cutoff`.
    /// Stored results are kept.
    fn prune_finished(&self, cutoff: DateTime<Utc>) -> Result<PruneReport, DatabaseError>;

    /// Fails every task and batch still `processing` with `message`. Only
    /// safe while no runner owns any record.
    fn fail_interrupted(
        &self,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<RecoveryReport, DatabaseError>;
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            column,
            value: value.to_string(),
        })
}

fn parse_opt_time(
    column: &'static str,
    value: &Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.as_deref().map(|v| parse_time(column, v)).transpose()
}

fn parse_enum<T: FromStr>(column: &'static str, value: &str) -> Result<T, DatabaseError> {
    value.parse::<T>().map_err(|_| DatabaseError::InvalidValue {
        column,
        value: value.to_string(),
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    Ok(serde_json::to_string(value)?)
}

fn to_opt_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>, DatabaseError> {
    value.as_ref().map(to_json).transpose()
}

fn from_json<T: DeserializeOwned>(value: &str) -> Result<T, DatabaseError> {
    Ok(serde_json::from_str(value)?)
}

fn from_opt_json<T: DeserializeOwned>(value: &Option<String>) -> Result<Option<T>, DatabaseError> {
    value.as_deref().map(from_json).transpose()
}

impl TryFrom<&TaskRecord> for TaskRow {
    type Error = DatabaseError;

    fn try_from(task: &TaskRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            task_id: task.task_id.clone(),
            document_id: task.document_id.clone(),
            page_number: task.page_number,
            kind: task.kind.as_str().to_string(),
            content_kind: task.content_kind.map(|k| k.as_str().to_string()),
            content_length: task.content_length,
            status: task.status.as_str().to_string(),
            progress: task.progress,
            options: to_json(&task.options)?,
            estimated_seconds: task.estimated_seconds,
            result: to_opt_json(&task.result)?,
            error_message: task.error_message.clone(),
            cancel_reason: task.cancel_reason.clone(),
            cancelled_at: task.cancelled_at.as_ref().map(format_time),
            created_at: format_time(&task.created_at),
            started_at: format_time(&task.started_at),
            updated_at: format_time(&task.updated_at),
            completed_at: task.completed_at.as_ref().map(format_time),
        })
    }
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = DatabaseError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: parse_enum("kind", &row.kind)?,
            content_kind: row
                .content_kind
                .as_deref()
                .map(|k| parse_enum("content_kind", k))
                .transpose()?,
            status: parse_enum("status", &row.status)?,
            options: from_json(&row.options)?,
            result: from_opt_json(&row.result)?,
            cancelled_at: parse_opt_time("cancelled_at", &row.cancelled_at)?,
            created_at: parse_time("created_at", &row.created_at)?,
            started_at: parse_time("started_at", &row.started_at)?,
            updated_at: parse_time("updated_at", &row.updated_at)?,
            completed_at: parse_opt_time("completed_at", &row.completed_at)?,
            task_id: row.task_id,
            document_id: row.document_id,
            page_number: row.page_number,
            content_length: row.content_length,
            progress: row.progress,
            estimated_seconds: row.estimated_seconds,
            error_message: row.error_message,
            cancel_reason: row.cancel_reason,
        })
    }
}

impl TryFrom<&BatchRecord> for BatchRow {
    type Error = DatabaseError;

    fn try_from(batch: &BatchRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            batch_id: batch.batch_id.clone(),
            document_ids: to_json(&batch.document_ids)?,
            pages: to_json(&batch.pages)?,
            options: to_json(&batch.options)?,
            total_documents: batch.total_documents,
            total_pages: batch.total_pages,
            processed_documents: batch.processed_documents,
            processed_pages: batch.processed_pages,
            successful_pages: batch.successful_pages,
            failed_pages: batch.failed_pages,
            confidence_sum: batch.confidence_sum,
            average_confidence: batch.average_confidence,
            status: batch.status.as_str().to_string(),
            progress: batch.progress,
            estimated_seconds: batch.estimated_seconds,
            result: to_opt_json(&batch.result)?,
            error_message: batch.error_message.clone(),
            cancel_reason: batch.cancel_reason.clone(),
            cancelled_at: batch.cancelled_at.as_ref().map(format_time),
            created_at: format_time(&batch.created_at),
            started_at: format_time(&batch.started_at),
            updated_at: format_time(&batch.updated_at),
            completed_at: batch.completed_at.as_ref().map(format_time),
        })
    }
}

impl TryFrom<BatchRow> for BatchRecord {
    type Error = DatabaseError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        Ok(Self {
            document_ids: from_json(&row.document_ids)?,
            pages: from_json(&row.pages)?,
            options: from_json(&row.options)?,
            status: parse_enum("status", &row.status)?,
            result: from_opt_json(&row.result)?,
            cancelled_at: parse_opt_time("cancelled_at", &row.cancelled_at)?,
            created_at: parse_time("created_at", &row.created_at)?,
            started_at: parse_time("started_at", &row.started_at)?,
            updated_at: parse_time("updated_at", &row.updated_at)?,
            completed_at: parse_opt_time("completed_at", &row.completed_at)?,
            batch_id: row.batch_id,
            total_documents: row.total_documents,
            total_pages: row.total_pages,
            processed_documents: row.processed_documents,
            processed_pages: row.processed_pages,
            successful_pages: row.successful_pages,
            failed_pages: row.failed_pages,
            confidence_sum: row.confidence_sum,
            average_confidence: row.average_confidence,
            progress: row.progress,
            estimated_seconds: row.estimated_seconds,
            error_message: row.error_message,
            cancel_reason: row.cancel_reason,
        })
    }
}

impl TryFrom<&ResultEntry> for ResultRow {
    type Error = DatabaseError;

    fn try_from(entry: &ResultEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            document_id: entry.document_id.clone(),
            page_number: entry.page_number,
            text: entry.text.clone(),
            confidence: entry.confidence,
            layout: to_opt_json(&entry.layout)?,
            metadata: to_json(&entry.metadata)?,
            created_at: format_time(&entry.created_at),
            updated_at: format_time(&entry.updated_at),
        })
    }
}

impl TryFrom<ResultRow> for ResultEntry {
    type Error = DatabaseError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        Ok(Self {
            layout: from_opt_json(&row.layout)?,
            metadata: from_json(&row.metadata)?,
            created_at: parse_time("created_at", &row.created_at)?,
            updated_at: parse_time("updated_at", &row.updated_at)?,
            document_id: row.document_id,
            page_number: row.page_number,
            text: row.text,
            confidence: row.confidence,
        })
    }
}

fn counts_from(rows: Vec<(String, u64)>) -> Result<StatusCounts, DatabaseError> {
    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        counts.add(parse_enum::<TaskStatus>("status", &status)?, count);
    }
    Ok(counts)
}

impl TaskStore for Database {
    fn insert_task(&self, task: &TaskRecord) -> Result<(), DatabaseError> {
        task_repo::insert(self, &TaskRow::try_from(task)?)
    }

    fn update_task(&self, task: &TaskRecord) -> Result<bool, DatabaseError> {
        task_repo::update_if_processing(self, &TaskRow::try_from(task)?)
    }

    fn find_task(&self, task_id: &str) -> Result<Option<TaskRecord>, DatabaseError> {
        task_repo::find_by_id(self, task_id)?
            .map(TaskRecord::try_from)
            .transpose()
    }

    fn tasks_for_document(&self, document_id: &str) -> Result<Vec<TaskRecord>, DatabaseError> {
        task_repo::list_by_document(self, document_id)?
            .into_iter()
            .map(TaskRecord::try_from)
            .collect()
    }

    fn insert_batch(&self, batch: &BatchRecord) -> Result<(), DatabaseError> {
        batch_repo::insert(self, &BatchRow::try_from(batch)?)
    }

    fn update_batch(&self, batch: &BatchRecord) -> Result<bool, DatabaseError> {
        batch_repo::update_if_processing(self, &BatchRow::try_from(batch)?)
    }

    fn find_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, DatabaseError> {
        batch_repo::find_by_id(self, batch_id)?
            .map(BatchRecord::try_from)
            .transpose()
    }

    fn upsert_result(&self, entry: &ResultEntry) -> Result<(), DatabaseError> {
        result_repo::upsert(self, &ResultRow::try_from(entry)?)
    }

    fn find_result(
        &self,
        document_id: &str,
        page_number: u32,
    ) -> Result<Option<ResultEntry>, DatabaseError> {
        result_repo::find(self, document_id, page_number)?
            .map(ResultEntry::try_from)
            .transpose()
    }

    fn results_for_document(&self, document_id: &str) -> Result<Vec<ResultEntry>, DatabaseError> {
        result_repo::list_for_document(self, document_id)?
            .into_iter()
            .map(ResultEntry::try_from)
            .collect()
    }

    fn statistics(&self) -> Result<Statistics, DatabaseError> {
        Ok(Statistics {
            tasks: counts_from(task_repo::count_by_status(self)?)?,
            batches: counts_from(batch_repo::count_by_status(self)?)?,
            stored_results: result_repo::count(self)?,
        })
    }

    fn prune_finished(&self, cutoff: DateTime<Utc>) -> Result<PruneReport, DatabaseError> {
        let cutoff = format_time(&cutoff);
        Ok(PruneReport {
            tasks: task_repo::delete_finished_before(self, &cutoff)?,
            batches: batch_repo::delete_finished_before(self, &cutoff)?,
        })
    }

    fn fail_interrupted(
        &self,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<RecoveryReport, DatabaseError> {
        let at = format_time(&at);
        Ok(RecoveryReport {
            tasks: task_repo::fail_processing(self, message, &at)?,
            batches: batch_repo::fail_processing(self, message, &at)?,
        })
    }
}
