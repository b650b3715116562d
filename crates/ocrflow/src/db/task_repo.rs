//! Task repository: rows of the `ocr_tasks` table.

use rusqlite::{params, Row};

use super::{first_row, Database, DatabaseError};

/// A raw task row. JSON columns and timestamps are kept as text.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub task_id: String,
    pub document_id: String,
    pub page_number: Option<u32>,
    pub kind: String,
    pub content_kind: Option<String>,
    pub content_length: Option<u64>,
    pub status: String,
    pub progress: u8,
    pub options: String,
    pub estimated_seconds: u64,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<String>,
    pub created_at: String,
    pub started_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            task_id: row.get("task_id")?,
            document_id: row.get("document_id")?,
            page_number: row.get("page_number")?,
            kind: row.get("kind")?,
            content_kind: row.get("content_kind")?,
            content_length: row.get("content_length")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            options: row.get("options")?,
            estimated_seconds: row.get("estimated_seconds")?,
            result: row.get("result")?,
            error_message: row.get("error_message")?,
            cancel_reason: row.get("cancel_reason")?,
            cancelled_at: row.get("cancelled_at")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

pub fn insert(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO ocr_tasks (task_id, document_id, page_number, kind, content_kind,
             content_length, status, progress, options, estimated_seconds, result,
             error_message, cancel_reason, cancelled_at, created_at, started_at, updated_at,
             completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18)",
            params![
                task.task_id,
                task.document_id,
                task.page_number,
                task.kind,
                task.content_kind,
                task.content_length,
                task.status,
                task.progress,
                task.options,
                task.estimated_seconds,
                task.result,
                task.error_message,
                task.cancel_reason,
                task.cancelled_at,
                task.created_at,
                task.started_at,
                task.updated_at,
                task.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable columns of a task that is still `processing`.
///
/// Returns `false` when no row was changed because the stored task is
/// missing or already terminal.
pub fn update_if_processing(db: &Database, task: &TaskRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_tasks SET status=?2, progress=?3, result=?4, error_message=?5,
             cancel_reason=?6, cancelled_at=?7, updated_at=?8, completed_at=?9
             WHERE task_id=?1 AND status='processing'",
            params![
                task.task_id,
                task.status,
                task.progress,
                task.result,
                task.error_message,
                task.cancel_reason,
                task.cancelled_at,
                task.updated_at,
                task.completed_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

pub fn find_by_id(db: &Database, task_id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM ocr_tasks WHERE task_id = ?1")?;
        let rows = stmt.query_map(params![task_id], TaskRow::from_row)?;
        first_row(rows)
    })
}

/// Tasks for a document, newest first.
pub fn list_by_document(db: &Database, document_id: &str) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM ocr_tasks WHERE document_id = ?1 ORDER BY created_at DESC, task_id",
        )?;
        let rows = stmt
            .query_map(params![document_id], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// `(status, count)` pairs over all tasks.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM ocr_tasks GROUP BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes terminal tasks that finished before `cutoff` (RFC 3339).
pub fn delete_finished_before(db: &Database, cutoff: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM ocr_tasks WHERE status != 'processing' AND completed_at IS NOT NULL
             AND completed_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted as u64)
    })
}

/// Fails every task still `processing`. Used at startup, when no worker
/// can own them any more.
pub fn fail_processing(db: &Database, message: &str, at: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_tasks SET status='failed', error_message=?1, updated_at=?2,
             completed_at=?2 WHERE status='processing'",
            params![message, at],
        )?;
        Ok(changed as u64)
    })
}
