//! Batch repository: rows of the `batch_tasks` table.

use rusqlite::{params, Row};

use super::{first_row, Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct BatchRow {
    pub batch_id: String,
    /// JSON array.
    pub document_ids: String,
    /// JSON object of document id to page list.
    pub pages: String,
    pub options: String,
    pub total_documents: u32,
    pub total_pages: u32,
    pub processed_documents: u32,
    pub processed_pages: u32,
    pub successful_pages: u32,
    pub failed_pages: u32,
    pub confidence_sum: f64,
    pub average_confidence: f64,
    pub status: String,
    pub progress: u8,
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

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            batch_id: row.get("batch_id")?,
            document_ids: row.get("document_ids")?,
            pages: row.get("pages")?,
            options: row.get("options")?,
            total_documents: row.get("total_documents")?,
            total_pages: row.get("total_pages")?,
            processed_documents: row.get("processed_documents")?,
            processed_pages: row.get("processed_pages")?,
            successful_pages: row.get("successful_pages")?,
            failed_pages: row.get("failed_pages")?,
            confidence_sum: row.get("confidence_sum")?,
            average_confidence: row.get("average_confidence")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
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

pub fn insert(db: &Database, batch: &BatchRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batch_tasks (batch_id, document_ids, pages, options, total_documents,
             total_pages, processed_documents, processed_pages, successful_pages, failed_pages,
             confidence_sum, average_confidence, status, progress, estimated_seconds, result,
             error_message, cancel_reason, cancelled_at, created_at, started_at, updated_at,
             completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                batch.batch_id,
                batch.document_ids,
                batch.pages,
                batch.options,
                batch.total_documents,
                batch.total_pages,
                batch.processed_documents,
                batch.processed_pages,
                batch.successful_pages,
                batch.failed_pages,
                batch.confidence_sum,
                batch.average_confidence,
                batch.status,
                batch.progress,
                batch.estimated_seconds,
                batch.result,
                batch.error_message,
                batch.cancel_reason,
                batch.cancelled_at,
                batch.created_at,
                batch.started_at,
                batch.updated_at,
                batch.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes counters, progress and terminal fields of a batch that is still
/// `processing`. Returns `false` when the stored batch is missing or terminal.
pub fn update_if_processing(db: &Database, batch: &BatchRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batch_tasks SET processed_documents=?2, processed_pages=?3,
             successful_pages=?4, failed_pages=?5, confidence_sum=?6, average_confidence=?7,
             status=?8, progress=?9, result=?10, error_message=?11, cancel_reason=?12,
             cancelled_at=?13, updated_at=?14, completed_at=?15
             WHERE batch_id=?1 AND status='processing'",
            params![
                batch.batch_id,
                batch.processed_documents,
                batch.processed_pages,
                batch.successful_pages,
                batch.failed_pages,
                batch.confidence_sum,
                batch.average_confidence,
                batch.status,
                batch.progress,
                batch.result,
                batch.error_message,
                batch.cancel_reason,
                batch.cancelled_at,
                batch.updated_at,
                batch.completed_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

pub fn find_by_id(db: &Database, batch_id: &str) -> Result<Option<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM batch_tasks WHERE batch_id = ?1")?;
        let rows = stmt.query_map(params![batch_id], BatchRow::from_row)?;
        first_row(rows)
    })
}

/// `(status, count)` pairs over all batches.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM batch_tasks GROUP BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes terminal batches that finished before `cutoff` (RFC 3339).
pub fn delete_finished_before(db: &Database, cutoff: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM batch_tasks WHERE status != 'processing' AND completed_at IS NOT NULL
             AND completed_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted as u64)
    })
}

/// Fails every batch still `processing`. Used at startup, when no worker
/// can own them any more.
pub fn fail_processing(db: &Database, message: &str, at: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batch_tasks SET status='failed', error_message=?1, updated_at=?2,
             completed_at=?2 WHERE status='processing'",
            params![message, at],
        )?;
        Ok(changed as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_batch(id: &str) -> BatchRow {
        BatchRow {
            batch_id: id.to_string(),
            document_ids: r#"["doc-1","doc-2"]"#.to_string(),
            pages: "{}".to_string(),
            options: "{}".to_string(),
            total_documents: 2,
            total_pages: 2,
            processed_documents: 0,
            processed_pages: 0,
            successful_pages: 0,
            failed_pages: 0,
            confidence_sum: 0.0,
            average_confidence: 0.0,
            status: "processing".to_string(),
            progress: 0,
            estimated_seconds: 20,
            result: None,
            error_message: None,
            cancel_reason: None,
            cancelled_at: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            completed_at: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_batch("batch_ocr_00000001")).unwrap();

        let found = find_by_id(&db, "batch_ocr_00000001").unwrap().unwrap();
        assert_eq!(found.total_documents, 2);
        assert_eq!(found.document_ids, r#"["doc-1","doc-2"]"#);
        assert_eq!(found.status, "processing");
    }

    #[test]
    fn test_counter_update() {
        let db = test_db();
        let mut batch = sample_batch("b1");
        insert(&db, &batch).unwrap();

        batch.processed_pages = 1;
        batch.successful_pages = 1;
        batch.confidence_sum = 90.0;
        batch.average_confidence = 90.0;
        batch.progress = 50;
        assert!(update_if_processing(&db, &batch).unwrap());

        let found = find_by_id(&db, "b1").unwrap().unwrap();
        assert_eq!(found.processed_pages, 1);
        assert_eq!(found.average_confidence, 90.0);
        assert_eq!(found.progress, 50);
    }

    #[test]
    fn test_inconsistent_counters_rejected() {
        let db = test_db();
        let mut batch = sample_batch("b2");
        insert(&db, &batch).unwrap();

        batch.processed_pages = 1;
        assert!(update_if_processing(&db, &batch).is_err());
    }

    #[test]
    fn test_terminal_batch_not_updated() {
        let db = test_db();
        let mut batch = sample_batch("b3");
        batch.status = "cancelled".to_string();
        insert(&db, &batch).unwrap();

        batch.status = "completed".to_string();
        assert!(!update_if_processing(&db, &batch).unwrap());
    }

    #[test]
    fn test_count_and_prune() {
        let db = test_db();
        let mut done = sample_batch("done");
        done.status = "completed".to_string();
        done.completed_at = Some("2026-01-01T00:00:00Z".to_string());
        insert(&db, &done).unwrap();
        insert(&db, &sample_batch("running")).unwrap();

        let mut counts = count_by_status(&db).unwrap();
        counts.sort();
        assert_eq!(
            counts,
            vec![("completed".to_string(), 1), ("processing".to_string(), 1)]
        );

        assert_eq!(
            delete_finished_before(&db, "2026-06-01T00:00:00Z").unwrap(),
            1
        );
        assert!(find_by_id(&db, "done").unwrap().is_none());
        assert!(find_by_id(&db, "running").unwrap().is_some());
    }

    #[test]
    fn test_fail_processing() {
        let db = test_db();
        insert(&db, &sample_batch("stuck")).unwrap();

        assert_eq!(
            fail_processing(&db, "interrupted", "2026-02-01T00:00:00Z").unwrap(),
            1
        );
        assert_eq!(
            fail_processing(&db, "interrupted", "2026-02-02T00:00:00Z").unwrap(),
            0
        );
        let stuck = find_by_id(&db, "stuck").unwrap().unwrap();
        assert_eq!(stuck.status, "failed");
        assert_eq!(stuck.error_message.as_deref(), Some("interrupted"));
    }
}
