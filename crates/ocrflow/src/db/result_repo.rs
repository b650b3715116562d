//! Result repository: extracted page text keyed by `(document_id, page_number)`.

use rusqlite::{params, Row};

use super::{first_row, Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct ResultRow {
    pub document_id: String,
    pub page_number: u32,
    pub text: String,
    pub confidence: f64,
    pub layout: Option<String>,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            document_id: row.get("document_id")?,
            page_number: row.get("page_number")?,
            text: row.get("text")?,
            confidence: row.get("confidence")?,
            layout: row.get("layout")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or replaces the extraction for a page. An existing row keeps its
/// `created_at`; everything else is overwritten.
pub fn upsert(db: &Database, result: &ResultRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO ocr_results (document_id, page_number, text, confidence, layout,
             metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(document_id, page_number) DO UPDATE SET
             text=excluded.text, confidence=excluded.confidence, layout=excluded.layout,
             metadata=excluded.metadata, updated_at=excluded.updated_at",
            params![
                result.document_id,
                result.page_number,
                result.text,
                result.confidence,
                result.layout,
                result.metadata,
                result.created_at,
                result.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find(
    db: &Database,
    document_id: &str,
    page_number: u32,
) -> Result<Option<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM ocr_results WHERE document_id = ?1 AND page_number = ?2")?;
        let rows = stmt.query_map(params![document_id, page_number], ResultRow::from_row)?;
        first_row(rows)
    })
}

/// All stored pages of a document, ascending by page.
pub fn list_for_document(
    db: &Database,
    document_id: &str,
) -> Result<Vec<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM ocr_results WHERE document_id = ?1 ORDER BY page_number ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], ResultRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM ocr_results", [], |r| r.get(0))?;
        Ok(count)
    })
}
