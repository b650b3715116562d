use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::processor::{Layout, Strategy};

/// Lifecycle state shared by tasks and batches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Page,
    Document,
    Batch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Page => "page",
            TaskKind::Document => "document",
            TaskKind::Batch => "batch",
        }
    }

    /// Identifier prefix for records of this kind.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TaskKind::Page => "page_ocr_",
            TaskKind::Document => "doc_ocr_",
            TaskKind::Batch => "batch_ocr_",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(TaskKind::Page),
            "document" => Ok(TaskKind::Document),
            "batch" => Ok(TaskKind::Batch),
            other => Err(format!("unknown task kind '{}'", other)),
        }
    }
}

/// Kind of content supplied inline with a single-page request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Base64-encoded raster image.
    Image,
    Html,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Image => "image",
            ContentKind::Html => "html",
        }
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ContentKind::Image),
            "html" => Ok(ContentKind::Html),
            other => Err(format!("unknown content kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    /// Text plus word/line/block positions.
    Layout,
}

/// Extraction options fixed when a task is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskOptions {
    /// Tesseract language string, or `auto` for the configured languages.
    pub language: String,
    pub confidence_threshold: u8,
    pub preprocess: bool,
    pub format: OutputFormat,
    /// `None` uses the configured page segmentation mode.
    pub page_seg_mode: Option<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
}

/// Metadata recorded for every extracted page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageMetadata {
    pub engine: String,
    /// Language passed to the OCR engine; `None` for native extraction.
    pub language: Option<String>,
    pub processing_ms: u64,
    pub strategy: Strategy,
    pub low_confidence: bool,
    pub format: OutputFormat,
}

/// Outcome of one page within a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageOutcome {
    pub page: u32,
    pub status: ItemStatus,
    pub confidence: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub text: String,
    pub confidence: f64,
    pub metadata: PageMetadata,
    pub layout: Option<Layout>,
    /// Pages in the source. For capped PDFs this exceeds `pages_processed`.
    pub total_pages: u32,
    pub pages_processed: u32,
    pub truncated: bool,
    pub pages: Vec<PageOutcome>,
}

/// Persisted state of a single-page or whole-document task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub document_id: String,
    /// `None` for whole-document tasks.
    pub page_number: Option<u32>,
    pub kind: TaskKind,
    pub content_kind: Option<ContentKind>,
    pub content_length: Option<u64>,
    pub status: TaskStatus,
    pub progress: u8,
    pub options: TaskOptions,
    pub estimated_seconds: u64,
    pub result: Option<TaskResult>,
    pub error_message: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raises progress; never lowers it.
    pub fn advance(&mut self, progress: u8, at: DateTime<Utc>) {
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = at;
    }

    pub fn mark_completed(&mut self, result: TaskResult, at: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.updated_at = at;
        self.completed_at = Some(at);
    }

    /// Progress stays where the failure happened.
    pub fn mark_failed(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = at;
        self.completed_at = Some(at);
    }

    pub fn mark_cancelled(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.result = None;
        self.cancel_reason = Some(reason.into());
        self.cancelled_at = Some(at);
        self.updated_at = at;
        self.completed_at = Some(at);
    }
}

/// One processed page inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem {
    pub document_id: String,
    pub page: u32,
    pub status: ItemStatus,
    pub confidence: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
    pub processed_documents: u32,
    pub processed_pages: u32,
    pub successful_pages: u32,
    pub failed_pages: u32,
    pub average_confidence: f64,
}

/// Persisted state of a multi-document batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRecord {
    pub batch_id: String,
    pub document_ids: Vec<String>,
    /// Requested pages per document, ascending and deduplicated.
    pub pages: BTreeMap<String, Vec<u32>>,
    pub options: TaskOptions,
    pub total_documents: u32,
    pub total_pages: u32,
    pub processed_documents: u32,
    pub processed_pages: u32,
    pub successful_pages: u32,
    pub failed_pages: u32,
    pub confidence_sum: f64,
    pub average_confidence: f64,
    pub status: TaskStatus,
    pub progress: u8,
    pub estimated_seconds: u64,
    pub result: Option<BatchResult>,
    pub error_message: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pages to process for a document; `[1]` when none were requested.
    pub fn pages_for(&self, document_id: &str) -> Vec<u32> {
        match self.pages.get(document_id) {
            Some(pages) if !pages.is_empty() => pages.clone(),
            _ => vec![1],
        }
    }

    pub fn mark_completed(&mut self, result: BatchResult, at: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.updated_at = at;
        self.completed_at = Some(at);
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = at;
        self.completed_at = Some(at);
    }

    /// Counters keep the pages processed before the cancel.
    pub fn mark_cancelled(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.result = None;
        self.cancel_reason = Some(reason.into());
        self.cancelled_at = Some(at);
        self.updated_at = at;
        self.completed_at = Some(at);
    }

    /// Snapshot of the counters with the given items.
    pub fn summary(&self, items: Vec<BatchItem>) -> BatchResult {
        BatchResult {
            items,
            processed_documents: self.processed_documents,
            processed_pages: self.processed_pages,
            successful_pages: self.successful_pages,
            failed_pages: self.failed_pages,
            average_confidence: self.average_confidence,
        }
    }

    /// Counts a processed page and recomputes progress and the average.
    pub fn record_page(&mut self, confidence: Option<f64>) {
        self.processed_pages += 1;
        match confidence {
            Some(c) => {
                self.successful_pages += 1;
                self.confidence_sum += c;
            }
            None => self.failed_pages += 1,
        }
        self.average_confidence = average(self.confidence_sum, self.successful_pages);
        self.progress = progress_percent(self.processed_pages, self.total_pages);
    }
}

/// A stored extraction, unique per `(document_id, page_number)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEntry {
    pub document_id: String,
    pub page_number: u32,
    pub text: String,
    pub confidence: f64,
    pub layout: Option<Layout>,
    pub metadata: PageMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record counts per status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Processing => self.processing += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.processing + self.completed + self.failed + self.cancelled
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistics {
    pub tasks: StatusCounts,
    pub batches: StatusCounts,
    pub stored_results: u64,
}

/// Confidence of one stored page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageConfidence {
    pub page: u32,
    pub confidence: f64,
    pub engine: String,
}

/// Aggregates over the stored pages of one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentStatistics {
    pub document_id: String,
    pub pages: u32,
    pub average_confidence: f64,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    /// Pages below the confidence threshold.
    pub low_confidence_pages: u32,
    pub languages: BTreeMap<String, u32>,
    pub engines: BTreeMap<String, u32>,
    pub per_page: Vec<PageConfidence>,
}

impl DocumentStatistics {
    pub fn from_results(document_id: &str, entries: &[ResultEntry], threshold: u8) -> Self {
        let mut stats = Self {
            document_id: document_id.to_string(),
            ..Self::default()
        };
        let mut sum = 0.0;

        for entry in entries {
            let confidence = entry.confidence;
            stats.pages += 1;
            sum += confidence;
            stats.min_confidence =
                Some(stats.min_confidence.map_or(confidence, |m| m.min(confidence)));
            stats.max_confidence =
                Some(stats.max_confidence.map_or(confidence, |m| m.max(confidence)));
            if confidence < f64::from(threshold) {
                stats.low_confidence_pages += 1;
            }
            if let Some(language) = &entry.metadata.language {
                *stats.languages.entry(language.clone()).or_insert(0) += 1;
            }
            *stats.engines.entry(entry.metadata.engine.clone()).or_insert(0) += 1;
            stats.per_page.push(PageConfidence {
                page: entry.page_number,
                confidence,
                engine: entry.metadata.engine.clone(),
            });
        }

        stats.average_confidence = average(sum, stats.pages);
        stats
    }
}

/// `floor(done * 100 / total)`, capped at 100; 0 when `total` is 0.
pub fn progress_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u64::from(done) * 100 / u64::from(total);
    pct.min(100) as u8
}

/// Mean of `count` values summing to `sum`; 0.0 when there are none.
pub fn average(sum: f64, count: u32) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}
