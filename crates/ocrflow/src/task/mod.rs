//! Task records and the requests that create them.

pub mod model;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::loader::is_valid_language;
use crate::config::TaskConfig;
use crate::error::TaskError;

pub use model::{
    average, progress_percent, BatchItem, BatchRecord, BatchResult, ContentKind,
    DocumentStatistics, ItemStatus, OutputFormat, PageConfidence, PageMetadata, PageOutcome,
    ResultEntry, Statistics, StatusCounts, TaskKind, TaskOptions, TaskRecord, TaskResult,
    TaskStatus,
};

/// Page segmentation mode used by batches unless overridden (uniform block of text).
pub const BATCH_PAGE_SEG_MODE: u8 = 6;

const MAX_PAGE_SEG_MODE: u8 = 13;

/// Content supplied with a single-page request instead of the stored file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineContent {
    pub kind: ContentKind,
    /// Base64 for images, markup for HTML.
    pub data: String,
}

/// Caller-supplied option values; unset fields take the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionOverrides {
    pub language: Option<String>,
    pub confidence_threshold: Option<u8>,
    pub preprocess: Option<bool>,
    pub format: Option<OutputFormat>,
    pub page_seg_mode: Option<u8>,
}

impl OptionOverrides {
    pub fn resolve(&self, defaults: TaskOptions) -> Result<TaskOptions, TaskError> {
        let options = TaskOptions {
            language: self.language.clone().unwrap_or(defaults.language),
            confidence_threshold: self
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            preprocess: self.preprocess.unwrap_or(defaults.preprocess),
            format: self.format.unwrap_or(defaults.format),
            page_seg_mode: self.page_seg_mode.or(defaults.page_seg_mode),
        };

        if !is_valid_language(&options.language) {
            return Err(TaskError::InvalidInput(format!(
                "Invalid language: '{}'",
                options.language
            )));
        }
        if options.confidence_threshold > 100 {
            return Err(TaskError::InvalidInput(
                "Confidence threshold must be between 0 and 100".to_string(),
            ));
        }
        if options.page_seg_mode.is_some_and(|m| m > MAX_PAGE_SEG_MODE) {
            return Err(TaskError::InvalidInput(format!(
                "Page segmentation mode must be between 0 and {}",
                MAX_PAGE_SEG_MODE
            )));
        }

        Ok(options)
    }
}

/// Single-page extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub document_id: String,
    pub page_number: u32,
    #[serde(default)]
    pub content: Option<InlineContent>,
    #[serde(default)]
    pub options: OptionOverrides,
}

/// Whole-document extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub document_id: String,
    #[serde(default)]
    pub options: OptionOverrides,
}

/// Multi-document batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub document_ids: Vec<String>,
    /// Pages per document. Documents without an entry get page 1.
    #[serde(default)]
    pub pages: HashMap<String, Vec<u32>>,
    #[serde(default)]
    pub options: OptionOverrides,
}

/// Manually corrected text for one stored page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCorrection {
    pub document_id: String,
    pub page_number: u32,
    pub text: String,
    pub confidence: f64,
}

/// `page_ocr_1a2b3c4d`, `doc_ocr_...` or `batch_ocr_...`.
pub fn new_task_id(kind: TaskKind) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", kind.id_prefix(), &hex[..8])
}

pub fn default_options(tasks: &TaskConfig) -> TaskOptions {
    TaskOptions {
        language: tasks.default_language.clone(),
        confidence_threshold: tasks.default_confidence_threshold,
        preprocess: true,
        format: OutputFormat::Text,
        page_seg_mode: None,
    }
}

pub fn batch_default_options(tasks: &TaskConfig) -> TaskOptions {
    TaskOptions {
        page_seg_mode: Some(BATCH_PAGE_SEG_MODE),
        ..default_options(tasks)
    }
}

pub(crate) fn require_document_id(document_id: &str) -> Result<(), TaskError> {
    if document_id.trim().is_empty() {
        return Err(TaskError::InvalidInput(
            "Document id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Sorts and deduplicates requested pages. Rejects page 0 and pages
/// requested for documents outside the batch.
pub fn normalize_pages(
    document_ids: &[String],
    requested: &HashMap<String, Vec<u32>>,
) -> Result<BTreeMap<String, Vec<u32>>, TaskError> {
    let mut normalized = BTreeMap::new();

    for (document_id, pages) in requested {
        if !document_ids.contains(document_id) {
            return Err(TaskError::InvalidInput(format!(
                "Pages given for document '{}' which is not part of the batch",
                document_id
            )));
        }
        if pages.contains(&0) {
            return Err(TaskError::InvalidInput(format!(
                "Page numbers must be greater than 0 (document '{}')",
                document_id
            )));
        }
        let mut pages = pages.clone();
        pages.sort_unstable();
        pages.dedup();
        if !pages.is_empty() {
            normalized.insert(document_id.clone(), pages);
        }
    }

    Ok(normalized)
}

/// Sum of requested pages, counting one page for documents without an entry.
pub fn count_batch_pages(document_ids: &[String], pages: &BTreeMap<String, Vec<u32>>) -> u32 {
    document_ids
        .iter()
        .map(|id| pages.get(id).map_or(1, |p| p.len() as u32))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_task_ids() {
        let id = new_task_id(TaskKind::Page);
        assert!(id.starts_with("page_ocr_"));
        assert_eq!(id.len(), "page_ocr_".len() + 8);
        assert!(new_task_id(TaskKind::Document).starts_with("doc_ocr_"));
        assert!(new_task_id(TaskKind::Batch).starts_with("batch_ocr_"));
        assert_ne!(new_task_id(TaskKind::Page), new_task_id(TaskKind::Page));
    }

    #[test]
    fn test_defaults() {
        let tasks = TaskConfig::default();
        let options = default_options(&tasks);
        assert_eq!(options.language, "auto");
        assert_eq!(options.confidence_threshold, 70);
        assert!(options.preprocess);
        assert_eq!(options.format, OutputFormat::Text);
        assert_eq!(options.page_seg_mode, None);
        assert_eq!(batch_default_options(&tasks).page_seg_mode, Some(6));
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = OptionOverrides {
            language: Some("eng".to_string()),
            confidence_threshold: Some(90),
            format: Some(OutputFormat::Layout),
            ..Default::default()
        };
        let options = overrides
            .resolve(default_options(&TaskConfig::default()))
            .unwrap();
        assert_eq!(options.language, "eng");
        assert_eq!(options.confidence_threshold, 90);
        assert!(options.preprocess);
        assert_eq!(options.format, OutputFormat::Layout);
    }

    #[test]
    fn test_invalid_overrides() {
        let defaults = default_options(&TaskConfig::default());
        let bad_language = OptionOverrides {
            language: Some("../../etc".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_language.resolve(defaults.clone()),
            Err(TaskError::InvalidInput(_))
        ));

        let bad_threshold = OptionOverrides {
            confidence_threshold: Some(101),
            ..Default::default()
        };
        assert!(bad_threshold.resolve(defaults.clone()).is_err());

        let bad_psm = OptionOverrides {
            page_seg_mode: Some(14),
            ..Default::default()
        };
        assert!(bad_psm.resolve(defaults).is_err());
    }

    #[test]
    fn test_normalize_pages_sorts_and_dedups() {
        let document_ids = ids(&["a", "b"]);
        let requested = HashMap::from([
            ("a".to_string(), vec![3, 1, 3, 2]),
            ("b".to_string(), vec![]),
        ]);
        let pages = normalize_pages(&document_ids, &requested).unwrap();
        assert_eq!(pages.get("a"), Some(&vec![1, 2, 3]));
        assert!(!pages.contains_key("b"));
        assert_eq!(count_batch_pages(&document_ids, &pages), 4);
    }

    #[test]
    fn test_normalize_pages_rejects_zero_and_strangers() {
        let document_ids = ids(&["a"]);
        let zero = HashMap::from([("a".to_string(), vec![0, 1])]);
        assert!(matches!(
            normalize_pages(&document_ids, &zero),
            Err(TaskError::InvalidInput(_))
        ));

        let stranger = HashMap::from([("z".to_string(), vec![1])]);
        assert!(normalize_pages(&document_ids, &stranger).is_err());
    }

    #[test]
    fn test_count_batch_pages_defaults() {
        let document_ids = ids(&["a", "b"]);
        assert_eq!(count_batch_pages(&document_ids, &BTreeMap::new()), 2);
    }

    #[test]
    fn test_require_document_id() {
        assert!(require_document_id("doc-1").is_ok());
        assert!(require_document_id("  ").is_err());
    }
}
