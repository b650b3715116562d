use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// SQLite database file. Falls back to `~/.ocrflow/data/ocrflow.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Config {
    /// Resolved database location, if one can be determined.
    pub fn database_path(&self) -> Option<PathBuf> {
        match self.database_path {
            Some(ref path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            worker_count: default_worker_count(),
            database_path: None,
            ocr: OcrConfig::default(),
            tasks: TaskConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Tesseract language codes used when a task asks for `auto`.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// Rasterization resolution for PDF pages.
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Upper bound on pages processed by a whole-document PDF task.
    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: u32,
    #[serde(default)]
    pub tessdata_path: Option<String>,
    #[serde(default = "default_page_seg_mode")]
    pub page_seg_mode: u8,
}

fn default_languages() -> Vec<String> {
    vec!["chi_sim".to_string(), "eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

fn default_max_pdf_pages() -> u32 {
    10
}

fn default_page_seg_mode() -> u8 {
    3
}

impl OcrConfig {
    /// Languages joined the way Tesseract expects them (`chi_sim+eng`).
    pub fn language_string(&self) -> String {
        if self.languages.is_empty() {
            "eng".to_string()
        } else {
            self.languages.join("+")
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            dpi: default_dpi(),
            max_pdf_pages: default_max_pdf_pages(),
            tessdata_path: None,
            page_seg_mode: default_page_seg_mode(),
        }
    }
}

/// Static estimates and option defaults applied when tasks are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_page_estimate")]
    pub page_estimate_secs: u64,
    #[serde(default = "default_document_estimate")]
    pub document_estimate_secs: u64,
    #[serde(default = "default_batch_page_estimate")]
    pub batch_page_estimate_secs: u64,
    /// Language requested when a task does not name one.
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_confidence_threshold")]
    pub default_confidence_threshold: u8,
}

fn default_page_estimate() -> u64 {
    15
}

fn default_document_estimate() -> u64 {
    30
}

fn default_batch_page_estimate() -> u64 {
    10
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_confidence_threshold() -> u8 {
    70
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            page_estimate_secs: default_page_estimate(),
            document_estimate_secs: default_document_estimate(),
            batch_page_estimate_secs: default_batch_page_estimate(),
            default_language: default_language(),
            default_confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "ocrflow=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}
