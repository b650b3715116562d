use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskStatus;

#[derive(Error, Debug)]
pub enum OcrflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Errors raised while extracting a single page or unit of content.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    #[error("Extraction engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Page {page} is out of range (document has {available} page(s))")]
    PageOutOfRange { page: u32, available: u32 },
}

/// Errors returned to callers of the task API.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Documents not found: {}", .0.join(", "))]
    DocumentNotFound(Vec<String>),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {id} is already {status} and cannot be changed")]
    AlreadyTerminal { id: String, status: TaskStatus },

    #[error("Task store unavailable: {0}")]
    Store(#[from] crate::db::DatabaseError),

    #[error("Task could not be scheduled: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, OcrflowError>;
