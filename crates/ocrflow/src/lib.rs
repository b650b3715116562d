pub mod broadcast;
pub mod cancel;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod service;
pub mod status;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod worker;

pub use broadcast::{TaskProgressBroadcaster, TaskProgressEvent};
pub use cancel::{CancelAck, CancellationGate};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use documents::{DocumentIndex, DocumentLookup};
pub use error::{ConfigError, OcrflowError, ProcessError, Result, TaskError, WorkerError};
pub use pipeline::{BatchCoordinator, Pipeline, WorkOutcome};
pub use processor::{
    ContentDescriptor, LegacyDocReader, OcrEngine, PageExtractor, PdfRasterizer, Strategy,
};
pub use service::{OcrService, TaskAccepted};
pub use status::{SnapshotResult, StatusSnapshot};
pub use store::{PruneReport, RecoveryReport, TaskStore};
pub use task::{
    BatchRequest, DocumentRequest, DocumentStatistics, InlineContent, OptionOverrides,
    PageRequest, ResultCorrection, TaskKind, TaskStatus,
};
pub use telemetry::init_tracing;
