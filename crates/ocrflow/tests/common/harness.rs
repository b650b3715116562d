//! Test harness for isolated service execution.
//!
//! The `TestHarness` struct runs a real `OcrService` against:
//! - an in-memory SQLite database
//! - a `DocumentIndex` backed by files in a temporary directory
//! - scripted OCR, PDF and `.doc` engines

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use ocrflow::config::{Config, OcrConfig};
use ocrflow::{
    Database, DocumentIndex, OcrService, PageExtractor, StatusSnapshot, TaskStatus,
};

use super::fakes::{FixedPdf, PlainDoc, ScriptedOcr};

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct TestHarness {
    temp_dir: TempDir,
    pdf_pages: u32,
    workers: usize,
    pub db: Arc<Database>,
    pub documents: Arc<DocumentIndex>,
    pub ocr: Arc<ScriptedOcr>,
    pub service: OcrService,
}

impl TestHarness {
    /// Two workers, single-page PDFs.
    pub fn new() -> Self {
        Self::with_pdf_pages(1)
    }

    /// PDFs report `pages` pages; whole-document tasks process at most 10.
    pub fn with_pdf_pages(pages: u32) -> Self {
        Self::build(pages, 2)
    }

    pub fn with_workers(workers: usize) -> Self {
        Self::build(1, workers)
    }

    fn build(pdf_pages: u32, workers: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Arc::new(Database::open_in_memory().expect("Failed to open database"));
        let documents = Arc::new(DocumentIndex::new());
        let ocr = Arc::new(ScriptedOcr::new());
        let service = start_service(&db, &documents, &ocr, pdf_pages, workers);

        Self {
            temp_dir,
            pdf_pages,
            workers,
            db,
            documents,
            ocr,
            service,
        }
    }

    /// Stops the service and starts a new one over the same database,
    /// documents and engines.
    pub fn restart(self) -> Self {
        let Self {
            temp_dir,
            pdf_pages,
            workers,
            db,
            documents,
            ocr,
            service,
        } = self;
        drop(service);
        let service = start_service(&db, &documents, &ocr, pdf_pages, workers);

        Self {
            temp_dir,
            pdf_pages,
            workers,
            db,
            documents,
            ocr,
            service,
        }
    }

    /// Writes `content` to `filename` and registers it under `document_id`.
    pub fn add_document(&self, document_id: &str, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(filename);
        std::fs::write(&path, content).expect("Failed to write document");
        self.documents.register(document_id, &path);
        path
    }

    pub fn status(&self, id: &str) -> StatusSnapshot {
        self.service.status(id).expect("Failed to read status")
    }

    /// Polls until the record leaves `processing`. Every snapshot seen on
    /// the way is passed to `observe`.
    pub fn wait_terminal_with(
        &self,
        id: &str,
        mut observe: impl FnMut(&StatusSnapshot),
    ) -> StatusSnapshot {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let snapshot = self.status(id);
            observe(&snapshot);
            if snapshot.status != TaskStatus::Processing {
                return snapshot;
            }
            if Instant::now() > deadline {
                panic!("{} still processing at {}%", id, snapshot.progress);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn wait_terminal(&self, id: &str) -> StatusSnapshot {
        self.wait_terminal_with(id, |_| {})
    }
}

fn start_service(
    db: &Arc<Database>,
    documents: &Arc<DocumentIndex>,
    ocr: &Arc<ScriptedOcr>,
    pdf_pages: u32,
    workers: usize,
) -> OcrService {
    let config = Config {
        worker_count: workers,
        ocr: OcrConfig {
            max_pdf_pages: 10,
            ..OcrConfig::default()
        },
        ..Config::default()
    };
    let extractor = PageExtractor::new(
        ocr.clone(),
        Arc::new(FixedPdf { pages: pdf_pages }),
        Arc::new(PlainDoc),
        config.ocr.clone(),
    );
    OcrService::new(config, db.clone(), documents.clone(), extractor)
        .expect("Failed to start service")
}
