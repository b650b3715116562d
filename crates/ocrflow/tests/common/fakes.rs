//! Scripted extraction engines.
//!
//! Image payloads are plain text of the form `<text>|<confidence>`, so a
//! test decides what the OCR engine "sees" by writing the fixture file.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use ocrflow::error::ProcessError;
use ocrflow::processor::{LegacyDocReader, OcrEngine, OcrRequest, PdfRasterizer, Recognition};

/// OCR engine that parses `<text>|<confidence>` payloads. A payload of
/// `fail` is rejected as unreadable.
///
/// While held, every call blocks until [`ScriptedOcr::release`] is called.
pub struct ScriptedOcr {
    calls: AtomicUsize,
    held: Mutex<bool>,
    released: Condvar,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        *self.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    /// Waits until at least `n` recognitions have started.
    pub fn wait_for_calls(&self, n: usize) {
        for _ in 0..500 {
            if self.calls() >= n {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("OCR engine was called {} time(s), expected {}", self.calls(), n);
    }
}

impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, image: &[u8], _request: &OcrRequest) -> Result<Recognition, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        drop(held);

        let payload = String::from_utf8_lossy(image).trim().to_string();
        if payload == "fail" {
            return Err(ProcessError::OcrFailed("unreadable image".to_string()));
        }
        let (text, confidence) = match payload.rsplit_once('|') {
            Some((text, confidence)) => (text.to_string(), confidence.parse().unwrap_or(50.0)),
            None => (payload.clone(), 50.0),
        };
        Ok(Recognition {
            text,
            confidence,
            layout: None,
        })
    }
}

/// Rasterizer reporting a fixed page count. Page `n` renders as
/// `page <n>|85`.
pub struct FixedPdf {
    pub pages: u32,
}

impl PdfRasterizer for FixedPdf {
    fn page_count(&self, _pdf: &[u8]) -> Result<u32, ProcessError> {
        Ok(self.pages)
    }

    fn render_page(&self, _pdf: &[u8], page: u32, _dpi: u32) -> Result<Vec<u8>, ProcessError> {
        Ok(format!("page {}|85", page).into_bytes())
    }
}

/// Legacy `.doc` reader returning the file as text.
pub struct PlainDoc;

impl LegacyDocReader for PlainDoc {
    fn extract(&self, bytes: &[u8]) -> Result<String, ProcessError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
