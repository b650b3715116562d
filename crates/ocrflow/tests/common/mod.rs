//! Shared test utilities for ocrflow integration tests.
//!
//! This module provides:
//! - Scripted engines standing in for Tesseract, poppler and antiword
//! - `TestHarness` running an `OcrService` over an in-memory database
//! - Builders for fixture documents

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::TestHarness;
