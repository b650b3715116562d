pub mod doc;
pub mod docx;
pub mod hocr;
pub mod image;
pub mod ocr;
pub mod pdf;
pub mod strategy;
pub mod text;

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use base64::Engine as _;

use crate::config::OcrConfig;
use crate::error::ProcessError;
use crate::task::{PageMetadata, TaskOptions};

pub use doc::{AntiwordReader, LegacyDocReader};
pub use hocr::{BoundingBox, Layout};
pub use ocr::{OcrEngine, OcrRequest, Recognition, TesseractEngine};
pub use pdf::{PdfRasterizer, PopplerRasterizer};
pub use strategy::{ContentDescriptor, Strategy};

/// Confidence reported for text that was read rather than recognized.
pub const NATIVE_TEXT_CONFIDENCE: f64 = 100.0;

const NATIVE_ENGINE: &str = "native";

/// Where a page's content comes from.
#[derive(Debug, Clone)]
pub enum PageSource {
    File(PathBuf),
    /// Base64-encoded image supplied with the request.
    InlineImage(String),
    InlineHtml(String),
}

/// Source bytes read once and reused for every page of a document.
pub struct LoadedSource {
    data: Vec<u8>,
    page_count: OnceCell<u32>,
}

impl LoadedSource {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            page_count: OnceCell::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Text and metadata for one page.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub page: u32,
    pub text: String,
    pub confidence: f64,
    pub layout: Option<Layout>,
    pub metadata: PageMetadata,
}

/// Runs one extraction strategy on one page. Has no persistence side effects.
#[derive(Clone)]
pub struct PageExtractor {
    ocr: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PdfRasterizer>,
    doc_reader: Arc<dyn LegacyDocReader>,
    config: OcrConfig,
}

impl PageExtractor {
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        rasterizer: Arc<dyn PdfRasterizer>,
        doc_reader: Arc<dyn LegacyDocReader>,
        config: OcrConfig,
    ) -> Self {
        Self {
            ocr,
            rasterizer,
            doc_reader,
            config,
        }
    }

    /// Tesseract, poppler and antiword.
    pub fn with_defaults(config: &OcrConfig) -> Self {
        Self::new(
            Arc::new(TesseractEngine::new(config.tessdata_path.clone())),
            Arc::new(PopplerRasterizer::new()),
            Arc::new(AntiwordReader::new()),
            config.clone(),
        )
    }

    pub fn max_pdf_pages(&self) -> u32 {
        self.config.max_pdf_pages
    }

    pub fn load(&self, source: &PageSource) -> Result<LoadedSource, ProcessError> {
        let data = match source {
            PageSource::File(path) => read_file(path)?,
            PageSource::InlineImage(encoded) => base64::engine::general_purpose::STANDARD
                .decode(strip_data_url(encoded).trim())
                .map_err(|e| ProcessError::CorruptInput(format!("Invalid base64 image: {}", e)))?,
            PageSource::InlineHtml(html) => html.clone().into_bytes(),
        };
        Ok(LoadedSource::from_bytes(data))
    }

    /// Number of pages the strategy sees in the source.
    pub fn page_count(
        &self,
        source: &LoadedSource,
        strategy: Strategy,
    ) -> Result<u32, ProcessError> {
        if !strategy.is_paginated() {
            return Ok(1);
        }
        if let Some(count) = source.page_count.get() {
            return Ok(*count);
        }
        let count = self.rasterizer.page_count(source.bytes())?;
        let _ = source.page_count.set(count);
        Ok(count)
    }

    pub fn extract(
        &self,
        source: &PageSource,
        page: u32,
        strategy: Strategy,
        options: &TaskOptions,
    ) -> Result<ExtractedPage, ProcessError> {
        let loaded = self.load(source)?;
        self.extract_loaded(&loaded, page, strategy, options)
    }

    pub fn extract_loaded(
        &self,
        source: &LoadedSource,
        page: u32,
        strategy: Strategy,
        options: &TaskOptions,
    ) -> Result<ExtractedPage, ProcessError> {
        let _span =
            tracing::info_span!("processor.extract", page, strategy = %strategy).entered();
        let started = Instant::now();

        let available = self.page_count(source, strategy)?;
        if page == 0 || page > available {
            return Err(ProcessError::PageOutOfRange { page, available });
        }

        let (text, confidence, layout, engine, language) = match strategy {
            Strategy::PdfRasterOcr => {
                let image = self
                    .rasterizer
                    .render_page(source.bytes(), page, self.config.dpi)?;
                self.recognize(&image, options)?
            }
            Strategy::ImageOcr | Strategy::InlineImageOcr | Strategy::FallbackOcr => {
                self.recognize(source.bytes(), options)?
            }
            Strategy::DocxNative => native(docx::extract_docx_text(source.bytes())?),
            Strategy::DocNative => native(self.doc_reader.extract(source.bytes())?),
            Strategy::TextPassthrough | Strategy::InlineHtml => {
                native(text::decode_text(source.bytes())?)
            }
        };
        // No text means nothing was recognized, whatever the engine reported.
        let confidence = if text.trim().is_empty() {
            0.0
        } else {
            confidence
        };

        let low_confidence =
            strategy.uses_ocr() && confidence < f64::from(options.confidence_threshold);
        if low_confidence {
            log::debug!(
                "Page {} recognized with low confidence {:.1} (threshold {})",
                page,
                confidence,
                options.confidence_threshold
            );
        }

        Ok(ExtractedPage {
            page,
            text,
            confidence,
            layout,
            metadata: PageMetadata {
                engine,
                language,
                processing_ms: started.elapsed().as_millis() as u64,
                strategy,
                low_confidence,
                format: options.format,
            },
        })
    }

    fn recognize(&self, image: &[u8], options: &TaskOptions) -> Result<Recognized, ProcessError> {
        let request = OcrRequest {
            language: self.resolve_language(&options.language),
            page_seg_mode: options
                .page_seg_mode
                .unwrap_or(self.config.page_seg_mode),
            preprocess: options.preprocess,
            capture_layout: options.format == crate::task::OutputFormat::Layout,
        };

        let recognition = self.ocr.recognize(image, &request)?;

        Ok((
            recognition.text,
            recognition.confidence.clamp(0.0, 100.0),
            recognition.layout,
            self.ocr.name().to_string(),
            Some(request.language),
        ))
    }

    fn resolve_language(&self, language: &str) -> String {
        if language == "auto" {
            self.config.language_string()
        } else {
            language.to_string()
        }
    }
}

type Recognized = (String, f64, Option<Layout>, String, Option<String>);

fn native(text: String) -> Recognized {
    (
        text,
        NATIVE_TEXT_CONFIDENCE,
        None,
        NATIVE_ENGINE.to_string(),
        None,
    )
}

fn read_file(path: &Path) -> Result<Vec<u8>, ProcessError> {
    std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Accepts both raw base64 and `data:image/png;base64,...` URLs.
fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    }
}

/// Temp file removed on drop, for tools that only read from disk.
pub(crate) struct TempFile(PathBuf);

impl TempFile {
    pub(crate) fn write(prefix: &str, extension: &str, bytes: &[u8]) -> Result<Self, ProcessError> {
        let path = std::env::temp_dir().join(format!(
            "{}_{}.{}",
            prefix,
            uuid::Uuid::new_v4(),
            extension
        ));
        std::fs::write(&path, bytes).map_err(|e| ProcessError::ReadDocument {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self(path))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
