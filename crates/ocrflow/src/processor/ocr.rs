use crate::error::ProcessError;
use crate::processor::hocr::{self, Layout};

/// Parameters for one recognition call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRequest {
    /// Tesseract language string, e.g. `chi_sim+eng`.
    pub language: String,
    pub page_seg_mode: u8,
    pub preprocess: bool,
    pub capture_layout: bool,
}

/// Output of a recognition call. `confidence` is 0.0..=100.0.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f64,
    pub layout: Option<Layout>,
}

impl Recognition {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            layout: None,
        }
    }
}

pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Recognizes text in an encoded raster image.
    fn recognize(&self, image: &[u8], request: &OcrRequest) -> Result<Recognition, ProcessError>;
}

/// Tesseract through `leptess`. A fresh `LepTess` is created per call so
/// the engine can be shared across worker threads.
#[derive(Debug, Clone, Default)]
pub struct TesseractEngine {
    tessdata_path: Option<String>,
}

impl TesseractEngine {
    pub fn new(tessdata_path: Option<String>) -> Self {
        Self { tessdata_path }
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &[u8], request: &OcrRequest) -> Result<Recognition, ProcessError> {
        let _span = tracing::info_span!(
            "processor.ocr",
            language = %request.language,
            psm = request.page_seg_mode,
            preprocess = request.preprocess
        )
        .entered();

        let png_data = if request.preprocess {
            super::image::preprocess(image)?
        } else {
            super::image::to_png(image)?
        };

        let mut lt = leptess::LepTess::new(self.tessdata_path.as_deref(), &request.language)
            .map_err(|e| {
                ProcessError::EngineUnavailable(format!("Failed to initialize Tesseract: {}", e))
            })?;

        lt.set_variable(
            leptess::Variable::TesseditPagesegMode,
            &request.page_seg_mode.to_string(),
        )
        .map_err(|e| ProcessError::OcrFailed(format!("Failed to set page segmentation: {}", e)))?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))?;

        if text.trim().is_empty() {
            return Ok(Recognition::empty());
        }

        let confidence = f64::from(lt.mean_text_conf().clamp(0, 100));

        let layout = if request.capture_layout {
            let markup = lt
                .get_hocr_text(0)
                .map_err(|e| ProcessError::OcrFailed(format!("hOCR output failed: {}", e)))?;
            Some(hocr::parse_hocr(&markup)?)
        } else {
            None
        };

        Ok(Recognition {
            text,
            confidence,
            layout,
        })
    }
}
