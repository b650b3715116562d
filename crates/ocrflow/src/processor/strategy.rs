use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// What is known about a piece of content when choosing how to extract it.
#[derive(Debug, Clone, Copy)]
pub enum ContentDescriptor<'a> {
    Path(&'a Path),
    Extension(&'a str),
    /// Declared content type, e.g. `application/pdf`.
    MimeType(&'a str),
    /// Content supplied with the request instead of a stored file.
    Inline { is_image: bool },
}

/// Extraction strategy for a unit of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    PdfRasterOcr,
    DocxNative,
    DocNative,
    TextPassthrough,
    ImageOcr,
    InlineImageOcr,
    InlineHtml,
    FallbackOcr,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

impl Strategy {
    /// Picks a strategy. Never fails: unknown content goes to `FallbackOcr`.
    pub fn select(content: &ContentDescriptor<'_>) -> Self {
        match *content {
            ContentDescriptor::Inline { is_image: true } => Strategy::InlineImageOcr,
            ContentDescriptor::Inline { is_image: false } => Strategy::InlineHtml,
            ContentDescriptor::Path(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(Self::from_extension)
                .unwrap_or(Strategy::FallbackOcr),
            ContentDescriptor::Extension(ext) => Self::from_extension(ext),
            ContentDescriptor::MimeType(mime) => Self::from_mime_type(mime),
        }
    }

    fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_lowercase();
        match ext.as_str() {
            "pdf" => Strategy::PdfRasterOcr,
            "docx" => Strategy::DocxNative,
            "doc" => Strategy::DocNative,
            "txt" | "html" | "htm" => Strategy::TextPassthrough,
            e if IMAGE_EXTENSIONS.contains(&e) => Strategy::ImageOcr,
            _ => Strategy::FallbackOcr,
        }
    }

    fn from_mime_type(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        // Prefer the first mapped extension that selects something specific.
        mime_guess::get_mime_extensions_str(&essence)
            .into_iter()
            .flatten()
            .map(|ext| Self::from_extension(ext))
            .find(|s| *s != Strategy::FallbackOcr)
            .unwrap_or(Strategy::FallbackOcr)
    }

    /// Whether the strategy runs the OCR engine.
    pub fn uses_ocr(&self) -> bool {
        matches!(
            self,
            Strategy::PdfRasterOcr
                | Strategy::ImageOcr
                | Strategy::InlineImageOcr
                | Strategy::FallbackOcr
        )
    }

    /// Whether the content can have more than one page.
    pub fn is_paginated(&self) -> bool {
        matches!(self, Strategy::PdfRasterOcr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::PdfRasterOcr => "pdf_raster_ocr",
            Strategy::DocxNative => "docx_native",
            Strategy::DocNative => "doc_native",
            Strategy::TextPassthrough => "text_passthrough",
            Strategy::ImageOcr => "image_ocr",
            Strategy::InlineImageOcr => "inline_image_ocr",
            Strategy::InlineHtml => "inline_html",
            Strategy::FallbackOcr => "fallback_ocr",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
