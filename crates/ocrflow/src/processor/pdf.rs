use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use crate::error::ProcessError;
use crate::processor::TempFile;

/// Turns PDF pages into raster images for OCR.
pub trait PdfRasterizer: Send + Sync {
    fn page_count(&self, pdf: &[u8]) -> Result<u32, ProcessError>;

    /// Renders one page (1-based) as PNG bytes.
    fn render_page(&self, pdf: &[u8], page: u32, dpi: u32) -> Result<Vec<u8>, ProcessError>;
}

/// Page counting with `lopdf` (falling back to `pdfinfo`) and rendering
/// with poppler's `pdftoppm`.
#[derive(Debug, Clone, Default)]
pub struct PopplerRasterizer;

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl PdfRasterizer for PopplerRasterizer {
    fn page_count(&self, pdf: &[u8]) -> Result<u32, ProcessError> {
        match lopdf::Document::load_mem(pdf) {
            Ok(doc) => Ok(doc.get_pages().len() as u32),
            Err(e) => {
                // lopdf rejects some damaged cross-reference tables poppler can still read.
                tracing::warn!("lopdf failed to parse PDF: {}. Asking pdfinfo.", e);
                count_pdf_pages(pdf)
            }
        }
    }

    fn render_page(&self, pdf: &[u8], page: u32, dpi: u32) -> Result<Vec<u8>, ProcessError> {
        let _span = tracing::info_span!("processor.pdf_render", page, dpi).entered();
        render_pdf_page_to_image(pdf, page, dpi)
    }
}

fn tool_error(tool: &str, e: std::io::Error) -> ProcessError {
    if e.kind() == ErrorKind::NotFound {
        ProcessError::EngineUnavailable(format!(
            "{} not found. Make sure poppler-utils is installed.",
            tool
        ))
    } else {
        ProcessError::EngineUnavailable(format!("Failed to run {}: {}", tool, e))
    }
}

/// Page count via `pdfinfo`, for PDFs lopdf cannot parse.
fn count_pdf_pages(pdf: &[u8]) -> Result<u32, ProcessError> {
    let temp = TempFile::write("ocrflow_pagecount", "pdf", pdf)?;

    let output = Command::new("pdfinfo")
        .arg(temp.path())
        .output()
        .map_err(|e| tool_error("pdfinfo", e))?;

    if !output.status.success() {
        return Err(ProcessError::CorruptInput(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        ProcessError::CorruptInput("pdfinfo did not report a page count".to_string())
    })
}

fn parse_pdfinfo_pages(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse::<u32>().ok())
}

fn render_pdf_page_to_image(pdf: &[u8], page: u32, dpi: u32) -> Result<Vec<u8>, ProcessError> {
    let temp = TempFile::write("ocrflow_render", "pdf", pdf)?;
    let output_prefix =
        std::env::temp_dir().join(format!("ocrflow_page_{}", uuid::Uuid::new_v4()));

    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg(temp.path())
        .arg(&output_prefix)
        .output()
        .map_err(|e| tool_error("pdftoppm", e))?;

    if !output.status.success() {
        return Err(ProcessError::OcrFailed(format!(
            "pdftoppm failed on page {}: {}",
            page,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    // pdftoppm zero-pads the page suffix depending on the document's page count.
    let prefix = output_prefix.display();
    let candidates = [
        format!("{}-{}.png", prefix, page),
        format!("{}-{:02}.png", prefix, page),
        format!("{}-{:03}.png", prefix, page),
        format!("{}-{:04}.png", prefix, page),
    ];
    let image_path = candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            ProcessError::OcrFailed(format!("Rendered image for page {} not found", page))
        })?;

    let image_data = std::fs::read(&image_path).map_err(|e| ProcessError::ReadDocument {
        path: image_path.clone(),
        source: e,
    });
    let _ = std::fs::remove_file(&image_path);

    image_data
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object, Stream};

    /// Builds a PDF with `pages` text pages.
    pub(crate) fn build_pdf(pages: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for n in 1..=pages {
            let content = format!("BT /F1 12 Tf 50 700 Td (Page {}) Tj ET", n);
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_page_count_from_lopdf() {
        let rasterizer = PopplerRasterizer::new();
        assert_eq!(rasterizer.page_count(&build_pdf(1)).unwrap(), 1);
        assert_eq!(rasterizer.page_count(&build_pdf(15)).unwrap(), 15);
    }

    #[test]
    fn test_parse_pdfinfo_output() {
        let stdout = "Producer:       poppler\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_pages(stdout), Some(12));
        assert_eq!(parse_pdfinfo_pages("Title: x\n"), None);
    }

    #[test]
    fn test_missing_tool_is_engine_unavailable() {
        let err = tool_error(
            "pdftoppm",
            std::io::Error::new(ErrorKind::NotFound, "no such file"),
        );
        match err {
            ProcessError::EngineUnavailable(msg) => assert!(msg.contains("poppler-utils")),
            other => panic!("expected EngineUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let path = {
            let temp = TempFile::write("ocrflow_test", "pdf", b"%PDF-1.5").unwrap();
            assert!(temp.path().exists());
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
