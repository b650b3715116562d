//! Strategy tests: selector coverage, native extraction, PDF page caps and
//! the result sink.

mod common;

use std::path::Path;

use base64::Engine as _;

use common::{docx_bytes, scripted_image, TestHarness};
use ocrflow::task::{ContentKind, InlineContent};
use ocrflow::{
    ContentDescriptor, DocumentRequest, OptionOverrides, PageRequest, SnapshotResult, Strategy,
    TaskStatus,
};

fn page_request(document_id: &str, page_number: u32) -> PageRequest {
    PageRequest {
        document_id: document_id.to_string(),
        page_number,
        content: None,
        options: OptionOverrides::default(),
    }
}

fn completed_result(harness: &TestHarness, id: &str) -> ocrflow::task::TaskResult {
    let snapshot = harness.wait_terminal(id);
    assert_eq!(
        snapshot.status,
        TaskStatus::Completed,
        "task failed: {:?}",
        snapshot.error_message
    );
    match snapshot.result {
        Some(SnapshotResult::Task(result)) => result,
        other => panic!("expected task result, got {:?}", other),
    }
}

#[test]
fn test_selector_is_total() {
    let cases = [
        ("scan.pdf", Strategy::PdfRasterOcr),
        ("letter.DOCX", Strategy::DocxNative),
        ("legacy.doc", Strategy::DocNative),
        ("notes.txt", Strategy::TextPassthrough),
        ("page.htm", Strategy::TextPassthrough),
        ("photo.jpeg", Strategy::ImageOcr),
        ("fax.tif", Strategy::ImageOcr),
        ("archive.xyz", Strategy::FallbackOcr),
        ("no_extension", Strategy::FallbackOcr),
        ("", Strategy::FallbackOcr),
    ];
    for (path, expected) in cases {
        assert_eq!(
            Strategy::select(&ContentDescriptor::Path(Path::new(path))),
            expected,
            "{}",
            path
        );
    }

    assert_eq!(
        Strategy::select(&ContentDescriptor::MimeType("application/pdf")),
        Strategy::PdfRasterOcr
    );
    assert_eq!(
        Strategy::select(&ContentDescriptor::MimeType("application/x-unknown")),
        Strategy::FallbackOcr
    );
    assert_eq!(
        Strategy::select(&ContentDescriptor::Inline { is_image: true }),
        Strategy::InlineImageOcr
    );
    assert_eq!(
        Strategy::select(&ContentDescriptor::Inline { is_image: false }),
        Strategy::InlineHtml
    );
}

#[test]
fn test_docx_page_is_read_natively() {
    let harness = TestHarness::new();
    harness.add_document(
        "contract",
        "contract.docx",
        &docx_bytes(&["Service Agreement", "Term: 12 months"]),
    );

    let accepted = harness.service.submit_page(page_request("contract", 1)).unwrap();
    let result = completed_result(&harness, &accepted.id);

    assert_eq!(result.text, "Service Agreement\nTerm: 12 months");
    assert_eq!(result.confidence, 100.0);
    assert_eq!(result.metadata.strategy, Strategy::DocxNative);
    assert_eq!(result.metadata.engine, "native");
    assert!(!result.metadata.low_confidence);
    assert_eq!(harness.ocr.calls(), 0);
}

#[test]
fn test_legacy_doc_uses_doc_reader() {
    let harness = TestHarness::new();
    harness.add_document("memo", "memo.doc", b"Quarterly memo");

    let accepted = harness
        .service
        .submit_document(DocumentRequest {
            document_id: "memo".to_string(),
            options: OptionOverrides::default(),
        })
        .unwrap();
    let result = completed_result(&harness, &accepted.id);

    assert_eq!(result.text, "Quarterly memo");
    assert_eq!(result.metadata.strategy, Strategy::DocNative);
    assert_eq!(harness.ocr.calls(), 0);
}

#[test]
fn test_unknown_extension_falls_back_to_ocr() {
    let harness = TestHarness::new();
    harness.add_document("mystery", "mystery.bin", &scripted_image("recovered", 64.0));

    let accepted = harness.service.submit_page(page_request("mystery", 1)).unwrap();
    let result = completed_result(&harness, &accepted.id);

    assert_eq!(result.text, "recovered");
    assert_eq!(result.metadata.strategy, Strategy::FallbackOcr);
    assert!(result.metadata.low_confidence);
    assert_eq!(harness.ocr.calls(), 1);
}

#[test]
fn test_inline_image_is_decoded_before_ocr() {
    let harness = TestHarness::new();
    let encoded = base64::engine::general_purpose::STANDARD.encode(scripted_image("inline", 93.0));

    let request = PageRequest {
        content: Some(InlineContent {
            kind: ContentKind::Image,
            data: format!("data:image/png;base64,{}", encoded),
        }),
        ..page_request("upload-1", 1)
    };
    let accepted = harness.service.submit_page(request).unwrap();
    let result = completed_result(&harness, &accepted.id);

    assert_eq!(result.text, "inline");
    assert_eq!(result.metadata.strategy, Strategy::InlineImageOcr);
    assert_eq!(harness.service.result("upload-1", 1).unwrap().unwrap().text, "inline");
}

#[test]
fn test_pdf_document_is_capped_and_reports_truncation() {
    let harness = TestHarness::with_pdf_pages(15);
    harness.add_document("manual", "manual.pdf", b"%PDF-1.5 scripted");

    let accepted = harness
        .service
        .submit_document(DocumentRequest {
            document_id: "manual".to_string(),
            options: OptionOverrides::default(),
        })
        .unwrap();
    let result = completed_result(&harness, &accepted.id);

    assert_eq!(result.pages_processed, 10);
    assert_eq!(result.total_pages, 15);
    assert!(result.truncated);
    assert_eq!(result.pages.len(), 10);
    assert!(result.text.starts_with("page 1\n\npage 2"));
    assert!(result.text.ends_with("page 10"));
    assert_eq!(result.confidence, 85.0);
    assert!(result.layout.is_none());

    assert_eq!(harness.status(&accepted.id).total_pages, Some(15));
    let stored = harness.service.results_for_document("manual").unwrap();
    assert_eq!(stored.len(), 10);
    assert!(harness.service.result("manual", 11).unwrap().is_none());
    assert_eq!(harness.ocr.calls(), 10);
}

#[test]
fn test_result_sink_keeps_one_entry_per_page() {
    let harness = TestHarness::new();
    let path = harness.add_document("scan", "scan.png", &scripted_image("first pass", 70.0));

    let first = harness.service.submit_page(page_request("scan", 1)).unwrap();
    harness.wait_terminal(&first.id);
    let before = harness.service.result("scan", 1).unwrap().unwrap();

    std::fs::write(&path, scripted_image("second pass", 95.0)).unwrap();
    let second = harness.service.submit_page(page_request("scan", 1)).unwrap();
    harness.wait_terminal(&second.id);

    let entries = harness.service.results_for_document("scan").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "second pass");
    assert_eq!(entries[0].confidence, 95.0);
    assert_eq!(entries[0].created_at, before.created_at);
    assert!(entries[0].updated_at >= before.updated_at);

    let history = harness.service.tasks_for_document("scan").unwrap();
    assert_eq!(history.len(), 2);
}
