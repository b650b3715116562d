//! Result sink tests: manual corrections and per-document statistics.

mod common;

use common::{scripted_image, TestHarness};
use ocrflow::service::MANUAL_ENGINE;
use ocrflow::{OptionOverrides, PageRequest, ResultCorrection, Strategy, TaskError, TaskStatus};

fn page_request(document_id: &str, page_number: u32) -> PageRequest {
    PageRequest {
        document_id: document_id.to_string(),
        page_number,
        content: None,
        options: OptionOverrides::default(),
    }
}

fn correction(
    document_id: &str,
    page_number: u32,
    text: &str,
    confidence: f64,
) -> ResultCorrection {
    ResultCorrection {
        document_id: document_id.to_string(),
        page_number,
        text: text.to_string(),
        confidence,
    }
}

#[test]
fn test_correction_replaces_extracted_text() {
    let harness = TestHarness::new();
    harness.add_document("scan", "scan.png", &scripted_image("Invoce 42", 61.0));
    let accepted = harness.service.submit_page(page_request("scan", 1)).unwrap();
    assert_eq!(harness.wait_terminal(&accepted.id).status, TaskStatus::Completed);
    let extracted = harness.service.result("scan", 1).unwrap().unwrap();

    let corrected = harness
        .service
        .update_result(correction("scan", 1, "Invoice 42", 99.0))
        .unwrap();

    assert_eq!(corrected.text, "Invoice 42");
    assert_eq!(corrected.confidence, 99.0);
    assert_eq!(corrected.metadata.engine, MANUAL_ENGINE);
    assert_eq!(corrected.metadata.strategy, Strategy::ImageOcr);
    assert!(!corrected.metadata.low_confidence);
    assert!(corrected.layout.is_none());
    assert_eq!(corrected.created_at, extracted.created_at);
    assert_eq!(harness.service.results_for_document("scan").unwrap().len(), 1);
}

#[test]
fn test_correction_creates_missing_page() {
    let harness = TestHarness::new();
    harness.add_document("report", "report.pdf", b"%PDF-1.5 scripted");

    let entry = harness
        .service
        .update_result(correction("report", 3, "typed by hand", 40.0))
        .unwrap();

    assert_eq!(entry.page_number, 3);
    assert_eq!(entry.metadata.strategy, Strategy::PdfRasterOcr);
    assert!(entry.metadata.low_confidence);
    assert_eq!(
        harness.service.result("report", 3).unwrap().unwrap().text,
        "typed by hand"
    );
}

#[test]
fn test_correction_validation() {
    let harness = TestHarness::new();
    harness.add_document("scan", "scan.png", &scripted_image("text", 90.0));

    let cases = [
        correction("", 1, "text", 90.0),
        correction("scan", 0, "text", 90.0),
        correction("scan", 1, "   ", 90.0),
        correction("scan", 1, "text", 100.5),
        correction("scan", 1, "text", f64::NAN),
    ];
    for case in cases {
        assert!(
            matches!(
                harness.service.update_result(case.clone()),
                Err(TaskError::InvalidInput(_))
            ),
            "accepted {:?}",
            case
        );
    }

    assert!(matches!(
        harness.service.update_result(correction("ghost", 1, "text", 90.0)),
        Err(TaskError::DocumentNotFound(ids)) if ids == vec!["ghost".to_string()]
    ));
    assert!(harness.service.results_for_document("scan").unwrap().is_empty());
}

#[test]
fn test_document_statistics() {
    let harness = TestHarness::new();
    harness.add_document("scan", "scan.png", &scripted_image("blurry", 40.0));
    let accepted = harness.service.submit_page(page_request("scan", 1)).unwrap();
    harness.wait_terminal(&accepted.id);
    harness
        .service
        .update_result(correction("scan", 2, "second page", 100.0))
        .unwrap();

    let stats = harness.service.document_statistics("scan").unwrap();
    assert_eq!(stats.document_id, "scan");
    assert_eq!(stats.pages, 2);
    assert_eq!(stats.average_confidence, 70.0);
    assert_eq!(stats.min_confidence, Some(40.0));
    assert_eq!(stats.max_confidence, Some(100.0));
    assert_eq!(stats.low_confidence_pages, 1);
    assert_eq!(stats.engines.get(MANUAL_ENGINE), Some(&1));
    assert_eq!(stats.engines.get("scripted"), Some(&1));

    harness.add_document("fresh", "fresh.png", &scripted_image("unused", 90.0));
    let empty = harness.service.document_statistics("fresh").unwrap();
    assert_eq!(empty.pages, 0);
    assert_eq!(empty.average_confidence, 0.0);

    assert!(matches!(
        harness.service.document_statistics("ghost"),
        Err(TaskError::DocumentNotFound(_))
    ));
}

#[test]
fn test_empty_text_document_has_zero_confidence() {
    let harness = TestHarness::new();
    harness.add_document("blank", "blank.txt", b"");

    let accepted = harness.service.submit_page(page_request("blank", 1)).unwrap();
    assert_eq!(harness.wait_terminal(&accepted.id).status, TaskStatus::Completed);

    let entry = harness.service.result("blank", 1).unwrap().unwrap();
    assert_eq!(entry.text, "");
    assert_eq!(entry.confidence, 0.0);
    assert_eq!(harness.ocr.calls(), 0);
}
