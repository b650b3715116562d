//! Builders for fixture documents.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use chrono::Utc;
use zip::write::SimpleFileOptions;

use ocrflow::config::TaskConfig;
use ocrflow::task::{default_options, TaskKind, TaskRecord, TaskStatus};

/// Minimal DOCX archive with one `<w:p>` per paragraph.
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .expect("Failed to start document.xml");
        writer
            .write_all(xml.as_bytes())
            .expect("Failed to write document.xml");
        writer.finish().expect("Failed to finish DOCX archive");
    }
    buffer.into_inner()
}

/// Image payload understood by [`crate::common::ScriptedOcr`].
pub fn scripted_image(text: &str, confidence: f64) -> Vec<u8> {
    format!("{}|{}", text, confidence).into_bytes()
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Document task still `processing`, as a run that died mid-task leaves it.
pub fn stranded_task(task_id: &str, document_id: &str, progress: u8) -> TaskRecord {
    let now = Utc::now();
    TaskRecord {
        task_id: task_id.to_string(),
        document_id: document_id.to_string(),
        page_number: None,
        kind: TaskKind::Document,
        content_kind: None,
        content_length: None,
        status: TaskStatus::Processing,
        progress,
        options: default_options(&TaskConfig::default()),
        estimated_seconds: 30,
        result: None,
        error_message: None,
        cancel_reason: None,
        cancelled_at: None,
        created_at: now,
        started_at: now,
        updated_at: now,
        completed_at: None,
    }
}
