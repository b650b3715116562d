use crate::error::ProcessError;

const UTF8_BOM: &str = "\u{feff}";

/// Decodes plain text or HTML as UTF-8. Markup is kept as-is.
pub fn decode_text(bytes: &[u8]) -> Result<String, ProcessError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        ProcessError::CorruptInput(format!("Content is not valid UTF-8: {}", e))
    })?;
    Ok(text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string())
}
