use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

static RE_LANGUAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_]+(\+[a-z_]+)*$").unwrap());

/// Minimum rasterization resolution accepted for PDF pages.
pub const MIN_DPI: u32 = 300;

/// Tesseract language string check: `eng`, `chi_sim+eng`, `auto`.
pub(crate) fn is_valid_language(code: &str) -> bool {
    RE_LANGUAGE.is_match(code)
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub(crate) fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.ocr.dpi < MIN_DPI {
        return Err(ConfigError::Validation {
            message: format!(
                "ocr.dpi must be at least {} (got {})",
                MIN_DPI, config.ocr.dpi
            ),
        });
    }

    if config.ocr.max_pdf_pages == 0 {
        return Err(ConfigError::Validation {
            message: "ocr.max_pdf_pages must be at least 1".to_string(),
        });
    }

    if config.tasks.default_confidence_threshold > 100 {
        return Err(ConfigError::Validation {
            message: "tasks.default_confidence_threshold must be between 0 and 100".to_string(),
        });
    }

    for code in config
        .ocr
        .languages
        .iter()
        .chain(std::iter::once(&config.tasks.default_language))
    {
        if !is_valid_language(code) {
            return Err(ConfigError::Validation {
                message: format!("Invalid language code: '{}'", code),
            });
        }
    }

    Ok(())
}
