use std::io::ErrorKind;
use std::process::Command;

use crate::error::ProcessError;
use crate::processor::TempFile;

/// Reads text out of legacy binary Word (`.doc`) files.
pub trait LegacyDocReader: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ProcessError>;
}

/// Shells out to `antiword`.
#[derive(Debug, Clone)]
pub struct AntiwordReader {
    program: String,
}

impl AntiwordReader {
    pub fn new() -> Self {
        Self::with_program("antiword")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AntiwordReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LegacyDocReader for AntiwordReader {
    fn extract(&self, bytes: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.doc").entered();

        let temp = TempFile::write("ocrflow_doc", "doc", bytes)?;

        let output = Command::new(&self.program)
            .arg(temp.path())
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    ProcessError::EngineUnavailable(format!(
                        "{} not found. Install antiword to read .doc files.",
                        self.program
                    ))
                } else {
                    ProcessError::EngineUnavailable(format!(
                        "Failed to run {}: {}",
                        self.program, e
                    ))
                }
            })?;

        if !output.status.success() {
            return Err(ProcessError::CorruptInput(format!(
                "{} could not read document: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
