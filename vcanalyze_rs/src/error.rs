//! Error type shared across the analysis pipeline.
//!
//! Variants follow the failure stages of a run: configuration, build
//! metadata, command synthesis, per-file analysis, and report aggregation.

use std::path::PathBuf;

/// Error type for the analysis pipeline
#[derive(Debug)]
pub enum DriverError {
    /// Invalid caller-supplied configuration (missing build dir, bad paths)
    Configuration(String),
    /// Build metadata could not be produced, located, or understood
    Metadata(String),
    /// A per-file analyze command could not be synthesized
    Synthesis(String),
    /// One or more analysis invocations exited non-zero; every failed
    /// source file is listed
    Analysis { failed: Vec<PathBuf> },
    /// Diagnostic logs could not be merged or the report not written
    Aggregation(String),
    /// IO error
    Io(std::io::Error),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::Configuration(msg) => {
                write!(f, "configuration error: {}", msg)
            }
            DriverError::Metadata(msg) => {
                write!(f, "build metadata error: {}", msg)
            }
            DriverError::Synthesis(msg) => {
                write!(f, "command synthesis error: {}", msg)
            }
            DriverError::Analysis { failed } => {
                let names: Vec<String> = failed
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                write!(
                    f,
                    "analysis failed for {} file(s): {}",
                    failed.len(),
                    names.join(", ")
                )
            }
            DriverError::Aggregation(msg) => {
                write!(f, "report aggregation error: {}", msg)
            }
            DriverError::Io(e) => {
                write!(f, "IO error: {}", e)
            }
        }
    }
}

impl std::error::Error for DriverError {}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
