use std::path::PathBuf;
use thiserror::Error;

/// Error type shared by every stage of the conversion pipeline.
///
/// Configuration, input, and archive errors are fatal to the invocation;
/// render and capture errors are folded into the owning job's result by the
/// scheduler and never abort a batch.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid configuration:\n{}", format_violations(.0))]
    InvalidConfig(Vec<String>),

    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("unsupported input format: {0} (use .html, .zip or .rar)")]
    UnsupportedInput(String),

    #[error("invalid HTML document: {0}")]
    InvalidDocument(String),

    #[error("content load failed: {0}")]
    LoadFailed(String),

    #[error("page load timed out after {0} ms")]
    LoadTimeout(u64),

    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("unrar not found; install unrar to process .rar archives")]
    ExtractorMissing,

    #[error("archive extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("text generation failed: {0}")]
    TextGeneration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

fn format_violations(violations: &[String]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
