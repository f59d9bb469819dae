use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures of a single run+grid unit.
///
/// Every variant is fatal for the unit that raised it. Only `SnapshotIo` is
/// retried by the reduction engine, and `WriteFailed` is safe for the caller
/// to retry because nothing is published on failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("malformed snapshot {source_name}: {message}")]
    MalformedSnapshot { source_name: String, message: String },

    #[error("unsupported aggregation mode {0:?} (expected \"hourly\" or \"daily\")")]
    UnsupportedAggregationMode(String),

    #[error("shape mismatch in {field}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("no snapshot in {} falls inside window [{start}, {end}]", dir.display())]
    EmptyWindow { dir: PathBuf, start: u64, end: u64 },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid window: start index {start} is after end index {end}")]
    InvalidWindow { start: u64, end: u64 },

    #[error("failed to read snapshot {}: {source}", path.display())]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list {}: {source}", dir.display())]
    ListDirectory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unit cancelled before completion")]
    Cancelled,
}

impl PipelineError {
    pub fn malformed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::MalformedSnapshot {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Stable identifier used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedSnapshot { .. } => "malformed_snapshot",
            PipelineError::UnsupportedAggregationMode(_) => "unsupported_aggregation_mode",
            PipelineError::ShapeMismatch { .. } => "shape_mismatch",
            PipelineError::EmptyWindow { .. } => "empty_window",
            PipelineError::WriteFailed { .. } => "write_failed",
            PipelineError::InvalidWindow { .. } => "invalid_window",
            PipelineError::SnapshotIo { .. } => "snapshot_io",
            PipelineError::ListDirectory { .. } => "list_directory",
            PipelineError::Cancelled => "cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::SnapshotIo { .. })
    }
}
