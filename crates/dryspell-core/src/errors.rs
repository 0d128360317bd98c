use thiserror::Error;

/// Error type for invalid operations.
///
/// Variants split into two families. Structural errors (see [`DroughtError::is_structural`])
/// mean the static configuration disagrees with the grid data and abort a pipeline run.
/// Everything else is a data-availability problem that is reported against the combination
/// it occurred in.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DroughtError {
    #[error("{0}")]
    Error(String),
    #[error("Region {region} is not present in the region mask (known codes: {known:?})")]
    UnknownRegion { region: String, known: Vec<i32> },
    #[error("Window {start}..={end} selects no timestep of a field covering {field_start}..={field_end}")]
    WindowOutOfRange {
        start: String,
        end: String,
        field_start: String,
        field_end: String,
    },
    #[error("Dataset not found: {key}")]
    DatasetNotFound { key: String },
    #[error("Dataset {key} is unreadable: {reason}")]
    DatasetCorrupt { key: String, reason: String },
    #[error("Loading {key} timed out after {seconds}s ({attempts} attempt(s))")]
    LoadTimeout {
        key: String,
        seconds: f64,
        attempts: u32,
    },
    #[error("No defined cell values in window {window_index} across {members} ensemble member(s)")]
    EmptyEnsemble { window_index: usize, members: usize },
    #[error("Only {available} of {configured} ensemble members available, {required} required (dropped: {dropped:?})")]
    PartialEnsemble {
        available: usize,
        configured: usize,
        required: usize,
        dropped: Vec<String>,
    },
    #[error("Shape mismatch for {what}. Expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Invalid time axis: {0}")]
    InvalidTimeAxis(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DroughtError {
    /// Whether this error indicates a mismatch between configuration and grid data.
    ///
    /// Structural errors are never retried or skipped.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DroughtError::UnknownRegion { .. }
                | DroughtError::WindowOutOfRange { .. }
                | DroughtError::ShapeMismatch { .. }
                | DroughtError::InvalidTimeAxis(_)
                | DroughtError::InvalidConfig(_)
        )
    }

    pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
        DroughtError::InvalidConfig(msg.into())
    }
}

/// Convenience type for `Result<T, DroughtError>`.
pub type DroughtResult<T> = Result<T, DroughtError>;
