use thiserror::Error;

use arbor_profiling::ProfileError;

#[derive(Debug, Error)]
pub enum AggregateError {
    /// The raw profile of one session could not be converted. The caller
    /// decides whether to skip the session or abort the batch.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("platform not supported: {0}")]
    PlatformNotSupported(String),

    /// Two call tree nodes that must describe the same function do not.
    #[error("cannot merge call trees with different identifiers: {expected} and {found}")]
    MismatchedIdentifiers { expected: String, found: String },
}

impl AggregateError {
    /// Returns `true` for failures caused by inconsistent profiling data
    /// rather than malformed input or misuse.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::MismatchedIdentifiers { .. })
    }
}
