use thiserror::Error;

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ProfileError {
    #[error(transparent)]
    InvalidJson(#[from] serde_path_to_error::Error<serde_json::Error>),
    #[error("platform not supported")]
    PlatformNotSupported,
    #[error("not enough samples")]
    NotEnoughSamples,
    #[error("invalid transaction metadata")]
    InvalidTransactionMetadata,
    #[error("malformed stacks")]
    MalformedStacks,
    #[error("malformed samples")]
    MalformedSamples,
}

impl ProfileError {
    /// Returns the path to the field in the JSON payload at which the error
    /// occurred.
    ///
    /// This is only available for [`InvalidJson`](Self::InvalidJson).
    /// Returns `""` otherwise.
    pub fn path(&self) -> String {
        match self {
            Self::InvalidJson(err) => err.path().to_string(),
            _ => "".into(),
        }
    }
}
