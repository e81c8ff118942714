//! Error types for the pixelbin-watermark-panel crate.

/// Errors that can occur while driving the upload-and-transform workflow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The saved API token is missing, invalid, or expired.
    ///
    /// Surfaced on the token screen and never auto-retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A transport-level failure while talking to the service.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("service returned status {status}: {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Response body, if one could be read.
        message: String,
    },

    /// A signed upload target was malformed or its asset metadata could not
    /// be parsed.
    #[error("invalid upload target: {0}")]
    UploadTarget(String),

    /// The upload retry budget ran out without a successful attempt.
    #[error("upload failed after {attempts} attempts")]
    UploadExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
    },

    /// The asset file id was absent or malformed.
    #[error("invalid asset reference: {0:?}")]
    InvalidAssetReference(String),

    /// The usage endpoint could not be read. Non-fatal; callers keep the
    /// previous snapshot.
    #[error("usage fetch failed: {0}")]
    UsageFetch(String),

    /// An image-processing run (or token mutation) was started while a run
    /// was still active.
    #[error("an image-processing run is already in progress")]
    RunInProgress,

    /// The configured service domain could not be parsed.
    #[error("invalid service domain: {0}")]
    Config(String),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
