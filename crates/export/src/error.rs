use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// A client cannot be built because required configuration is absent.
    #[error("{0}")]
    MissingConfig(String),

    #[error("invalid URL: {0}")]
    Url(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote service answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("response did not decode: {0}")]
    Decode(#[from] serde_json::Error),
}
