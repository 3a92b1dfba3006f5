//! Retrieval-side error kinds.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The chat model call failed.
    #[error("model error: {0}")]
    Model(String),

    /// The retrieval service failed or returned an error status.
    #[error("search error: {0}")]
    Search(String),

    /// The model's answer could not be parsed into the expected envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No chat model is configured.
    #[error("no model configured: {0}")]
    NoModel(String),

    /// Failure bubbled up from the core (blob reads, graph lookups).
    #[error(transparent)]
    Core(#[from] knowflow::Error),
}

impl Error {
    pub fn model(msg: impl Into<String>) -> Self {
        Error::Model(msg.into())
    }

    pub fn search(msg: impl Into<String>) -> Self {
        Error::Search(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Error::InvalidResponse(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidResponse(err.to_string())
    }
}
