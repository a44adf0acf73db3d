//! Error taxonomy for the install pipeline.
//!
//! Fatal, user-visible failures are `Error::Informative` and carry a single
//! line of text ready for display. Recoverable download exhaustion is never
//! an error; `Curl::fetch` reports it as `Ok(false)`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A fatal, user-facing failure. The message is the whole story.
    #[error("{0}")]
    Informative(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache serialization error: {0}")]
    Cache(#[from] bincode::Error),

    #[error("glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl Error {
    pub fn informative(message: impl Into<String>) -> Self {
        Error::Informative(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
