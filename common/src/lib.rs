use thiserror::Error;

pub mod config;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// Unusable startup configuration. The process must not proceed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The storage system identity could not be established.
    #[error("Identity error: {0}")]
    Identity(String),

    /// A payload did not have a shape the extractors understand.
    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Fatal errors abort the run; everything else is recovered per file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Identity(_) | Error::Config(_)
        )
    }
}
