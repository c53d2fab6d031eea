use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Audio decode error: {0}")]
    Audio(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("File is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("Unsupported or corrupt file: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        Error::Audio(e.to_string())
    }
}

/// A per-file failure that excluded the file from a search without aborting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub path: PathBuf,
    pub reason: String,
}

impl FileError {
    pub fn new(path: impl Into<PathBuf>, err: &Error) -> Self {
        Self {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
