//! Custom error types for the analytics core.
//!
//! `StdfError` consolidates every failure the library can surface. Using the
//! `thiserror` crate, the lower-level sources (I/O, SQLite, JSON, figment) convert
//! into it through `#[from]`, so the `?` operator works across module seams.
//!
//! ## Error Hierarchy
//!
//! - **`NotFound`**: a requested file, job id or cache id does not exist. Surfaced
//!   immediately, never retried.
//! - **`Decode`**: malformed or truncated input met while decoding, or a record
//!   field of the wrong type. Inside the job manager this never reaches the
//!   caller; it becomes the job's terminal `error` state instead.
//! - **`InvalidQuery`**: paging parameters outside their allowed range.
//! - **`Io`**, **`Database`**, **`Serialization`**, **`Config`**: wrapped sources.
//! - **`Configuration`**: a configuration that parsed but is semantically wrong.
//! - **`Task`**: a background decode task could not be joined.
//!
//! A stale persistent payload is deliberately absent here: it is a cache miss,
//! not an error.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, StdfError>;

/// Errors produced by the analytics core.
#[derive(Error, Debug)]
pub enum StdfError {
    /// Missing file, job or cache row.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The decoder rejected the input.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A caller-supplied filter or page is out of range.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Filesystem failure other than a missing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload JSON could not be written or read.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Figment could not extract the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// A configuration value failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}

impl StdfError {
    /// True for the `NotFound` family, which a transport layer maps to 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StdfError::NotFound(_))
    }

    /// Builds the `NotFound` error for a missing file path.
    pub fn file_not_found(path: &std::path::Path) -> Self {
        StdfError::NotFound(format!("file {} does not exist", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_is_wrapped_as_io() {
        let err: StdfError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(matches!(err, StdfError::Io(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_message_names_the_path() {
        let err = StdfError::file_not_found(std::path::Path::new("data/lot42.stdf"));
        assert!(err.is_not_found());
        assert!(err.to_string().contains("lot42.stdf"));
    }
}
