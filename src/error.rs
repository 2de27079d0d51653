//! Error handling for ring-relay
//!
//! This module defines the crate-wide error type and a Result alias. Errors
//! raised inside the ring itself live in [`crate::pipeline::error`] and are
//! wrapped here.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for ring-relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Errors raised by the dispatcher or a stage
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RelayError>,
    },
}

impl RelayError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RelayError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for ring-relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<RelayError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Into::<RelayError>::into(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Into::<RelayError>::into(e).with_context(f()))
    }
}
