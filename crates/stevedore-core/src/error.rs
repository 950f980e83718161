use thiserror::Error;

use crate::id::ContentId;

pub type Result<T> = std::result::Result<T, StevedoreError>;

#[derive(Debug, Error)]
pub enum StevedoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("content not found: {0}")]
    ContentNotFound(ContentId),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<StevedoreError>,
    },

    #[error("{0}")]
    Other(String),
}

impl StevedoreError {
    /// Wrap with a short contextual phrase. `Cancelled` stays detectable
    /// through the chain via [`is_cancelled`].
    pub fn context(self, context: impl Into<String>) -> Self {
        StevedoreError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True if this error (or any error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            StevedoreError::Cancelled => true,
            StevedoreError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Extension adding `.context("...")` to `Result`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}
