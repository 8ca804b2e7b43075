//! Error types for quill-agent

use thiserror::Error;

/// Result type alias using quill-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can surface to the caller of the chat runtime
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] quill_ai::Error),

    /// No persisted conversation with this id
    #[error("Conversation not found: {0}")]
    NotFound(String),

    /// The id cannot name a stored conversation
    #[error("Invalid conversation id: {0:?}")]
    InvalidId(String),

    /// The primary snapshot could not be read or written
    #[error("Persistence error for {id}: {source}")]
    Persistence {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record could not be decoded
    #[error("Corrupt transcript {id}: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn persistence(id: &str, source: std::io::Error) -> Self {
        Self::Persistence {
            id: id.to_string(),
            source,
        }
    }

    /// A record that could not be encoded for writing; nothing on disk is bad
    pub(crate) fn encoding(id: &str, source: serde_json::Error) -> Self {
        Self::persistence(id, std::io::Error::new(std::io::ErrorKind::InvalidData, source))
    }

    /// Whether the turn was cancelled by the user
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Ai(e) if e.is_aborted())
    }
}
