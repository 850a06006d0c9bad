//! Crate-wide error type
//!
//! Every backend failure is translated into one of these variants at the
//! call site; raw backend status codes never cross the public surface.

use thiserror::Error;

use crate::backend::Token;

pub type QuillResult<T> = Result<T, QuillError>;

#[derive(Debug, Error)]
pub enum QuillError {
    /// Operation requested in a state that does not allow it.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Chat template rejected the transcript: {0}")]
    Template(String),

    #[error("Failed to tokenize the prompt: {0}")]
    Tokenize(String),

    #[error("Context window exhausted: used={used}, incoming={incoming}, capacity={capacity}")]
    ContextOverflow {
        used: usize,
        incoming: usize,
        capacity: usize,
    },

    #[error("Backend decode step failed: status={0}")]
    Decode(i32),

    /// Token-to-text conversion failed. The vocabulary is corrupted and the
    /// session cannot continue; the manager closes it on this error.
    #[error("Vocabulary corruption: token {0} could not be converted to text")]
    VocabCorruption(Token),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuillError {
    /// Fatal errors abort the whole session, not just the current turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuillError::VocabCorruption(_))
    }
}
