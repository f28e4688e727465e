//! Error taxonomy for command handling and generation.
//!
//! `FormatError` is produced synchronously while reading a chat command and
//! never reaches the engine. `ValidationError` and `EngineError` come out of
//! the generation path and are shown to the reader once, after the visible
//! chat entry has been finalized.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid {command} command; expected {usage}")]
    Malformed {
        command: &'static str,
        usage: &'static str,
    },
    #[error("the quoted text in {command} must not be empty")]
    EmptyQuotedText { command: &'static str },
    #[error("{command} needs a question")]
    EmptyQuestion { command: &'static str },
    #[error("{command} needs a page marker such as p12")]
    MissingPageMarker { command: &'static str },
    #[error("page marker `{token}` must start with `p`")]
    MissingPagePrefix { token: String },
    #[error("page marker `{token}` must be `p` followed by digits")]
    InvalidPageDigits { token: String },
    #[error("page marker `{token}` is too large")]
    PageTooLarge { token: String },
    #[error("page numbers start at 1")]
    PageZero,
    #[error("page {page} is out of range; the book has {total_pages} pages")]
    PageOutOfRange { page: u32, total_pages: u32 },
    #[error("occurrence tag `#{token}` must be a number starting at 1")]
    InvalidOccurrence { token: String },
    #[error("selection {start}..{end} does not fit the page text ({len} characters)")]
    InvalidSelection {
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("the selection contains no text")]
    EmptySelection,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no model is selected; choose a model in the assistant settings")]
    NoModelSelected,
    #[error("{message}")]
    ModelUnavailable { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("failed to initialize model `{model}`: {message}")]
    Initialize { model: String, message: String },
    #[error("failed to reset the model session: {message}")]
    Reset { message: String },
    #[error("generation failed: {message}")]
    Run { message: String },
    #[error("failed to release model `{model}`: {message}")]
    CleanUp { model: String, message: String },
    #[error("operation cancelled at stage={stage}")]
    Cancelled { stage: &'static str },
    #[error("the chat controller is no longer listening")]
    Disconnected,
}

/// Anything that can keep a generation from starting or finishing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl GenerationError {
    /// Single-shot text for the chat surface.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Validation(err) => err.to_string(),
            GenerationError::Engine(err) => format!("The assistant stopped: {err}"),
        }
    }
}
