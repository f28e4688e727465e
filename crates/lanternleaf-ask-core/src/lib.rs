//! Core of the reader's "ask the book" feature.
//!
//! Turns chat commands typed against a page (`/explain`, `/quote`, `/page`,
//! `/book`) into prompts, and drives a single local inference engine with
//! stop/restart semantics that never let a cancelled request leak into the
//! visible chat.

pub mod context;
pub mod engine;
pub mod error;
pub mod generation;
pub mod grammar;
pub mod occurrence;
pub mod processor;

pub use error::{EngineError, FormatError, GenerationError, ValidationError};
