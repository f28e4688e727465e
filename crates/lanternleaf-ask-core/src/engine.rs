//! Collaborators the generation controller drives.
//!
//! Engines report streaming output through a [`StreamSink`], which tags every
//! event with the generation it belongs to and funnels it into the channel the
//! controller drains on the thread that owns the chat state.

use crate::error::EngineError;
use crate::generation::GenerationId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelHandle {
    pub name: String,
}

impl ModelHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Sampling settings applied when a session is created or reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub temperature: f32,
}

/// A single local inference engine holding at most one live exchange.
///
/// `run_inference` must return promptly and stream from elsewhere; the
/// controller never blocks on it.
pub trait InferenceEngine: Send + Sync {
    fn initialize(&self, model: &ModelHandle, settings: &SessionSettings)
    -> Result<(), EngineError>;

    fn reset_session(
        &self,
        model: &ModelHandle,
        settings: &SessionSettings,
    ) -> Result<(), EngineError>;

    fn run_inference(
        &self,
        model: &ModelHandle,
        prompt: &str,
        images: &[Vec<u8>],
        sink: StreamSink,
    ) -> Result<(), EngineError>;

    fn clean_up(&self, model: &ModelHandle) -> Result<(), EngineError>;
}

/// Outcome of checking the reader's model selection before a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelValidation {
    pub is_valid: bool,
    pub model: Option<ModelHandle>,
    pub error_message: Option<String>,
}

impl ModelValidation {
    pub fn valid(model: ModelHandle) -> Self {
        Self {
            is_valid: true,
            model: Some(model),
            error_message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            model: None,
            error_message: Some(message.into()),
        }
    }
}

pub trait ModelValidator: Send + Sync {
    fn validate_selected_model(&self, task_hint: &str) -> ModelValidation;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Newly produced text; `done` marks natural completion.
    Chunk { delta: String, done: bool },
    /// The engine gave up on this call.
    Failed { message: String },
    /// The engine has finished unwinding the call, whatever its outcome.
    Released,
}

/// Stop signal for one generation, shared by the controller and the engine.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Engine-side handle for one generation.
#[derive(Debug, Clone)]
pub struct StreamSink {
    generation: GenerationId,
    sender: Sender<(GenerationId, StreamEvent)>,
    cancel: CancellationToken,
}

impl StreamSink {
    pub(crate) fn new(
        generation: GenerationId,
        sender: Sender<(GenerationId, StreamEvent)>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            generation,
            sender,
            cancel,
        }
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn partial(&self, delta: impl Into<String>, done: bool) -> Result<(), EngineError> {
        self.send(StreamEvent::Chunk {
            delta: delta.into(),
            done,
        })
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<(), EngineError> {
        self.send(StreamEvent::Failed {
            message: message.into(),
        })
    }

    pub fn release(&self) -> Result<(), EngineError> {
        self.send(StreamEvent::Released)
    }

    /// Set once the reader stopped this generation. Engines may poll it to
    /// cut work short; output sent afterwards is discarded anyway.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self, stage: &'static str) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled { stage });
        }
        Ok(())
    }

    fn send(&self, event: StreamEvent) -> Result<(), EngineError> {
        self.sender
            .send((self.generation, event))
            .map_err(|_| EngineError::Disconnected)
    }
}
