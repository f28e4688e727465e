//! Generation lifecycle for the single local inference engine.
//!
//! Exactly one [`GenerationId`] is current at any time. Engine output is only
//! ever applied to the visible chat entry when it carries the current id, so
//! a stopped request can keep draining in the background without effect.
//! Stopping mints a fresh current id right away and schedules a session reset
//! for the next start, because the engine cannot take new input while an
//! earlier call is still unwinding.

use crate::engine::{
    CancellationToken, InferenceEngine, ModelHandle, ModelValidation, ModelValidator,
    SessionSettings, StreamEvent, StreamSink,
};
use crate::error::{EngineError, GenerationError, ValidationError};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};
use ts_rs::TS;

/// Task hint passed to the model validator for chat generations.
pub const CHAT_TASK_HINT: &str = "chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export)]
pub struct GenerationId(u64);

impl GenerationId {
    pub(crate) fn first() -> Self {
        GenerationId(1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The assistant turn as the chat surface shows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct StreamingChatEntry {
    pub text: String,
    pub is_streaming: bool,
    pub word_count: u32,
}

impl StreamingChatEntry {
    fn streaming() -> Self {
        Self {
            is_streaming: true,
            ..Self::default()
        }
    }

    fn append(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.word_count = self.text.split_whitespace().count() as u32;
    }

    fn finalize(&mut self) {
        self.is_streaming = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum ChatUpdate {
    Streaming {
        generation_id: GenerationId,
        entry: StreamingChatEntry,
    },
    Finished {
        generation_id: GenerationId,
        entry: StreamingChatEntry,
        cancelled: bool,
    },
    Failed {
        generation_id: GenerationId,
        entry: StreamingChatEntry,
        message: String,
    },
}

pub struct GenerationController {
    engine: Arc<dyn InferenceEngine>,
    validator: Arc<dyn ModelValidator>,
    events_tx: Sender<(GenerationId, StreamEvent)>,
    events_rx: Receiver<(GenerationId, StreamEvent)>,
    last_minted: u64,
    current: GenerationId,
    active: BTreeSet<GenerationId>,
    cancelled: BTreeSet<GenerationId>,
    cancel_tokens: HashMap<GenerationId, CancellationToken>,
    entry: Option<StreamingChatEntry>,
    generating: bool,
    session_reset_pending: bool,
    temperature: f32,
    applied_temperature: Option<f32>,
    loaded_model: Option<ModelHandle>,
    outbox: Vec<ChatUpdate>,
}

impl GenerationController {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        validator: Arc<dyn ModelValidator>,
        temperature: f32,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            engine,
            validator,
            events_tx,
            events_rx,
            last_minted: GenerationId::first().0,
            current: GenerationId::first(),
            active: BTreeSet::new(),
            cancelled: BTreeSet::new(),
            cancel_tokens: HashMap::new(),
            entry: None,
            generating: false,
            session_reset_pending: false,
            temperature,
            applied_temperature: None,
            loaded_model: None,
            outbox: Vec::new(),
        }
    }

    pub fn current_generation(&self) -> GenerationId {
        self.current
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn session_reset_pending(&self) -> bool {
        self.session_reset_pending
    }

    pub fn entry(&self) -> Option<&StreamingChatEntry> {
        self.entry.as_ref()
    }

    pub fn is_active(&self, generation: GenerationId) -> bool {
        self.active.contains(&generation)
    }

    pub fn is_cancelled(&self, generation: GenerationId) -> bool {
        self.cancelled.contains(&generation)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Takes effect on the next start, which resets the session first.
    pub fn set_temperature(&mut self, temperature: f32) {
        if temperature != self.temperature {
            debug!(
                from = self.temperature,
                to = temperature,
                "Temperature changed; session reset scheduled"
            );
        }
        self.temperature = temperature;
    }

    /// Validate the model, bring the engine into a clean state and send
    /// `prompt`. A running generation is stopped first.
    pub fn start(
        &mut self,
        prompt: &str,
        images: &[Vec<u8>],
    ) -> Result<GenerationId, GenerationError> {
        let model = self.validated_model()?;
        if self.generating {
            info!(
                generation = %self.current,
                "Stopping running generation before starting a new one"
            );
            if let Some(update) = self.stop_current() {
                self.outbox.push(update);
            }
        }
        self.prepare_engine(&model)?;

        let generation = self.mint();
        self.current = generation;
        self.active.insert(generation);
        let cancel = CancellationToken::new();
        self.cancel_tokens.insert(generation, cancel.clone());
        self.entry = Some(StreamingChatEntry::streaming());
        self.generating = true;
        info!(
            %generation,
            model = %model,
            prompt_chars = prompt.chars().count(),
            images = images.len(),
            "Starting generation"
        );

        let sink = StreamSink::new(generation, self.events_tx.clone(), cancel);
        if let Err(err) = self.engine.run_inference(&model, prompt, images, sink) {
            warn!(%generation, "Engine refused generation: {err}");
            self.generating = false;
            self.session_reset_pending = true;
            if let Some(entry) = self.entry.as_mut() {
                entry.finalize();
            }
            self.release(generation);
            return Err(err.into());
        }
        Ok(generation)
    }

    /// Stop the visible effect of the running generation. The engine call
    /// itself keeps unwinding; its output is discarded from here on.
    pub fn stop(&mut self) -> Vec<ChatUpdate> {
        self.stop_current().into_iter().collect()
    }

    /// Apply one engine event. Events from any generation other than the
    /// current one only update bookkeeping.
    pub fn handle_event(
        &mut self,
        generation: GenerationId,
        event: StreamEvent,
    ) -> Option<ChatUpdate> {
        let live = generation == self.current && self.generating;
        match event {
            StreamEvent::Chunk { delta, done } => {
                if !live {
                    debug!(
                        %generation,
                        current = %self.current,
                        done,
                        "Ignoring stale generation update"
                    );
                    if done {
                        self.release(generation);
                    }
                    return None;
                }
                let entry = self.entry.get_or_insert_with(StreamingChatEntry::streaming);
                entry.append(&delta);
                if !done {
                    return Some(ChatUpdate::Streaming {
                        generation_id: generation,
                        entry: entry.clone(),
                    });
                }
                entry.finalize();
                let entry = entry.clone();
                self.generating = false;
                self.release(generation);
                info!(
                    %generation,
                    words = entry.word_count,
                    "Generation completed"
                );
                Some(ChatUpdate::Finished {
                    generation_id: generation,
                    entry,
                    cancelled: false,
                })
            }
            StreamEvent::Failed { message } => {
                self.release(generation);
                if !live {
                    debug!(%generation, "Ignoring failure from stale generation");
                    return None;
                }
                warn!(%generation, "Generation failed: {message}");
                self.generating = false;
                self.session_reset_pending = true;
                Some(ChatUpdate::Failed {
                    generation_id: generation,
                    entry: self.finalized_entry(),
                    message: GenerationError::from(EngineError::Run { message }).user_message(),
                })
            }
            StreamEvent::Released => {
                self.release(generation);
                if !live {
                    return None;
                }
                warn!(%generation, "Engine released generation before completing it");
                self.generating = false;
                self.session_reset_pending = true;
                Some(ChatUpdate::Finished {
                    generation_id: generation,
                    entry: self.finalized_entry(),
                    cancelled: false,
                })
            }
        }
    }

    /// Apply every event that has arrived so far.
    pub fn drain(&mut self) -> Vec<ChatUpdate> {
        let mut updates = std::mem::take(&mut self.outbox);
        while let Ok((generation, event)) = self.events_rx.try_recv() {
            updates.extend(self.handle_event(generation, event));
        }
        updates
    }

    /// Like [`drain`](Self::drain), but waits up to `timeout` for the first
    /// event when nothing is pending.
    pub fn wait_for_updates(&mut self, timeout: Duration) -> Vec<ChatUpdate> {
        if self.outbox.is_empty() {
            if let Ok((generation, event)) = self.events_rx.recv_timeout(timeout) {
                let update = self.handle_event(generation, event);
                self.outbox.extend(update);
            }
        }
        self.drain()
    }

    /// Stop anything in flight and release the loaded model.
    pub fn shutdown(&mut self) -> Vec<ChatUpdate> {
        let mut updates = self.drain();
        updates.extend(self.stop_current());
        if let Some(model) = self.loaded_model.take() {
            info!(model = %model, "Releasing inference engine");
            if let Err(err) = self.engine.clean_up(&model) {
                warn!(model = %model, "Failed to release model: {err}");
            }
        }
        self.applied_temperature = None;
        updates
    }

    fn mint(&mut self) -> GenerationId {
        self.last_minted += 1;
        GenerationId(self.last_minted)
    }

    fn validated_model(&self) -> Result<ModelHandle, ValidationError> {
        match self.validator.validate_selected_model(CHAT_TASK_HINT) {
            ModelValidation {
                is_valid: true,
                model: Some(model),
                ..
            } => Ok(model),
            ModelValidation {
                is_valid: false,
                error_message: Some(message),
                ..
            } => {
                warn!("Model validation failed: {message}");
                Err(ValidationError::ModelUnavailable { message })
            }
            _ => Err(ValidationError::NoModelSelected),
        }
    }

    fn prepare_engine(&mut self, model: &ModelHandle) -> Result<(), EngineError> {
        let settings = SessionSettings {
            temperature: self.temperature,
        };
        if self.loaded_model.as_ref() != Some(model) {
            if let Some(previous) = self.loaded_model.take() {
                info!(from = %previous, to = %model, "Switching models");
                if let Err(err) = self.engine.clean_up(&previous) {
                    warn!(model = %previous, "Failed to release model: {err}");
                }
            }
            info!(
                model = %model,
                temperature = self.temperature,
                "Initializing inference engine"
            );
            self.engine.initialize(model, &settings)?;
            self.loaded_model = Some(model.clone());
            self.applied_temperature = Some(self.temperature);
            self.session_reset_pending = false;
            return Ok(());
        }

        let temperature_changed = self.applied_temperature != Some(self.temperature);
        if temperature_changed || self.session_reset_pending {
            info!(
                temperature_changed,
                reset_pending = self.session_reset_pending,
                temperature = self.temperature,
                "Resetting engine session before generation"
            );
            self.engine.reset_session(model, &settings)?;
            self.applied_temperature = Some(self.temperature);
            self.session_reset_pending = false;
        }
        Ok(())
    }

    fn stop_current(&mut self) -> Option<ChatUpdate> {
        let previous = self.current;
        let was_active = self.active.contains(&previous);
        if was_active {
            self.cancelled.insert(previous);
            if let Some(token) = self.cancel_tokens.get(&previous) {
                token.cancel();
            }
            self.session_reset_pending = true;
        }
        self.current = self.mint();
        info!(
            stopped = %previous,
            current = %self.current,
            was_active,
            "Stopped generation"
        );
        if !self.generating {
            return None;
        }
        self.generating = false;
        Some(ChatUpdate::Finished {
            generation_id: previous,
            entry: self.finalized_entry(),
            cancelled: true,
        })
    }

    fn finalized_entry(&mut self) -> StreamingChatEntry {
        let entry = self.entry.get_or_insert_with(StreamingChatEntry::default);
        entry.finalize();
        entry.clone()
    }

    fn release(&mut self, generation: GenerationId) {
        self.active.remove(&generation);
        self.cancelled.remove(&generation);
        self.cancel_tokens.remove(&generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<String>>,
        sinks: Mutex<Vec<StreamSink>>,
        refuse_runs: AtomicBool,
        refuse_init: AtomicBool,
        refuse_reset: AtomicBool,
    }

    impl RecordingEngine {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn sink(&self, idx: usize) -> StreamSink {
            self.sinks.lock().unwrap()[idx].clone()
        }
    }

    impl InferenceEngine for RecordingEngine {
        fn initialize(
            &self,
            model: &ModelHandle,
            settings: &SessionSettings,
        ) -> Result<(), EngineError> {
            self.log(format!("initialize {} {}", model.name, settings.temperature));
            if self.refuse_init.load(Ordering::SeqCst) {
                return Err(EngineError::Initialize {
                    model: model.name.clone(),
                    message: "out of memory".to_string(),
                });
            }
            Ok(())
        }

        fn reset_session(
            &self,
            _model: &ModelHandle,
            settings: &SessionSettings,
        ) -> Result<(), EngineError> {
            self.log(format!("reset {}", settings.temperature));
            if self.refuse_reset.load(Ordering::SeqCst) {
                return Err(EngineError::Reset {
                    message: "session still unwinding".to_string(),
                });
            }
            Ok(())
        }

        fn run_inference(
            &self,
            _model: &ModelHandle,
            prompt: &str,
            _images: &[Vec<u8>],
            sink: StreamSink,
        ) -> Result<(), EngineError> {
            self.log(format!("run {prompt}"));
            if self.refuse_runs.load(Ordering::SeqCst) {
                return Err(EngineError::Run {
                    message: "engine busy".to_string(),
                });
            }
            self.sinks.lock().unwrap().push(sink);
            Ok(())
        }

        fn clean_up(&self, model: &ModelHandle) -> Result<(), EngineError> {
            self.log(format!("clean_up {}", model.name));
            Ok(())
        }
    }

    struct FixedValidator(Mutex<ModelValidation>);

    impl FixedValidator {
        fn with(validation: ModelValidation) -> Arc<Self> {
            Arc::new(Self(Mutex::new(validation)))
        }

        fn set(&self, validation: ModelValidation) {
            *self.0.lock().unwrap() = validation;
        }
    }

    impl ModelValidator for FixedValidator {
        fn validate_selected_model(&self, _task_hint: &str) -> ModelValidation {
            self.0.lock().unwrap().clone()
        }
    }

    fn controller() -> (GenerationController, Arc<RecordingEngine>, Arc<FixedValidator>) {
        let engine = Arc::new(RecordingEngine::default());
        let validator = FixedValidator::with(ModelValidation::valid(ModelHandle::new("gemma")));
        let controller = GenerationController::new(engine.clone(), validator.clone(), 0.7);
        (controller, engine, validator)
    }

    #[test]
    fn streams_and_completes_current_generation() {
        let (mut controller, engine, _) = controller();
        let generation = controller.start("hello", &[]).unwrap();
        assert_eq!(controller.current_generation(), generation);
        assert!(controller.is_active(generation));

        let sink = engine.sink(0);
        sink.partial("Hello ", false).unwrap();
        sink.partial("there reader", true).unwrap();
        let updates = controller.drain();

        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], ChatUpdate::Streaming { .. }));
        let entry = controller.entry().unwrap();
        assert_eq!(entry.text, "Hello there reader");
        assert_eq!(entry.word_count, 3);
        assert!(!entry.is_streaming);
        assert!(!controller.is_generating());
        assert!(!controller.is_active(generation));
        assert_eq!(
            engine.calls(),
            vec!["initialize gemma 0.7".to_string(), "run hello".to_string()]
        );
    }

    #[test]
    fn late_completion_after_stop_changes_nothing() {
        let (mut controller, engine, _) = controller();
        let first = controller.start("q", &[]).unwrap();
        let sink = engine.sink(0);
        sink.partial("Partial", false).unwrap();
        controller.drain();

        let stopped = controller.stop();
        assert_eq!(
            stopped,
            vec![ChatUpdate::Finished {
                generation_id: first,
                entry: StreamingChatEntry {
                    text: "Partial".to_string(),
                    is_streaming: false,
                    word_count: 1,
                },
                cancelled: true,
            }]
        );
        assert_ne!(controller.current_generation(), first);
        assert!(controller.is_cancelled(first));
        assert!(controller.session_reset_pending());
        assert!(sink.is_cancelled());

        sink.partial(" and more", true).unwrap();
        let before = controller.entry().cloned();
        assert!(controller.drain().is_empty());

        assert_eq!(controller.entry().cloned(), before);
        assert!(controller.session_reset_pending());
        assert!(!controller.is_active(first));
        assert!(!controller.is_cancelled(first));
    }

    #[test]
    fn rapid_stops_leave_one_fresh_current_id() {
        let (mut controller, _engine, _) = controller();
        let mut seen = vec![controller.start("q", &[]).unwrap()];
        for _ in 0..5 {
            controller.stop();
            seen.push(controller.current_generation());
        }
        let current = controller.current_generation();
        assert_eq!(seen.iter().filter(|id| **id == current).count(), 1);
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(!controller.is_generating());
    }

    #[test]
    fn cancelled_output_never_reaches_the_next_generation() {
        let (mut controller, engine, _) = controller();
        let first = controller.start("first", &[]).unwrap();
        controller.stop();
        let second = controller.start("second", &[]).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            engine.calls(),
            vec![
                "initialize gemma 0.7".to_string(),
                "run first".to_string(),
                "reset 0.7".to_string(),
                "run second".to_string(),
            ]
        );
        assert!(!controller.session_reset_pending());

        engine.sink(0).partial("old text", false).unwrap();
        engine.sink(1).partial("new text", false).unwrap();
        engine.sink(0).partial("", true).unwrap();
        let updates = controller.drain();

        assert_eq!(
            updates,
            vec![ChatUpdate::Streaming {
                generation_id: second,
                entry: StreamingChatEntry {
                    text: "new text".to_string(),
                    is_streaming: true,
                    word_count: 2,
                },
            }]
        );
        assert!(controller.is_generating());
        assert!(!controller.is_cancelled(first));
    }

    #[test]
    fn temperature_change_forces_reset_before_next_prompt() {
        let (mut controller, engine, _) = controller();
        controller.start("one", &[]).unwrap();
        engine.sink(0).partial("done", true).unwrap();
        controller.drain();
        controller.start("two", &[]).unwrap();
        engine.sink(1).partial("done", true).unwrap();
        controller.drain();
        assert!(!engine.calls().iter().any(|call| call.starts_with("reset")));

        controller.set_temperature(0.2);
        controller.start("three", &[]).unwrap();

        let calls = engine.calls();
        assert_eq!(&calls[calls.len() - 2..], ["reset 0.2", "run three"]);
    }

    #[test]
    fn failed_validation_mints_nothing() {
        let (mut controller, engine, validator) = controller();
        validator.set(ModelValidation::invalid("Download a model first"));
        let before = controller.current_generation();

        let err = controller.start("q", &[]).unwrap_err();

        assert_eq!(
            err,
            GenerationError::Validation(ValidationError::ModelUnavailable {
                message: "Download a model first".to_string(),
            })
        );
        assert_eq!(controller.current_generation(), before);
        assert!(engine.calls().is_empty());
        assert!(controller.entry().is_none());
    }

    #[test]
    fn missing_model_is_reported_as_unselected() {
        let (mut controller, _engine, validator) = controller();
        validator.set(ModelValidation {
            is_valid: false,
            model: None,
            error_message: None,
        });
        assert_eq!(
            controller.start("q", &[]),
            Err(GenerationError::Validation(ValidationError::NoModelSelected))
        );
    }

    #[test]
    fn refused_run_finalizes_entry_and_releases_id() {
        let (mut controller, engine, _) = controller();
        engine.refuse_runs.store(true, Ordering::SeqCst);

        let err = controller.start("q", &[]).unwrap_err();

        assert!(matches!(err, GenerationError::Engine(EngineError::Run { .. })));
        assert!(!controller.is_generating());
        assert!(!controller.entry().unwrap().is_streaming);
        assert!(!controller.is_active(controller.current_generation()));
        assert!(controller.session_reset_pending());
    }

    #[test]
    fn failed_initialize_starts_nothing_and_retries_next_time() {
        let (mut controller, engine, _) = controller();
        engine.refuse_init.store(true, Ordering::SeqCst);
        let before = controller.current_generation();

        let err = controller.start("q", &[]).unwrap_err();

        assert!(matches!(
            err,
            GenerationError::Engine(EngineError::Initialize { .. })
        ));
        assert_eq!(controller.current_generation(), before);
        assert!(!controller.is_active(before));
        assert!(!controller.is_generating());
        assert!(controller.entry().is_none());
        assert_eq!(engine.calls(), vec!["initialize gemma 0.7".to_string()]);

        engine.refuse_init.store(false, Ordering::SeqCst);
        let generation = controller.start("q", &[]).unwrap();
        assert!(generation > before);
        let calls = engine.calls();
        assert_eq!(&calls[1..], ["initialize gemma 0.7", "run q"]);
    }

    #[test]
    fn failed_reset_keeps_reset_pending() {
        let (mut controller, engine, _) = controller();
        controller.start("first", &[]).unwrap();
        controller.stop();
        let stopped_at = controller.current_generation();
        engine.refuse_reset.store(true, Ordering::SeqCst);

        let err = controller.start("second", &[]).unwrap_err();

        assert!(matches!(err, GenerationError::Engine(EngineError::Reset { .. })));
        assert_eq!(controller.current_generation(), stopped_at);
        assert!(!controller.is_active(stopped_at));
        assert!(!controller.is_generating());
        assert!(controller.session_reset_pending());
        assert!(!engine.calls().iter().any(|call| call == "run second"));

        engine.refuse_reset.store(false, Ordering::SeqCst);
        controller.start("third", &[]).unwrap();
        let calls = engine.calls();
        assert_eq!(&calls[calls.len() - 3..], ["reset 0.7", "reset 0.7", "run third"]);
        assert!(!controller.session_reset_pending());
    }

    #[test]
    fn mid_stream_failure_surfaces_once() {
        let (mut controller, engine, _) = controller();
        let generation = controller.start("q", &[]).unwrap();
        engine.sink(0).partial("Half an", false).unwrap();
        engine.sink(0).fail("model crashed").unwrap();
        engine.sink(0).release().unwrap();

        let updates = controller.drain();

        assert_eq!(updates.len(), 2);
        match &updates[1] {
            ChatUpdate::Failed {
                generation_id,
                entry,
                message,
            } => {
                assert_eq!(*generation_id, generation);
                assert_eq!(entry.text, "Half an");
                assert!(!entry.is_streaming);
                assert!(message.contains("model crashed"));
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(!controller.is_generating());
        assert!(!controller.is_active(generation));
        assert!(controller.session_reset_pending());
    }

    #[test]
    fn release_without_done_finalizes_entry() {
        let (mut controller, engine, _) = controller();
        controller.start("q", &[]).unwrap();
        engine.sink(0).partial("cut", false).unwrap();
        engine.sink(0).release().unwrap();

        let updates = controller.drain();

        assert!(matches!(
            updates.last(),
            Some(ChatUpdate::Finished {
                cancelled: false,
                ..
            })
        ));
        assert!(!controller.entry().unwrap().is_streaming);
    }

    #[test]
    fn starting_over_a_running_generation_cancels_it() {
        let (mut controller, _engine, _) = controller();
        let first = controller.start("first", &[]).unwrap();
        let second = controller.start("second", &[]).unwrap();

        assert!(controller.is_cancelled(first));
        assert!(controller.is_active(second));
        let updates = controller.drain();
        assert!(matches!(
            updates.as_slice(),
            [ChatUpdate::Finished {
                generation_id,
                cancelled: true,
                ..
            }] if *generation_id == first
        ));
    }

    #[test]
    fn model_switch_releases_previous_model() {
        let (mut controller, engine, validator) = controller();
        controller.start("q", &[]).unwrap();
        engine.sink(0).partial("ok", true).unwrap();
        controller.drain();

        validator.set(ModelValidation::valid(ModelHandle::new("llama")));
        controller.start("q2", &[]).unwrap();

        let calls = engine.calls();
        assert_eq!(
            &calls[2..],
            ["clean_up gemma", "initialize llama 0.7", "run q2"]
        );
    }

    #[test]
    fn shutdown_stops_and_cleans_up() {
        let (mut controller, engine, _) = controller();
        controller.start("q", &[]).unwrap();

        let updates = controller.shutdown();

        assert!(matches!(
            updates.as_slice(),
            [ChatUpdate::Finished {
                cancelled: true,
                ..
            }]
        ));
        assert_eq!(engine.calls().last().map(String::as_str), Some("clean_up gemma"));
    }

    #[test]
    fn wait_for_updates_returns_pending_events() {
        let (mut controller, engine, _) = controller();
        controller.start("q", &[]).unwrap();
        engine.sink(0).partial("a", false).unwrap();
        engine.sink(0).partial("b", false).unwrap();

        let updates = controller.wait_for_updates(Duration::from_millis(10));

        assert_eq!(updates.len(), 2);
        assert!(controller.wait_for_updates(Duration::from_millis(1)).is_empty());
    }
}
