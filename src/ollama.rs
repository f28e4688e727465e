//! Local Ollama server as the inference engine.
//!
//! Generations stream NDJSON from `/api/generate` on a dedicated thread and
//! report through the controller's sink. Conversation memory is the `context`
//! array Ollama returns on completion; resetting the session drops it.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use base64::Engine as _;
use lanternleaf_ask_core::EngineError;
use lanternleaf_ask_core::engine::{
    InferenceEngine, ModelHandle, ModelValidation, ModelValidator, SessionSettings, StreamSink,
};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub base_url: String,
    pub max_tokens: u32,
    pub top_k: u32,
    pub connect_timeout: Duration,
}

impl OllamaSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            max_tokens: config.max_tokens,
            top_k: config.top_k,
            connect_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    temperature: f32,
    context: Vec<i64>,
    // Bumped on every reset; a worker only writes back context for its epoch.
    epoch: u64,
}

pub struct OllamaEngine {
    client: Client,
    settings: OllamaSettings,
    session: Arc<Mutex<SessionState>>,
}

impl OllamaEngine {
    pub fn new(settings: OllamaSettings) -> Result<Self> {
        // No overall timeout: long answers stream for minutes.
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(None::<Duration>)
            .build()
            .context("failed to build ollama http client")?;
        Ok(Self {
            client,
            settings,
            session: Arc::new(Mutex::new(SessionState::default())),
        })
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        lock_session(&self.session)
    }

    fn restart_session(&self, settings: &SessionSettings) -> u64 {
        let mut session = self.session();
        session.temperature = settings.temperature;
        session.context.clear();
        session.epoch += 1;
        session.epoch
    }

    fn post_blocking(&self, request: &GenerateReq) -> Result<()> {
        let response = self
            .client
            .post(self.settings.url("/api/generate"))
            .json(request)
            .send()
            .context("failed to call ollama generate endpoint")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!(
                "ollama /api/generate returned {status}: {}",
                normalize_err_body(&body)
            );
        }
        Ok(())
    }
}

impl InferenceEngine for OllamaEngine {
    fn initialize(
        &self,
        model: &ModelHandle,
        settings: &SessionSettings,
    ) -> Result<(), EngineError> {
        self.restart_session(settings);
        // An empty prompt makes the server load the model without generating.
        let request = GenerateReq::control(&model.name, None);
        self.post_blocking(&request)
            .map_err(|err| EngineError::Initialize {
                model: model.name.clone(),
                message: format!("{err:#}"),
            })?;
        info!(model = %model, temperature = settings.temperature, "Model loaded");
        Ok(())
    }

    fn reset_session(
        &self,
        model: &ModelHandle,
        settings: &SessionSettings,
    ) -> Result<(), EngineError> {
        let epoch = self.restart_session(settings);
        debug!(model = %model, epoch, "Cleared conversation context");
        Ok(())
    }

    fn run_inference(
        &self,
        model: &ModelHandle,
        prompt: &str,
        images: &[Vec<u8>],
        sink: StreamSink,
    ) -> Result<(), EngineError> {
        let (request, epoch) = {
            let session = self.session();
            let request = GenerateReq {
                model: model.name.clone(),
                prompt: prompt.to_string(),
                stream: true,
                images: encode_images(images),
                context: session.context.clone(),
                options: Some(GenerateOptions {
                    temperature: session.temperature,
                    top_k: self.settings.top_k,
                    num_predict: self.settings.max_tokens,
                }),
                keep_alive: None,
            };
            (request, session.epoch)
        };
        let worker = StreamWorker {
            client: self.client.clone(),
            url: self.settings.url("/api/generate"),
            session: Arc::clone(&self.session),
            epoch,
        };
        let generation = sink.generation();
        thread::Builder::new()
            .name(format!("ollama-generate-{generation}"))
            .spawn(move || worker.run(request, sink))
            .map_err(|err| EngineError::Run {
                message: format!("failed to spawn generation thread: {err}"),
            })?;
        Ok(())
    }

    fn clean_up(&self, model: &ModelHandle) -> Result<(), EngineError> {
        {
            let mut session = self.session();
            session.context.clear();
            session.epoch += 1;
        }
        let request = GenerateReq::control(&model.name, Some(0));
        self.post_blocking(&request)
            .map_err(|err| EngineError::CleanUp {
                model: model.name.clone(),
                message: format!("{err:#}"),
            })?;
        info!(model = %model, "Model unloaded");
        Ok(())
    }
}

struct StreamWorker {
    client: Client,
    url: String,
    session: Arc<Mutex<SessionState>>,
    epoch: u64,
}

impl StreamWorker {
    fn run(self, request: GenerateReq, sink: StreamSink) {
        let generation = sink.generation();
        if let Err(err) = self.pump(&request, &sink) {
            if sink.is_cancelled() {
                debug!(%generation, "Generation ended after stop: {err:#}");
            } else {
                warn!(%generation, "Ollama generation failed: {err:#}");
                if sink.fail(format!("{err:#}")).is_err() {
                    debug!(%generation, "Chat controller gone before failure report");
                }
            }
        }
        if sink.release().is_err() {
            debug!(%generation, "Chat controller gone before release");
        }
    }

    fn pump(&self, request: &GenerateReq, sink: &StreamSink) -> Result<()> {
        sink.check_cancelled("request")?;
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .context("failed to call ollama generate endpoint")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!(
                "ollama /api/generate returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        for line in BufReader::new(response).lines() {
            sink.check_cancelled("stream")?;
            let line = line.context("failed to read ollama stream")?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk = parse_chunk(&line)?;
            if let Some(error) = chunk.error {
                anyhow::bail!("ollama reported an error: {error}");
            }
            if chunk.done {
                if let Some(context) = chunk.context {
                    self.store_context(sink, context);
                }
            }
            sink.partial(chunk.response, chunk.done)?;
            if chunk.done {
                return Ok(());
            }
        }
        anyhow::bail!("ollama stream ended before completion")
    }

    fn store_context(&self, sink: &StreamSink, context: Vec<i64>) {
        let mut session = lock_session(&self.session);
        if session.epoch != self.epoch || sink.is_cancelled() {
            debug!(
                generation = %sink.generation(),
                "Discarding context from a superseded session"
            );
            return;
        }
        session.context = context;
    }
}

fn lock_session(session: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    session
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Serialize)]
struct GenerateReq {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    context: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<i64>,
}

impl GenerateReq {
    /// Empty-prompt request used to load (`keep_alive = None`) or unload
    /// (`Some(0)`) a model.
    fn control(model: &str, keep_alive: Option<i64>) -> Self {
        Self {
            model: model.to_string(),
            prompt: String::new(),
            stream: false,
            images: Vec::new(),
            context: Vec::new(),
            options: None,
            keep_alive,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_k: u32,
    num_predict: u32,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    context: Option<Vec<i64>>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_chunk(line: &str) -> Result<GenerateChunk> {
    serde_json::from_str(line).with_context(|| format!("invalid ollama stream line: {line}"))
}

fn encode_images(images: &[Vec<u8>]) -> Vec<String> {
    images
        .iter()
        .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
        .collect()
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }
    trimmed.to_string()
}

/// Checks the configured model against what the local server has pulled.
pub struct OllamaModelValidator {
    client: Client,
    settings: OllamaSettings,
    model_name: String,
}

impl OllamaModelValidator {
    pub fn new(settings: OllamaSettings, model_name: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.connect_timeout)
            .build()
            .context("failed to build ollama http client")?;
        Ok(Self {
            client,
            settings,
            model_name,
        })
    }

    fn installed_models(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct TagsResp {
            #[serde(default)]
            models: Vec<TagEntry>,
        }

        #[derive(Deserialize)]
        struct TagEntry {
            name: String,
        }

        let tags = self
            .client
            .get(self.settings.url("/api/tags"))
            .send()
            .context("failed to call ollama tags endpoint")?
            .error_for_status()
            .context("ollama tags returned non-success status")?
            .json::<TagsResp>()
            .context("failed to decode ollama tags response")?;
        Ok(tags.models.into_iter().map(|entry| entry.name).collect())
    }
}

impl ModelValidator for OllamaModelValidator {
    fn validate_selected_model(&self, task_hint: &str) -> ModelValidation {
        if self.model_name.is_empty() {
            return ModelValidation {
                is_valid: false,
                model: None,
                error_message: None,
            };
        }
        match self.installed_models() {
            Ok(installed) if model_listed(&installed, &self.model_name) => {
                debug!(model = %self.model_name, task_hint, "Model validated");
                ModelValidation::valid(ModelHandle::new(self.model_name.clone()))
            }
            Ok(installed) => {
                debug!(installed = installed.len(), "Configured model not installed");
                ModelValidation::invalid(format!(
                    "Model `{}` is not downloaded. Run `ollama pull {}` or pick another model in conf/config.toml.",
                    self.model_name, self.model_name
                ))
            }
            Err(err) => ModelValidation::invalid(format!(
                "Could not reach the model server at {}: {err:#}",
                self.settings.base_url
            )),
        }
    }
}

/// Ollama lists untagged pulls as `name:latest`.
fn model_listed(installed: &[String], wanted: &str) -> bool {
    installed.iter().any(|name| {
        name == wanted
            || (!wanted.contains(':') && name.strip_suffix(":latest") == Some(wanted))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_lines() {
        let chunk = parse_chunk(r#"{"model":"m","response":"Hel","done":false}"#).unwrap();
        assert_eq!(chunk.response, "Hel");
        assert!(!chunk.done);

        let last = parse_chunk(r#"{"response":"","done":true,"context":[1,2,3]}"#).unwrap();
        assert!(last.done);
        assert_eq!(last.context, Some(vec![1, 2, 3]));

        let failed = parse_chunk(r#"{"error":"model not found"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("model not found"));

        assert!(parse_chunk("not json").is_err());
    }

    #[test]
    fn control_requests_skip_generation_fields() {
        let unload = serde_json::to_value(GenerateReq::control("gemma", Some(0))).unwrap();
        assert_eq!(
            unload,
            serde_json::json!({"model": "gemma", "prompt": "", "stream": false, "keep_alive": 0})
        );
    }

    #[test]
    fn images_are_base64_encoded() {
        assert_eq!(encode_images(&[b"hi".to_vec()]), vec!["aGk=".to_string()]);
        assert!(encode_images(&[]).is_empty());
    }

    #[test]
    fn error_bodies_prefer_json_message() {
        assert_eq!(normalize_err_body(r#"{"error":"boom"}"#), "boom");
        assert_eq!(normalize_err_body("  plain "), "plain");
        assert_eq!(normalize_err_body(""), "<empty body>");
    }

    #[test]
    fn untagged_model_matches_latest() {
        let installed = vec!["gemma3:4b".to_string(), "llama3.2:latest".to_string()];
        assert!(model_listed(&installed, "gemma3:4b"));
        assert!(model_listed(&installed, "llama3.2"));
        assert!(!model_listed(&installed, "gemma3"));
        assert!(!model_listed(&installed, "llama3.2:1b"));
    }

    #[test]
    fn settings_follow_config() {
        let settings = OllamaSettings::from_config(&AppConfig::default());
        assert_eq!(settings.url("/api/tags"), "http://127.0.0.1:11434/api/tags");
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
    }
}
