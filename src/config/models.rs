use super::defaults;
use lanternleaf_ask_core::processor::CommandProcessor;
use serde::{Deserialize, Serialize};

pub(crate) const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
pub(crate) const MAX_CONTEXT_WORDS: usize = 200;
pub(crate) const LINES_PER_PAGE_RANGE: (usize, usize) = (10, 400);

/// Flat runtime configuration; the on-disk form is grouped into tables.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "crate::config::defaults::default_model_name")]
    pub model_name: String,
    #[serde(default = "crate::config::defaults::default_base_url")]
    pub base_url: String,
    #[serde(default = "crate::config::defaults::default_temperature")]
    pub temperature: f32,
    #[serde(default = "crate::config::defaults::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "crate::config::defaults::default_top_k")]
    pub top_k: u32,
    #[serde(default = "crate::config::defaults::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "crate::config::defaults::default_explain_context_words")]
    pub explain_context_words: usize,
    #[serde(default = "crate::config::defaults::default_quote_context_words")]
    pub quote_context_words: usize,
    #[serde(default = "crate::config::defaults::default_max_page_chars")]
    pub max_page_chars: usize,
    #[serde(default = "crate::config::defaults::default_lines_per_page")]
    pub lines_per_page: usize,
    #[serde(default = "crate::config::defaults::default_log_level")]
    pub log_level: LogLevel,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            model_name: defaults::default_model_name(),
            base_url: defaults::default_base_url(),
            temperature: defaults::default_temperature(),
            max_tokens: defaults::default_max_tokens(),
            top_k: defaults::default_top_k(),
            request_timeout_secs: defaults::default_request_timeout_secs(),
            explain_context_words: defaults::default_explain_context_words(),
            quote_context_words: defaults::default_quote_context_words(),
            max_page_chars: defaults::default_max_page_chars(),
            lines_per_page: defaults::default_lines_per_page(),
            log_level: defaults::default_log_level(),
        }
    }
}

impl AppConfig {
    /// Pull out-of-range values back into their supported ranges.
    pub(crate) fn clamped(mut self) -> Self {
        self.temperature = if self.temperature.is_finite() {
            self.temperature
                .clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)
        } else {
            defaults::default_temperature()
        };
        self.explain_context_words = self.explain_context_words.min(MAX_CONTEXT_WORDS);
        self.quote_context_words = self.quote_context_words.min(MAX_CONTEXT_WORDS);
        self.lines_per_page = self
            .lines_per_page
            .clamp(LINES_PER_PAGE_RANGE.0, LINES_PER_PAGE_RANGE.1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.model_name = self.model_name.trim().to_string();
        self
    }

    pub fn command_processor(&self) -> CommandProcessor {
        CommandProcessor::new(
            self.explain_context_words,
            self.quote_context_words,
            self.max_page_chars,
        )
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
