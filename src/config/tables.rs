use super::defaults;
use super::models::{AppConfig, LogLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub(super) struct ConfigTables {
    #[serde(default)]
    model: ModelConfig,
    #[serde(default)]
    commands: CommandsConfig,
    #[serde(default)]
    book: BookConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

impl From<ConfigTables> for AppConfig {
    fn from(tables: ConfigTables) -> Self {
        AppConfig {
            model_name: tables.model.name,
            base_url: tables.model.base_url,
            temperature: tables.model.temperature,
            max_tokens: tables.model.max_tokens,
            top_k: tables.model.top_k,
            request_timeout_secs: tables.model.request_timeout_secs,
            explain_context_words: tables.commands.explain_context_words,
            quote_context_words: tables.commands.quote_context_words,
            max_page_chars: tables.commands.max_page_chars,
            lines_per_page: tables.book.lines_per_page,
            log_level: tables.logging.log_level,
        }
    }
}

impl From<&AppConfig> for ConfigTables {
    fn from(config: &AppConfig) -> Self {
        ConfigTables {
            model: ModelConfig {
                name: config.model_name.clone(),
                base_url: config.base_url.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                top_k: config.top_k,
                request_timeout_secs: config.request_timeout_secs,
            },
            commands: CommandsConfig {
                explain_context_words: config.explain_context_words,
                quote_context_words: config.quote_context_words,
                max_page_chars: config.max_page_chars,
            },
            book: BookConfig {
                lines_per_page: config.lines_per_page,
            },
            logging: LoggingConfig {
                log_level: config.log_level,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ModelConfig {
    #[serde(default = "defaults::default_model_name")]
    name: String,
    #[serde(default = "defaults::default_base_url")]
    base_url: String,
    #[serde(default = "defaults::default_temperature")]
    temperature: f32,
    #[serde(default = "defaults::default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "defaults::default_top_k")]
    top_k: u32,
    #[serde(default = "defaults::default_request_timeout_secs")]
    request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            name: defaults::default_model_name(),
            base_url: defaults::default_base_url(),
            temperature: defaults::default_temperature(),
            max_tokens: defaults::default_max_tokens(),
            top_k: defaults::default_top_k(),
            request_timeout_secs: defaults::default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct CommandsConfig {
    #[serde(default = "defaults::default_explain_context_words")]
    explain_context_words: usize,
    #[serde(default = "defaults::default_quote_context_words")]
    quote_context_words: usize,
    #[serde(default = "defaults::default_max_page_chars")]
    max_page_chars: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        CommandsConfig {
            explain_context_words: defaults::default_explain_context_words(),
            quote_context_words: defaults::default_quote_context_words(),
            max_page_chars: defaults::default_max_page_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct BookConfig {
    #[serde(default = "defaults::default_lines_per_page")]
    lines_per_page: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        BookConfig {
            lines_per_page: defaults::default_lines_per_page(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}
