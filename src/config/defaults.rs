use lanternleaf_ask_core::processor::{
    DEFAULT_EXPLAIN_CONTEXT_WORDS, DEFAULT_MAX_PAGE_CHARS, DEFAULT_QUOTE_CONTEXT_WORDS,
};

pub(crate) fn default_model_name() -> String {
    "gemma3:4b".to_string()
}

pub(crate) fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

pub(crate) fn default_temperature() -> f32 {
    0.7
}

pub(crate) fn default_max_tokens() -> u32 {
    1024
}

pub(crate) fn default_top_k() -> u32 {
    40
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    10
}

pub(crate) fn default_explain_context_words() -> usize {
    DEFAULT_EXPLAIN_CONTEXT_WORDS
}

pub(crate) fn default_quote_context_words() -> usize {
    DEFAULT_QUOTE_CONTEXT_WORDS
}

pub(crate) fn default_max_page_chars() -> usize {
    DEFAULT_MAX_PAGE_CHARS
}

pub(crate) fn default_lines_per_page() -> usize {
    40
}

pub(crate) fn default_log_level() -> crate::config::LogLevel {
    crate::config::LogLevel::Info
}
