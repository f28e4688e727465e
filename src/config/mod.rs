//! Configuration loading for the ask-the-book chat.
//!
//! Settings are read from `conf/config.toml` when present. Missing tables,
//! missing keys and unreadable files all fall back to defaults so the chat can
//! still start against a stock local model server.

mod defaults;
mod io;
mod models;
mod tables;

pub use io::{load_config, serialize_config};
pub use models::{AppConfig, LogLevel};
