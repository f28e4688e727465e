//! Entry point for the ask-the-book terminal chat.
//!
//! Responsibilities here are intentionally minimal:
//! - Parse command-line arguments.
//! - Load user configuration from `conf/config.toml`.
//! - Load the book text and wire the local model into the chat loop.

mod book;
mod chat;
mod config;
mod ollama;
mod pagination;

use crate::book::TextBook;
use crate::chat::ChatSession;
use crate::config::{load_config, serialize_config};
use crate::ollama::{OllamaEngine, OllamaModelValidator, OllamaSettings};
use anyhow::{Context, Result, anyhow};
use lanternleaf_ask_core::generation::GenerationController;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const USAGE: &str = "Usage: lanternleaf-ask <book.txt> [--title <title>] [--author <author>] \
[--config <path>] [--dump-config]";

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let config = load_config(&args.config_path);
    set_log_level(reload_handle, config.log_level.as_filter_str());

    if args.dump_config {
        let text = serialize_config(&config).context("Failed to serialize config")?;
        println!("{text}");
        return Ok(());
    }

    let book_path = args.book_path.ok_or_else(|| anyhow!(USAGE))?;
    if !book_path.exists() {
        return Err(anyhow!("File not found: {}", book_path.display()));
    }
    info!(
        path = %book_path.display(),
        level = %config.log_level,
        "Starting ask-the-book chat"
    );
    info!(
        model = %config.model_name,
        base_url = %config.base_url,
        temperature = config.temperature,
        max_tokens = config.max_tokens,
        "Active model configuration"
    );

    let book = TextBook::load(&book_path, args.title, args.author, config.lines_per_page)?;
    let settings = OllamaSettings::from_config(&config);
    let engine = Arc::new(OllamaEngine::new(settings.clone())?);
    let validator = Arc::new(OllamaModelValidator::new(
        settings,
        config.model_name.clone(),
    )?);
    let controller = GenerationController::new(engine, validator, config.temperature);

    let mut session = ChatSession::new(book, config.command_processor(), controller);
    let flags = session.interrupt_flags();
    if let Err(err) = ctrlc::set_handler(move || {
        if flags.request_stop() {
            info!("Received Ctrl+C; stopping the running answer");
        } else {
            info!("Received Ctrl+C at the prompt; exiting");
            std::process::exit(130);
        }
    }) {
        warn!("Failed to install Ctrl+C signal handler: {err}");
    }

    session.run().context("Chat session failed")
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    book_path: Option<PathBuf>,
    title: Option<String>,
    author: Option<String>,
    config_path: PathBuf,
    dump_config: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut parsed = CliArgs {
        config_path: PathBuf::from("conf/config.toml"),
        ..CliArgs::default()
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--title" => parsed.title = Some(flag_value(&mut args, "--title")?),
            "--author" => parsed.author = Some(flag_value(&mut args, "--author")?),
            "--config" => parsed.config_path = PathBuf::from(flag_value(&mut args, "--config")?),
            "--dump-config" => parsed.dump_config = true,
            "-h" | "--help" => return Err(anyhow!(USAGE)),
            flag if flag.starts_with("--") => {
                return Err(anyhow!("Unknown flag {flag}\n{USAGE}"));
            }
            _ if parsed.book_path.is_none() => parsed.book_path = Some(PathBuf::from(&arg)),
            _ => return Err(anyhow!("Unexpected argument {arg}\n{USAGE}")),
        }
    }
    Ok(parsed)
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("{flag} needs a value\n{USAGE}"))
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        info!("RUST_LOG is set; ignoring log level from config");
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
