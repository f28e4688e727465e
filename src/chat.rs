//! Interactive terminal chat against one book.
//!
//! Lines starting with `:` are local commands; everything else goes through
//! the command processor and on to the model. While an answer streams, stdin
//! is not read and Ctrl-C stops the generation instead of exiting.

use crate::book::TextBook;
use anyhow::{Context, Result, anyhow, bail};
use lanternleaf_ask_core::generation::{ChatUpdate, GenerationController, GenerationId};
use lanternleaf_ask_core::grammar::{
    PageNumber, generate_explain_command, generate_quote_command,
};
use lanternleaf_ask_core::occurrence::Selection;
use lanternleaf_ask_core::processor::CommandProcessor;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const HELP: &str = "Commands: :select <page> <start> <end> quote|explain, :page <n>, \
:temp <0.0-2.0>, :attach <image>, :quit. Anything else is sent to the assistant; \
/explain, /quote, /page and /book are understood. Ctrl-C stops a running answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectAction {
    Quote,
    Explain,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Empty,
    Quit,
    Help,
    Temperature(f32),
    ShowPage(PageNumber),
    Attach(PathBuf),
    Select {
        page: PageNumber,
        selection: Selection,
        action: SelectAction,
    },
    Message(String),
}

pub fn parse_input(line: &str) -> Result<ChatInput> {
    let message = line.trim_end_matches(['\r', '\n']);
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Ok(ChatInput::Empty);
    }
    let Some(local) = trimmed.strip_prefix(':') else {
        return Ok(ChatInput::Message(message.to_string()));
    };

    let mut parts = local.split_whitespace();
    let input = match parts.next() {
        Some("quit" | "q") => ChatInput::Quit,
        Some("help" | "h") => ChatInput::Help,
        Some("temp") => {
            let value = parts.next().ok_or_else(|| anyhow!("usage: :temp <0.0-2.0>"))?;
            let value: f32 = value
                .parse()
                .with_context(|| format!("`{value}` is not a number"))?;
            if !(0.0..=2.0).contains(&value) {
                bail!("temperature must be between 0.0 and 2.0");
            }
            ChatInput::Temperature(value)
        }
        Some("page") => ChatInput::ShowPage(parse_number(parts.next(), ":page <n>")?),
        Some("attach") => {
            let path = local
                .trim_start()
                .strip_prefix("attach")
                .unwrap_or_default()
                .trim();
            if path.is_empty() {
                bail!("usage: :attach <image path>");
            }
            ChatInput::Attach(PathBuf::from(path))
        }
        Some("select") => {
            const USAGE: &str = ":select <page> <start> <end> quote|explain";
            let page = parse_number(parts.next(), USAGE)?;
            let start = parse_number(parts.next(), USAGE)?;
            let end = parse_number(parts.next(), USAGE)?;
            let action = match parts.next() {
                Some("quote") => SelectAction::Quote,
                Some("explain") => SelectAction::Explain,
                _ => bail!("usage: {USAGE}"),
            };
            ChatInput::Select {
                page,
                selection: Selection::new(start as usize, end as usize),
                action,
            }
        }
        _ => bail!("unknown command; type :help"),
    };
    Ok(input)
}

fn parse_number(token: Option<&str>, usage: &str) -> Result<u32> {
    let token = token.ok_or_else(|| anyhow!("usage: {usage}"))?;
    token
        .parse()
        .with_context(|| format!("`{token}` is not a number; usage: {usage}"))
}

/// Shared between the chat loop and the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlags {
    streaming: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl InterruptFlags {
    /// Returns false when nothing is streaming, so the caller can exit.
    pub fn request_stop(&self) -> bool {
        if !self.streaming.load(Ordering::SeqCst) {
            return false;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        true
    }

    fn begin_streaming(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.streaming.store(true, Ordering::SeqCst);
    }

    fn end_streaming(&self) {
        self.streaming.store(false, Ordering::SeqCst);
    }

    fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::SeqCst)
    }
}

pub struct ChatSession {
    book: TextBook,
    processor: CommandProcessor,
    controller: GenerationController,
    flags: InterruptFlags,
    pending_images: Vec<Vec<u8>>,
}

impl ChatSession {
    pub fn new(
        book: TextBook,
        processor: CommandProcessor,
        controller: GenerationController,
    ) -> Self {
        Self {
            book,
            processor,
            controller,
            flags: InterruptFlags::default(),
            pending_images: Vec::new(),
        }
    }

    pub fn interrupt_flags(&self) -> InterruptFlags {
        self.flags.clone()
    }

    pub fn run(&mut self) -> Result<()> {
        let info = self.book.info();
        println!(
            "Chatting about \"{}\" ({} pages). Type :help for commands.",
            info.title, info.total_pages
        );
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("> ");
            io::stdout().flush().context("Failed to flush stdout")?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line.context("Failed to read from stdin")?;
            match parse_input(&line) {
                Ok(ChatInput::Quit) => break,
                Ok(ChatInput::Select {
                    page,
                    selection,
                    action: SelectAction::Quote,
                }) => {
                    let Some(draft) = self.draft(page, selection, SelectAction::Quote) else {
                        continue;
                    };
                    print!("{draft}");
                    io::stdout().flush().context("Failed to flush stdout")?;
                    let question = match lines.next() {
                        Some(line) => line.context("Failed to read from stdin")?,
                        None => break,
                    };
                    if question.trim().is_empty() {
                        println!("Quote discarded.");
                        continue;
                    }
                    self.send(&format!("{draft}{}", question.trim()))?;
                }
                Ok(input) => self.handle(input)?,
                Err(err) => println!("{err:#}"),
            }
        }
        for update in self.controller.shutdown() {
            debug!(?update, "Final update on shutdown");
        }
        info!("Chat session closed");
        Ok(())
    }

    fn handle(&mut self, input: ChatInput) -> Result<()> {
        match input {
            ChatInput::Empty | ChatInput::Quit => {}
            ChatInput::Help => println!("{HELP}"),
            ChatInput::Temperature(value) => {
                self.controller.set_temperature(value);
                println!("Temperature set to {value}; applies to the next message.");
            }
            ChatInput::ShowPage(page) => match self.book.page(page) {
                Some(text) => println!("--- page {page} ---\n{text}\n---"),
                None => println!(
                    "There is no page {page}; the book has {} pages.",
                    self.book.info().total_pages
                ),
            },
            ChatInput::Attach(path) => match fs::read(&path) {
                Ok(bytes) => {
                    info!(path = %path.display(), bytes = bytes.len(), "Attached image");
                    self.pending_images.push(bytes);
                    println!("Attached {}; it goes out with the next message.", path.display());
                }
                Err(err) => println!("Could not read {}: {err}", path.display()),
            },
            ChatInput::Select {
                page,
                selection,
                action,
            } => {
                if let Some(draft) = self.draft(page, selection, action) {
                    println!("{draft}");
                    self.send(&draft)?;
                }
            }
            ChatInput::Message(message) => self.send(&message)?,
        }
        Ok(())
    }

    fn draft(
        &self,
        page: PageNumber,
        selection: Selection,
        action: SelectAction,
    ) -> Option<String> {
        let Some(text) = self.book.page(page) else {
            println!("There is no page {page}.");
            return None;
        };
        let draft = match action {
            SelectAction::Quote => generate_quote_command(text, page, selection),
            SelectAction::Explain => generate_explain_command(
                text,
                page,
                selection,
                self.processor.explain_context_words,
            ),
        };
        match draft {
            Ok(draft) => Some(draft),
            Err(err) => {
                println!("{err}");
                None
            }
        }
    }

    fn send(&mut self, message: &str) -> Result<()> {
        let processed =
            match self
                .processor
                .process_with_source(message, self.book.info(), &self.book)
            {
                Ok(processed) => processed,
                Err(err) => {
                    println!("{err}");
                    return Ok(());
                }
            };
        info!(kind = %processed.kind, "Sending chat message");
        let images = std::mem::take(&mut self.pending_images);
        match self.controller.start(&processed.prompt, &images) {
            Ok(generation) => self.stream(generation),
            Err(err) => {
                warn!("Generation did not start: {err}");
                println!("{}", err.user_message());
                Ok(())
            }
        }
    }

    fn stream(&mut self, generation: GenerationId) -> Result<()> {
        self.flags.begin_streaming();
        let result = self.follow(generation);
        self.flags.end_streaming();
        result
    }

    fn follow(&mut self, generation: GenerationId) -> Result<()> {
        let mut printed = 0usize;
        while self.controller.is_generating() {
            if self.flags.take_stop_request() {
                let updates = self.controller.stop();
                render(&updates, generation, &mut printed)?;
                println!("[stopped]");
                return Ok(());
            }
            let updates = self.controller.wait_for_updates(POLL_INTERVAL);
            render(&updates, generation, &mut printed)?;
        }
        Ok(())
    }
}

/// Print the unseen tail of the visible entry for `generation`.
fn render(updates: &[ChatUpdate], generation: GenerationId, printed: &mut usize) -> Result<()> {
    let mut stdout = io::stdout();
    for update in updates {
        match update {
            ChatUpdate::Streaming {
                generation_id,
                entry,
            } if *generation_id == generation => {
                write_tail(&mut stdout, &entry.text, printed)?;
            }
            ChatUpdate::Finished {
                generation_id,
                entry,
                ..
            } if *generation_id == generation => {
                write_tail(&mut stdout, &entry.text, printed)?;
                writeln!(stdout).context("Failed to write to stdout")?;
            }
            ChatUpdate::Failed {
                generation_id,
                message,
                ..
            } if *generation_id == generation => {
                writeln!(stdout, "\n{message}").context("Failed to write to stdout")?;
            }
            _ => {}
        }
    }
    stdout.flush().context("Failed to flush stdout")
}

fn write_tail(out: &mut impl Write, text: &str, printed: &mut usize) -> Result<()> {
    if let Some(tail) = text.get(*printed..) {
        out.write_all(tail.as_bytes())
            .context("Failed to write to stdout")?;
        *printed = text.len();
    }
    Ok(())
}
