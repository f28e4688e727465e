//! Turns chat messages into model prompts.
//!
//! The processor is stateless. Page text is optional everywhere: when it is
//! missing the prompt falls back to naming the book and page only.

use crate::context::extract_context;
use crate::error::FormatError;
use crate::grammar::{
    Command, CommandKind, PageNumber, fold_quotes, parse_command, referenced_page,
};
use crate::occurrence::occurrence_span;
use serde::Serialize;
use tracing::{debug, info};
use ts_rs::TS;

pub const DEFAULT_EXPLAIN_CONTEXT_WORDS: usize = 25;
pub const DEFAULT_QUOTE_CONTEXT_WORDS: usize = 60;
pub const DEFAULT_MAX_PAGE_CHARS: usize = 6000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    pub total_pages: u32,
}

impl BookInfo {
    fn reference(&self) -> String {
        let title = self.title.trim();
        let author = self.author.trim();
        match (title.is_empty(), author.is_empty()) {
            (true, _) => "the current book".to_string(),
            (false, true) => format!("\"{title}\""),
            (false, false) => format!("\"{title}\" by {author}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ProcessedCommand {
    pub kind: CommandKind,
    pub prompt: String,
    pub original_message: String,
}

/// Supplies page text on demand. `None` means the page is not available
/// right now, which is not an error.
pub trait PageSource {
    fn page_text(&self, book_id: &str, page: PageNumber) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandProcessor {
    pub explain_context_words: usize,
    pub quote_context_words: usize,
    /// Upper bound on embedded page text; 0 disables the bound.
    pub max_page_chars: usize,
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self {
            explain_context_words: DEFAULT_EXPLAIN_CONTEXT_WORDS,
            quote_context_words: DEFAULT_QUOTE_CONTEXT_WORDS,
            max_page_chars: DEFAULT_MAX_PAGE_CHARS,
        }
    }
}

impl CommandProcessor {
    pub fn new(
        explain_context_words: usize,
        quote_context_words: usize,
        max_page_chars: usize,
    ) -> Self {
        Self {
            explain_context_words,
            quote_context_words,
            max_page_chars,
        }
    }

    pub fn process(
        &self,
        message: &str,
        book: &BookInfo,
        page_content: Option<&str>,
    ) -> Result<ProcessedCommand, FormatError> {
        let command = parse_command(message, book.total_pages)?;
        let kind = command.kind();
        let page = command.page();
        let page_content = page_content.filter(|text| !text.trim().is_empty());
        let book_ref = book.reference();

        let prompt = match command {
            Command::Explain {
                page,
                word,
                occurrence,
                context,
            } => {
                let context = context.or_else(|| {
                    page_content
                        .and_then(|text| self.recover_explain_context(text, &word, occurrence))
                });
                explain_prompt(&book_ref, page, &word, occurrence, context.as_deref())
            }
            Command::Quote {
                page,
                quoted_text,
                occurrence,
                question,
            } => self.quote_prompt(
                &book_ref,
                page,
                &quoted_text,
                occurrence,
                &question,
                page_content,
            ),
            Command::Page { page, question } => {
                self.page_prompt(&book_ref, page, &question, page_content)
            }
            Command::Book { question } => {
                format!("Answer a question about {book_ref}.\n\nQuestion: {question}")
            }
            Command::Regular { text } => text,
        };

        debug!(
            %kind,
            page = ?page,
            has_page_content = page_content.is_some(),
            prompt_chars = prompt.chars().count(),
            "Resolved chat command"
        );
        Ok(ProcessedCommand {
            kind,
            prompt,
            original_message: message.to_string(),
        })
    }

    /// Like [`process`](Self::process), fetching the referenced page from
    /// `source` first.
    pub fn process_with_source(
        &self,
        message: &str,
        book: &BookInfo,
        source: &dyn PageSource,
    ) -> Result<ProcessedCommand, FormatError> {
        let page = referenced_page(message);
        let content = page.and_then(|page| source.page_text(&book.id, page));
        if let (Some(page), None) = (page, content.as_ref()) {
            info!(
                book = %book.id,
                page,
                "Page content unavailable; using a context-free prompt"
            );
        }
        self.process(message, book, content.as_deref())
    }

    fn recover_explain_context(
        &self,
        page_text: &str,
        word: &str,
        occurrence: Option<u32>,
    ) -> Option<String> {
        let span = occurrence_span(
            &fold_quotes(page_text),
            &fold_quotes(word),
            occurrence.unwrap_or(1),
            true,
        )?;
        let context = extract_context(page_text, span, self.explain_context_words);
        let context = context.split_whitespace().collect::<Vec<_>>().join(" ");
        (!context.is_empty()).then_some(context)
    }

    fn quote_prompt(
        &self,
        book_ref: &str,
        page: PageNumber,
        quoted_text: &str,
        occurrence: Option<u32>,
        question: &str,
        page_content: Option<&str>,
    ) -> String {
        let header = format!(
            "The reader is asking about this passage from page {page} of {book_ref}:\n\n\"{quoted_text}\""
        );
        let Some(page_text) = page_content else {
            return format!("{header}\n\nQuestion: {question}");
        };
        let occurrence = occurrence.unwrap_or(1);
        // Drafted quotes carry `'` where the page has `"`; folding keeps
        // char offsets aligned with the original text.
        let span = occurrence_span(
            &fold_quotes(page_text),
            &fold_quotes(quoted_text),
            occurrence,
            false,
        );
        match span {
            Some(span) => {
                let window = extract_context(page_text, span, self.quote_context_words);
                debug!(
                    page,
                    occurrence,
                    window_chars = window.chars().count(),
                    "Quote resolved on page"
                );
                format!(
                    "{header}\n\nSurrounding text:\n{}\n\nQuestion: {question}",
                    self.bound_page_text(&window)
                )
            }
            None => {
                debug!(page, occurrence, "Quote not found on page; embedding the full page");
                format!(
                    "{header}\n\nPage {page} text:\n{}\n\nQuestion: {question}",
                    self.bound_page_text(page_text)
                )
            }
        }
    }

    fn page_prompt(
        &self,
        book_ref: &str,
        page: PageNumber,
        question: &str,
        page_content: Option<&str>,
    ) -> String {
        match page_content {
            Some(text) => format!(
                "Answer a question about page {page} of {book_ref}.\n\nPage text:\n{}\n\nQuestion: {question}",
                self.bound_page_text(text)
            ),
            None => format!(
                "Answer a question about page {page} of {book_ref}. The page text is not available, so rely on what you know about the book.\n\nQuestion: {question}"
            ),
        }
    }

    fn bound_page_text(&self, text: &str) -> String {
        let text = text.trim();
        if self.max_page_chars == 0 || text.chars().count() <= self.max_page_chars {
            return text.to_string();
        }
        let head: String = text.chars().take(self.max_page_chars).collect();
        let on_boundary = text
            .chars()
            .nth(self.max_page_chars)
            .is_some_and(char::is_whitespace);
        // Never end on half a word.
        let cut = match head.rfind(char::is_whitespace) {
            Some(idx) if idx > 0 && !on_boundary => &head[..idx],
            _ => head.as_str(),
        };
        format!("{} …", cut.trim_end())
    }
}

fn explain_prompt(
    book_ref: &str,
    page: PageNumber,
    word: &str,
    occurrence: Option<u32>,
    context: Option<&str>,
) -> String {
    let mut prompt =
        format!("Explain the meaning of \"{word}\" as it is used on page {page} of {book_ref}.");
    if let Some(occurrence) = occurrence.filter(|k| *k > 1) {
        prompt.push_str(&format!(" This is occurrence {occurrence} of the word on that page."));
    }
    if let Some(context) = context {
        prompt.push_str(&format!(
            "\n\nHere is the passage where it appears:\n\"{context}\"\n\nKeep the explanation short and focused on this usage."
        ));
    }
    prompt
}
