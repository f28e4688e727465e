//! The chat command language.
//!
//! ```text
//! /explain p<N> "<word>" [#<K>] [context:"<context>"]
//! /quote   p<N> "<text>" [#<K>] <question...>
//! /page    p<N> <question...>
//! /book    <question...>
//! ```
//!
//! Anything else is a regular message. Quoted fields run to the next `"`;
//! there is no escape syntax, so generated commands swap inner double quotes
//! for single quotes.

use crate::context::extract_context;
use crate::error::FormatError;
use crate::occurrence::{Selection, find_occurrences, resolve_occurrence};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub type PageNumber = u32;

const EXPLAIN: &str = "/explain";
const QUOTE: &str = "/quote";
const PAGE: &str = "/page";
const BOOK: &str = "/book";

const EXPLAIN_USAGE: &str = "/explain p<page> \"word\" [#occurrence] [context:\"text\"]";
const QUOTE_USAGE: &str = "/quote p<page> \"text\" [#occurrence] <question>";

static RE_EXPLAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(\S+)\s+"([^"]*)"(?:\s+#(\S+))?(?:\s+context:"([^"]*)")?\s*$"#)
        .unwrap()
});
static RE_QUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)^\s*(\S+)\s+"([^"]*)"(?:\s+#(\d\S*))?(.*)$"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Explain {
        page: PageNumber,
        word: String,
        occurrence: Option<u32>,
        context: Option<String>,
    },
    Quote {
        page: PageNumber,
        quoted_text: String,
        occurrence: Option<u32>,
        question: String,
    },
    Page {
        page: PageNumber,
        question: String,
    },
    Book {
        question: String,
    },
    Regular {
        text: String,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Explain { .. } => CommandKind::Explain,
            Command::Quote { .. } => CommandKind::Quote,
            Command::Page { .. } => CommandKind::Page,
            Command::Book { .. } => CommandKind::Book,
            Command::Regular { .. } => CommandKind::Regular,
        }
    }

    pub fn page(&self) -> Option<PageNumber> {
        match self {
            Command::Explain { page, .. }
            | Command::Quote { page, .. }
            | Command::Page { page, .. } => Some(*page),
            Command::Book { .. } | Command::Regular { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CommandKind {
    Explain,
    Quote,
    Page,
    Book,
    Regular,
}

impl CommandKind {
    /// Classify a message by its leading keyword without reading its fields.
    pub fn detect(message: &str) -> Self {
        split_keyword(message)
            .map(|(kind, _)| kind)
            .unwrap_or(CommandKind::Regular)
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CommandKind::Explain => "explain",
            CommandKind::Quote => "quote",
            CommandKind::Page => "page",
            CommandKind::Book => "book",
            CommandKind::Regular => "regular",
        };
        write!(f, "{}", label)
    }
}

/// Parse a raw chat message. `total_pages == 0` disables the upper page bound.
pub fn parse_command(message: &str, total_pages: u32) -> Result<Command, FormatError> {
    let Some((kind, rest)) = split_keyword(message) else {
        return Ok(Command::Regular {
            text: message.to_string(),
        });
    };
    match kind {
        CommandKind::Explain => parse_explain(rest, total_pages),
        CommandKind::Quote => parse_quote(rest, total_pages),
        CommandKind::Page => parse_page(rest, total_pages),
        CommandKind::Book => parse_book(rest),
        CommandKind::Regular => Ok(Command::Regular {
            text: message.to_string(),
        }),
    }
}

/// Parse a `p<N>` page marker.
pub fn parse_page_number(token: &str, total_pages: u32) -> Result<PageNumber, FormatError> {
    let Some(digits) = token.strip_prefix('p') else {
        return Err(FormatError::MissingPagePrefix {
            token: token.to_string(),
        });
    };
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(FormatError::InvalidPageDigits {
            token: token.to_string(),
        });
    }
    let page: PageNumber = digits.parse().map_err(|_| FormatError::PageTooLarge {
        token: token.to_string(),
    })?;
    if page == 0 {
        return Err(FormatError::PageZero);
    }
    if total_pages > 0 && page > total_pages {
        return Err(FormatError::PageOutOfRange { page, total_pages });
    }
    Ok(page)
}

/// Page a command points at, if it names one and the marker is well formed.
pub fn referenced_page(message: &str) -> Option<PageNumber> {
    let (kind, rest) = split_keyword(message)?;
    if matches!(kind, CommandKind::Book | CommandKind::Regular) {
        return None;
    }
    let token = rest.split_whitespace().next()?;
    parse_page_number(token, 0).ok()
}

/// Draft a `/quote` command for a selection on `page_text`. The returned text
/// ends with a space so the reader can type the question straight after it.
pub fn generate_quote_command(
    page_text: &str,
    page: PageNumber,
    selection: Selection,
) -> Result<String, FormatError> {
    ensure_page(page)?;
    let (quoted, selection) = trimmed_selection(page_text, selection)?;
    let mut command = format!("{QUOTE} p{page} \"{}\"", fold_quotes(&quoted));
    if let Some(occurrence) = disambiguate(page_text, &quoted, selection, false) {
        command.push_str(&format!(" #{occurrence}"));
    }
    command.push(' ');
    Ok(command)
}

/// Draft a complete `/explain` command for a selected word, carrying
/// `context_words` words of surrounding text on each side.
pub fn generate_explain_command(
    page_text: &str,
    page: PageNumber,
    selection: Selection,
    context_words: usize,
) -> Result<String, FormatError> {
    ensure_page(page)?;
    let (word, selection) = trimmed_selection(page_text, selection)?;
    let mut command = format!("{EXPLAIN} p{page} \"{}\"", fold_quotes(&word));
    if let Some(occurrence) = disambiguate(page_text, &word, selection, true) {
        command.push_str(&format!(" #{occurrence}"));
    }
    let context = collapse_whitespace(&extract_context(page_text, selection, context_words));
    if !context.is_empty() {
        command.push_str(&format!(" context:\"{}\"", fold_quotes(&context)));
    }
    Ok(command)
}

pub fn page_command(page: PageNumber) -> String {
    format!("{PAGE} p{page} ")
}

pub fn book_command() -> String {
    format!("{BOOK} ")
}

fn split_keyword(message: &str) -> Option<(CommandKind, &str)> {
    let trimmed = message.trim_start();
    [
        (EXPLAIN, CommandKind::Explain),
        (QUOTE, CommandKind::Quote),
        (PAGE, CommandKind::Page),
        (BOOK, CommandKind::Book),
    ]
    .into_iter()
    .find_map(|(keyword, kind)| {
        let rest = trimmed.strip_prefix(keyword)?;
        (rest.is_empty() || rest.starts_with(char::is_whitespace)).then_some((kind, rest))
    })
}

fn parse_explain(rest: &str, total_pages: u32) -> Result<Command, FormatError> {
    let Some(caps) = RE_EXPLAIN.captures(rest) else {
        return Err(malformed_or_missing_page(rest, EXPLAIN, EXPLAIN_USAGE));
    };
    let page = parse_page_number(&caps[1], total_pages)?;
    let word = caps[2].trim();
    if word.is_empty() {
        return Err(FormatError::EmptyQuotedText { command: EXPLAIN });
    }
    let occurrence = caps
        .get(3)
        .map(|tag| parse_occurrence(tag.as_str()))
        .transpose()?;
    let context = caps
        .get(4)
        .map(|ctx| ctx.as_str().trim().to_string())
        .filter(|ctx| !ctx.is_empty());
    Ok(Command::Explain {
        page,
        word: word.to_string(),
        occurrence,
        context,
    })
}

fn parse_quote(rest: &str, total_pages: u32) -> Result<Command, FormatError> {
    let Some(caps) = RE_QUOTE.captures(rest) else {
        return Err(malformed_or_missing_page(rest, QUOTE, QUOTE_USAGE));
    };
    let page = parse_page_number(&caps[1], total_pages)?;
    let quoted_text = caps[2].trim();
    if quoted_text.is_empty() {
        return Err(FormatError::EmptyQuotedText { command: QUOTE });
    }
    let occurrence = caps
        .get(3)
        .map(|tag| parse_occurrence(tag.as_str()))
        .transpose()?;
    let question = caps.get(4).map(|q| q.as_str().trim()).unwrap_or_default();
    if question.is_empty() {
        return Err(FormatError::EmptyQuestion { command: QUOTE });
    }
    Ok(Command::Quote {
        page,
        quoted_text: quoted_text.to_string(),
        occurrence,
        question: question.to_string(),
    })
}

fn parse_page(rest: &str, total_pages: u32) -> Result<Command, FormatError> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(FormatError::MissingPageMarker { command: PAGE });
    }
    let (token, question) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));
    let page = parse_page_number(token, total_pages)?;
    let question = question.trim();
    if question.is_empty() {
        return Err(FormatError::EmptyQuestion { command: PAGE });
    }
    Ok(Command::Page {
        page,
        question: question.to_string(),
    })
}

fn parse_book(rest: &str) -> Result<Command, FormatError> {
    let question = rest.trim();
    if question.is_empty() {
        return Err(FormatError::EmptyQuestion { command: BOOK });
    }
    Ok(Command::Book {
        question: question.to_string(),
    })
}

fn parse_occurrence(token: &str) -> Result<u32, FormatError> {
    match token.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(FormatError::InvalidOccurrence {
            token: token.to_string(),
        }),
    }
}

fn malformed_or_missing_page(
    rest: &str,
    command: &'static str,
    usage: &'static str,
) -> FormatError {
    let rest = rest.trim_start();
    if rest.is_empty() || rest.starts_with('"') {
        FormatError::MissingPageMarker { command }
    } else {
        FormatError::Malformed { command, usage }
    }
}

fn ensure_page(page: PageNumber) -> Result<(), FormatError> {
    if page == 0 {
        return Err(FormatError::PageZero);
    }
    Ok(())
}

/// Selected text with surrounding whitespace removed, plus the matching range.
fn trimmed_selection(
    page_text: &str,
    selection: Selection,
) -> Result<(String, Selection), FormatError> {
    let chars: Vec<char> = page_text.chars().collect();
    if !selection.is_valid_for(chars.len()) {
        return Err(FormatError::InvalidSelection {
            start: selection.start,
            end: selection.end,
            len: chars.len(),
        });
    }
    let selected = &chars[selection.start..selection.end];
    let leading = selected.iter().take_while(|ch| ch.is_whitespace()).count();
    if leading == selected.len() {
        return Err(FormatError::EmptySelection);
    }
    let trailing = selected
        .iter()
        .rev()
        .take_while(|ch| ch.is_whitespace())
        .count();
    let trimmed = Selection::new(selection.start + leading, selection.end - trailing);
    let text = chars[trimmed.start..trimmed.end].iter().collect();
    Ok((text, trimmed))
}

// Tags are only worth emitting when the text is actually ambiguous.
fn disambiguate(
    page_text: &str,
    needle: &str,
    selection: Selection,
    whole_words_only: bool,
) -> Option<u32> {
    let page_text = fold_quotes(page_text);
    let needle = fold_quotes(needle);
    let info = find_occurrences(&page_text, &needle, whole_words_only);
    if info.total_count <= 1 {
        return None;
    }
    resolve_occurrence(&page_text, &needle, selection, whole_words_only)
}

/// The grammar has no escapes, so `"` inside a field is carried as `'`.
/// The swap is one char for one char and keeps offsets aligned.
pub(crate) fn fold_quotes(text: &str) -> String {
    text.replace('"', "'")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
