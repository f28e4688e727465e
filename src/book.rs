//! Plain-text books served page by page.

use crate::pagination::paginate;
use anyhow::{Context, Result};
use lanternleaf_ask_core::grammar::PageNumber;
use lanternleaf_ask_core::processor::{BookInfo, PageSource};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TextBook {
    info: BookInfo,
    pages: Vec<String>,
}

impl TextBook {
    pub fn load(
        path: &Path,
        title: Option<String>,
        author: Option<String>,
        lines_per_page: usize,
    ) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read book text from {}", path.display()))?;
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".to_string());
        let book = Self::from_text(
            &stem,
            title.unwrap_or_else(|| stem.replace(['_', '-'], " ")),
            author.unwrap_or_default(),
            &text,
            lines_per_page,
        );
        info!(
            path = %path.display(),
            pages = book.info.total_pages,
            lines_per_page,
            "Loaded book"
        );
        Ok(book)
    }

    pub fn from_text(
        id: &str,
        title: String,
        author: String,
        text: &str,
        lines_per_page: usize,
    ) -> Self {
        let pages = paginate(text, lines_per_page);
        Self {
            info: BookInfo {
                id: id.to_string(),
                title,
                author,
                total_pages: u32::try_from(pages.len()).unwrap_or(u32::MAX),
            },
            pages,
        }
    }

    pub fn info(&self) -> &BookInfo {
        &self.info
    }

    /// 1-based page lookup.
    pub fn page(&self, page: PageNumber) -> Option<&str> {
        let idx = (page as usize).checked_sub(1)?;
        self.pages.get(idx).map(String::as_str)
    }
}

impl PageSource for TextBook {
    fn page_text(&self, book_id: &str, page: PageNumber) -> Option<String> {
        if book_id != self.info.id {
            return None;
        }
        self.page(page).map(str::to_string)
    }
}
