//! Pagination for plain-text books.
//!
//! Pages are filled paragraph by paragraph up to a line budget, counting the
//! blank line between paragraphs. A paragraph longer than a whole page is split
//! on line boundaries.

/// Split the provided text into pages of at most `lines_per_page` lines.
pub fn paginate(text: &str, lines_per_page: usize) -> Vec<String> {
    let budget = lines_per_page.max(1);
    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return vec![String::new()];
    }

    let mut pages = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for para in &paragraphs {
        let separator = usize::from(!current.is_empty());
        if !current.is_empty() && current.len() + separator + para.len() > budget {
            pages.push(current.join("\n"));
            current.clear();
        }

        if para.len() > budget {
            // Oversized paragraph: emit full pages and keep the tail open.
            let mut lines = para.as_slice();
            while lines.len() > budget {
                let (head, tail) = lines.split_at(budget);
                pages.push(head.join("\n"));
                lines = tail;
            }
            current.extend_from_slice(lines);
            continue;
        }

        if !current.is_empty() {
            current.push("");
        }
        current.extend_from_slice(para);
    }

    if !current.is_empty() {
        pages.push(current.join("\n"));
    }

    pages
}

/// Split text into paragraphs separated by blank lines.
fn split_paragraphs(text: &str) -> Vec<Vec<&str>> {
    let mut paragraphs = Vec::new();
    let mut buffer = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !buffer.is_empty() {
                paragraphs.push(std::mem::take(&mut buffer));
            }
        } else {
            buffer.push(line.trim_end());
        }
    }

    if !buffer.is_empty() {
        paragraphs.push(buffer);
    }

    paragraphs
}
