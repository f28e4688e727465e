//! Word-bounded context windows around a selection.

use crate::occurrence::Selection;

/// Expand `selection` by `context_words` whole words on each side and return
/// the trimmed text. Words are never split; an invalid selection yields an
/// empty string.
pub fn extract_context(haystack: &str, selection: Selection, context_words: usize) -> String {
    let chars: Vec<char> = haystack.chars().collect();
    match context_bounds(&chars, selection, context_words) {
        Some(bounds) => chars[bounds.start..bounds.end]
            .iter()
            .collect::<String>()
            .trim()
            .to_string(),
        None => String::new(),
    }
}

/// Character range covered by [`extract_context`], before trimming.
pub fn context_bounds(
    chars: &[char],
    selection: Selection,
    context_words: usize,
) -> Option<Selection> {
    if !selection.is_valid_for(chars.len()) {
        return None;
    }
    let start = snap_left(chars, walk_left(chars, selection.start, context_words));
    let end = snap_right(chars, walk_right(chars, selection.end, context_words));
    Some(Selection::new(start, end))
}

// Stops on the whitespace that closes the `words`-th word to the left.
fn walk_left(chars: &[char], from: usize, words: usize) -> usize {
    let mut idx = from;
    let mut crossed = 0;
    while idx > 0 && crossed < words {
        idx -= 1;
        if chars[idx].is_whitespace() && idx > 0 && !chars[idx - 1].is_whitespace() {
            crossed += 1;
        }
    }
    idx
}

// Stops on the first character of the `words`-th word to the right.
fn walk_right(chars: &[char], from: usize, words: usize) -> usize {
    let mut idx = from;
    let mut crossed = 0;
    while idx < chars.len() && crossed < words {
        if chars[idx].is_whitespace() && chars.get(idx + 1).is_some_and(|ch| !ch.is_whitespace()) {
            crossed += 1;
        }
        idx += 1;
    }
    idx
}

// From a separator this pulls in the word that ends on it; from inside a word
// it moves to that word's first character.
fn snap_left(chars: &[char], mut idx: usize) -> usize {
    while idx > 0 && !chars[idx - 1].is_whitespace() {
        idx -= 1;
    }
    idx
}

fn snap_right(chars: &[char], mut idx: usize) -> usize {
    while idx < chars.len() && !chars[idx].is_whitespace() {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "one two three four five";

    #[test]
    fn expands_by_whole_words() {
        assert_eq!(extract_context(LINE, Selection::new(8, 13), 1), "two three four");
        assert_eq!(
            extract_context(LINE, Selection::new(8, 13), 2),
            "one two three four five"
        );
    }

    #[test]
    fn zero_words_returns_the_enclosing_word() {
        assert_eq!(extract_context(LINE, Selection::new(8, 13), 0), "three");
        assert_eq!(extract_context(LINE, Selection::new(9, 11), 0), "three");
    }

    #[test]
    fn partial_word_selection_is_widened_not_cut() {
        assert_eq!(extract_context(LINE, Selection::new(9, 12), 1), "two three four");
    }

    #[test]
    fn stops_at_text_edges() {
        assert_eq!(extract_context(LINE, Selection::new(0, 3), 5), LINE);
        assert_eq!(extract_context(LINE, Selection::new(19, 23), 1), "four five");
    }

    #[test]
    fn whitespace_runs_count_once() {
        let text = "alpha   beta\n\ngamma  delta";
        let start = text.chars().position(|ch| ch == 'g').unwrap_or(0);
        assert_eq!(
            extract_context(text, Selection::new(start, start + 5), 1),
            "beta\n\ngamma  delta"
        );
    }

    #[test]
    fn invalid_selection_yields_empty() {
        assert_eq!(extract_context(LINE, Selection::new(13, 8), 1), "");
        assert_eq!(extract_context(LINE, Selection::new(20, 40), 1), "");
        assert_eq!(extract_context("", Selection::new(0, 0), 1), "");
    }
}
