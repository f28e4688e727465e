//! Locating repeated text on a page.
//!
//! All offsets are counted in `char`s, which is how the reader reports text
//! selections. Matching is case-insensitive.

pub type CharOffset = usize;

/// Minimum share of the shorter span two ranges must have in common before a
/// loose selection is attributed to an occurrence.
pub const MIN_OVERLAP_RATIO: f64 = 0.8;

/// Half-open `[start, end)` character range on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: CharOffset,
    pub end: CharOffset,
}

impl Selection {
    pub fn new(start: CharOffset, end: CharOffset) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid_for(&self, haystack_len: usize) -> bool {
        self.start < self.end && self.end <= haystack_len
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccurrenceInfo {
    pub total_count: usize,
    pub positions: Vec<CharOffset>,
}

/// Find every start offset of `needle` in `haystack`, overlapping matches
/// included.
///
/// With `whole_words_only`, a match survives only if the characters right
/// before and right after it (when present) are not alphanumeric.
pub fn find_occurrences(haystack: &str, needle: &str, whole_words_only: bool) -> OccurrenceInfo {
    let haystack = folded_chars(haystack);
    let needle = folded_chars(needle);
    find_folded(&haystack, &needle, whole_words_only)
}

/// Map a concrete selection back to the 1-based occurrence of `needle` it
/// points at.
///
/// An exact offset match wins. Otherwise the occurrence with the best overlap
/// ratio is chosen, provided it reaches [`MIN_OVERLAP_RATIO`].
pub fn resolve_occurrence(
    haystack: &str,
    needle: &str,
    selection: Selection,
    whole_words_only: bool,
) -> Option<u32> {
    let haystack = folded_chars(haystack);
    let needle = folded_chars(needle);
    if selection.start >= selection.end {
        return None;
    }
    let info = find_folded(&haystack, &needle, whole_words_only);
    if info.positions.is_empty() {
        return None;
    }

    if selection.is_valid_for(haystack.len())
        && haystack[selection.start..selection.end] == needle[..]
    {
        if let Some(idx) = info
            .positions
            .iter()
            .position(|&pos| pos == selection.start && pos + needle.len() == selection.end)
        {
            return Some(idx as u32 + 1);
        }
    }

    let shorter = selection.len().min(needle.len()) as f64;
    let mut best: Option<(usize, f64)> = None;
    for (idx, &pos) in info.positions.iter().enumerate() {
        let overlap = selection
            .end
            .min(pos + needle.len())
            .saturating_sub(selection.start.max(pos));
        let ratio = overlap as f64 / shorter;
        if ratio >= MIN_OVERLAP_RATIO && best.is_none_or(|(_, top)| ratio > top) {
            best = Some((idx, ratio));
        }
    }
    best.map(|(idx, _)| idx as u32 + 1)
}

/// Character range of the `occurrence`-th (1-based) match, if it exists.
pub fn occurrence_span(
    haystack: &str,
    needle: &str,
    occurrence: u32,
    whole_words_only: bool,
) -> Option<Selection> {
    let idx = (occurrence as usize).checked_sub(1)?;
    let len = needle.chars().count();
    find_occurrences(haystack, needle, whole_words_only)
        .positions
        .get(idx)
        .map(|&start| Selection::new(start, start + len))
}

fn find_folded(haystack: &[char], needle: &[char], whole_words_only: bool) -> OccurrenceInfo {
    if haystack.is_empty() || needle.is_empty() || needle.len() > haystack.len() {
        return OccurrenceInfo::default();
    }
    let positions: Vec<CharOffset> = (0..=haystack.len() - needle.len())
        .filter(|&idx| haystack[idx..idx + needle.len()] == *needle)
        .filter(|&idx| !whole_words_only || is_word_bounded(haystack, idx, needle.len()))
        .collect();
    OccurrenceInfo {
        total_count: positions.len(),
        positions,
    }
}

fn is_word_bounded(haystack: &[char], start: usize, len: usize) -> bool {
    let before_ok = start
        .checked_sub(1)
        .and_then(|idx| haystack.get(idx))
        .is_none_or(|ch| !ch.is_alphanumeric());
    let after_ok = haystack
        .get(start + len)
        .is_none_or(|ch| !ch.is_alphanumeric());
    before_ok && after_ok
}

// One char in, one char out, so offsets stay aligned with the original text.
fn fold(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

fn folded_chars(text: &str) -> Vec<char> {
    text.chars().map(fold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_substring_matches_inside_words() {
        let info = find_occurrences("cat sat", "at", false);
        assert_eq!(info.total_count, 2);
        assert_eq!(info.positions, vec![1, 5]);
    }

    #[test]
    fn overlapping_matches_are_found() {
        let info = find_occurrences("aaa", "aa", false);
        assert_eq!(info.positions, vec![0, 1]);
    }

    #[test]
    fn whole_word_filter_keeps_standalone_match() {
        let info = find_occurrences("cats cat scat", "cat", true);
        assert_eq!(info.total_count, 1);
        assert_eq!(info.positions, vec![5]);
    }

    #[test]
    fn punctuation_counts_as_word_boundary() {
        let info = find_occurrences("(cat), cat.", "cat", true);
        assert_eq!(info.positions, vec![1, 7]);
    }

    #[test]
    fn matching_ignores_case() {
        let info = find_occurrences("The THE the", "the", false);
        assert_eq!(info.positions, vec![0, 4, 8]);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        assert_eq!(find_occurrences("", "cat", false), OccurrenceInfo::default());
        assert_eq!(find_occurrences("cat", "", true), OccurrenceInfo::default());
        assert_eq!(find_occurrences("ca", "cat", false).total_count, 0);
    }

    #[test]
    fn offsets_are_counted_in_chars() {
        let info = find_occurrences("café au café", "café", false);
        assert_eq!(info.positions, vec![0, 8]);
    }

    #[test]
    fn resolves_exact_selection_of_second_match() {
        let page = "the cat sat on the cat";
        assert_eq!(
            resolve_occurrence(page, "cat", Selection::new(19, 22), false),
            Some(2)
        );
        assert_eq!(
            resolve_occurrence(page, "cat", Selection::new(4, 7), false),
            Some(1)
        );
    }

    #[test]
    fn loose_selection_falls_back_to_overlap() {
        let page = "the cat sat on the cat";
        // Selection handle grabbed the preceding space.
        assert_eq!(
            resolve_occurrence(page, "cat", Selection::new(18, 22), false),
            Some(2)
        );
    }

    #[test]
    fn selection_inside_a_match_resolves() {
        let page = "the cat sat on the cat";
        assert_eq!(
            resolve_occurrence(page, "cat", Selection::new(20, 22), false),
            Some(2)
        );
        assert_eq!(
            resolve_occurrence(page, "cat", Selection::new(21, 22), false),
            Some(2)
        );
    }

    #[test]
    fn overlap_threshold_is_inclusive() {
        let page = "xx abcde yy abcde";
        assert_eq!(
            resolve_occurrence(page, "abcde", Selection::new(11, 16), false),
            Some(2)
        );
        assert_eq!(
            resolve_occurrence(page, "abcde", Selection::new(10, 15), false),
            None
        );
    }

    #[test]
    fn weak_overlap_is_unresolved() {
        let page = "the cat sat on the cat";
        assert_eq!(
            resolve_occurrence(page, "cat sat", Selection::new(10, 13), false),
            None
        );
    }

    #[test]
    fn unknown_needle_or_inverted_selection_is_unresolved() {
        let page = "the cat sat on the cat";
        assert_eq!(
            resolve_occurrence(page, "dog", Selection::new(4, 7), false),
            None
        );
        assert_eq!(
            resolve_occurrence(page, "cat", Selection::new(7, 4), false),
            None
        );
    }

    #[test]
    fn occurrence_span_is_one_based() {
        let page = "the cat sat on the cat";
        assert_eq!(
            occurrence_span(page, "cat", 2, false),
            Some(Selection::new(19, 22))
        );
        assert_eq!(occurrence_span(page, "cat", 0, false), None);
        assert_eq!(occurrence_span(page, "cat", 3, false), None);
    }
}
