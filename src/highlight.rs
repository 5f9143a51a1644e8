//! HTML highlighted fragments around matched terms.

use std::collections::HashSet;
use std::ops::Range;

use crate::analysis::tokenize;

/// Approximate fragment width in bytes.
pub const FRAGMENT_SIZE: usize = 200;
pub const MAX_FRAGMENTS: usize = 3;

const ELLIPSIS: &str = "…";
const MARK_OPEN: &str = "<mark>";
const MARK_CLOSE: &str = "</mark>";

struct Window {
    range: Range<usize>,
    marks: Vec<Range<usize>>,
}

/// Returns up to [`MAX_FRAGMENTS`] fragments of `text` with every occurrence of a
/// `matched` term wrapped in `<mark>`. Fragments with more marks come first.
pub fn fragments(text: &str, matched: &HashSet<String>) -> Vec<String> {
    let spans: Vec<Range<usize>> = tokenize(text)
        .into_iter()
        .filter(|token| matched.contains(&token.term))
        .map(|token| token.start..token.end)
        .collect();
    if spans.is_empty() {
        return Vec::new();
    }

    let mut windows: Vec<Window> = Vec::new();
    let mut floor = 0;
    let mut i = 0;
    while i < spans.len() {
        let lead = spans[i].start.saturating_sub(FRAGMENT_SIZE / 4).max(floor);
        let start = floor_boundary(text, lead);
        let mut end = ceil_boundary(text, (start + FRAGMENT_SIZE).min(text.len())).max(spans[i].end);
        let mut j = i;
        // A token that starts inside the window is kept whole, so the next window
        // never begins after the token it is opened for.
        while j < spans.len() && spans[j].start < end {
            end = end.max(spans[j].end);
            j += 1;
        }
        windows.push(Window {
            range: start..end,
            marks: spans[i..j].to_vec(),
        });
        floor = end;
        i = j;
    }

    windows.sort_by(|a, b| {
        b.marks
            .len()
            .cmp(&a.marks.len())
            .then_with(|| a.range.start.cmp(&b.range.start))
    });
    windows
        .iter()
        .take(MAX_FRAGMENTS)
        .map(|window| render(text, window))
        .collect()
}

fn render(text: &str, window: &Window) -> String {
    let mut out = String::with_capacity(window.range.len() + window.marks.len() * 13 + 8);
    if window.range.start > 0 {
        out.push_str(ELLIPSIS);
    }
    let mut cursor = window.range.start;
    for mark in &window.marks {
        escape_into(&mut out, &text[cursor..mark.start]);
        out.push_str(MARK_OPEN);
        escape_into(&mut out, &text[mark.clone()]);
        out.push_str(MARK_CLOSE);
        cursor = mark.end;
    }
    escape_into(&mut out, &text[cursor..window.range.end]);
    if window.range.end < text.len() {
        out.push_str(ELLIPSIS);
    }
    out
}

/// Minimal HTML escaping for text placed between tags.
pub fn escape_into(out: &mut String, input: &str) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(terms: &[&str]) -> HashSet<String> {
        terms.iter().map(|term| term.to_string()).collect()
    }

    #[test]
    fn marks_every_occurrence_in_a_short_text() {
        let frags = fragments("To be, or not to be.", &matched(&["be"]));
        assert_eq!(
            frags,
            vec!["To <mark>be</mark>, or not to <mark>be</mark>."]
        );
    }

    #[test]
    fn marks_keep_the_original_case() {
        let frags = fragments("Enter HAMLET.", &matched(&["hamlet"]));
        assert_eq!(frags, vec!["Enter <mark>HAMLET</mark>."]);
    }

    #[test]
    fn no_match_means_no_fragments() {
        assert!(fragments("Exeunt.", &matched(&["ghost"])).is_empty());
    }

    #[test]
    fn text_is_escaped() {
        let frags = fragments("<Ghost> & \"Hamlet\"", &matched(&["hamlet"]));
        assert_eq!(
            frags,
            vec!["&lt;Ghost&gt; &amp; &quot;<mark>Hamlet</mark>&quot;"]
        );
    }

    #[test]
    fn long_texts_are_truncated_with_ellipses() {
        let text = format!("{} ghost {}", "word ".repeat(100), "word ".repeat(100));
        let frags = fragments(&text, &matched(&["ghost"]));
        assert_eq!(frags.len(), 1);
        assert!(frags[0].starts_with(ELLIPSIS));
        assert!(frags[0].ends_with(ELLIPSIS));
        assert!(frags[0].contains("<mark>ghost</mark>"));
        assert!(frags[0].len() < FRAGMENT_SIZE + 40);
    }

    #[test]
    fn match_crossing_the_window_edge_stays_in_one_fragment() {
        let text = format!("ghost{}ghost", " ".repeat(193));
        let frags = fragments(&text, &matched(&["ghost"]));
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].matches(MARK_OPEN).count(), 2);
        assert!(frags[0].ends_with("<mark>ghost</mark>"));
        assert!(!frags[0].contains(ELLIPSIS));
    }

    #[test]
    fn windows_never_overlap_their_marks() {
        for pad in 185..215 {
            let text = format!("ghost{} ghost ghost{}ghost", " ".repeat(pad), " ".repeat(pad));
            let frags = fragments(&text, &matched(&["ghost"]));
            let marks: usize = frags.iter().map(|f| f.matches(MARK_OPEN).count()).sum();
            assert_eq!(marks, 4, "pad {pad}");
        }
    }

    #[test]
    fn densest_fragments_come_first_and_are_capped() {
        let filler = "x ".repeat(200);
        let text = format!(
            "ghost{filler}ghost ghost{filler}ghost{filler}ghost ghost ghost{filler}ghost"
        );
        let frags = fragments(&text, &matched(&["ghost"]));
        assert_eq!(frags.len(), MAX_FRAGMENTS);
        assert_eq!(frags[0].matches(MARK_OPEN).count(), 3);
        assert_eq!(frags[1].matches(MARK_OPEN).count(), 2);
    }
}
