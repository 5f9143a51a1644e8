//! Splits the raw corpus into works and each work into header-delimited blocks.

use once_cell::sync::Lazy;
use regex::Regex;

/// A line made only of capitals, digits, periods, commas and spaces: act, scene and
/// speaker headers in the corpus formatting convention.
static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[A-Z0-9., ]*[A-Z0-9][A-Z0-9., ]*\r?$").expect("valid header regex")
});

/// One work as found in the corpus, borrowing from the corpus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSegment<'a> {
    pub title: &'a str,
    /// Block texts in reading order; the index in this vector is the block ordinal.
    pub blocks: Vec<&'a str>,
}

impl WorkSegment<'_> {
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Segments `corpus` into works, discarding everything before the first `marker`.
pub fn segment<'a>(corpus: &'a str, marker: &str) -> Vec<WorkSegment<'a>> {
    if marker.is_empty() {
        return Vec::new();
    }
    corpus.split(marker).skip(1).map(segment_work).collect()
}

/// Splits a single raw work segment (the text following one title marker).
pub fn segment_work(raw: &str) -> WorkSegment<'_> {
    let (title, body) = match raw.split_once('\n') {
        Some((title, body)) => (title.trim(), body),
        None => (raw.trim(), ""),
    };
    WorkSegment {
        title,
        blocks: split_blocks(body),
    }
}

/// Splits a work body on header lines. Always yields at least one block.
pub fn split_blocks(body: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut start = 0;
    for header in HEADER_LINE.find_iter(body) {
        // Every header but a leading one is preceded by the newline ending the previous block.
        let end = if header.start() > start {
            header.start() - 1
        } else {
            start
        };
        blocks.push(strip_cr(&body[start..end]));
        start = header.end();
        if body[start..].starts_with('\n') {
            start += 1;
        }
    }
    blocks.push(&body[start..]);
    blocks
}

/// True when `line` would be treated as a block header.
pub fn is_header_line(line: &str) -> bool {
    !line.contains('\n') && HEADER_LINE.is_match(line)
}

fn strip_cr(block: &str) -> &str {
    block.strip_suffix('\r').unwrap_or(block)
}
