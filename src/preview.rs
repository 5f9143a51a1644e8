//! Block identifiers and the reading window built around a single block.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::index::TextIndex;
use crate::loader::{TEXT_FIELD, WorkTable};

/// Separator between the work title and the ordinal in a block identifier.
pub const ID_SEPARATOR: char = '-';

/// Identifies a block by owning work and 0-based position, rendered `"<title>-<ordinal>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub work: String,
    pub ordinal: usize,
}

impl BlockId {
    pub fn new(work: impl Into<String>, ordinal: usize) -> Self {
        Self {
            work: work.into(),
            ordinal,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.work, ID_SEPARATOR, self.ordinal)
    }
}

impl FromStr for BlockId {
    type Err = Error;

    /// Splits on the last separator, so titles may themselves contain `-`.
    fn from_str(s: &str) -> Result<Self> {
        let (work, ordinal) = s
            .rsplit_once(ID_SEPARATOR)
            .ok_or_else(|| Error::MalformedId(s.to_string()))?;
        if work.is_empty() || ordinal.is_empty() || !ordinal.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(Error::MalformedId(s.to_string()));
        }
        let ordinal = ordinal
            .parse()
            .map_err(|_| Error::MalformedId(s.to_string()))?;
        Ok(Self::new(work, ordinal))
    }
}

/// Builds the preview for `id`: the block's text plus neighbouring blocks of the same work,
/// in reading order, until the text spans at least `min_lines` newlines or the whole work
/// has been included.
///
/// Each round adds at most one earlier block and then, if still short, one later block.
/// Blocks before ordinal 0 or at/after the work's block count are never fetched.
pub fn build_preview<I: TextIndex + ?Sized>(
    index: &I,
    works: &WorkTable,
    id: &BlockId,
    min_lines: usize,
) -> Result<String> {
    let block_count = works
        .block_count(&id.work)
        .ok_or_else(|| Error::NotFound(format!("work {:?}", id.work)))?;
    if id.ordinal >= block_count {
        return Err(Error::NotFound(format!("block {id}")));
    }

    let seed = fetch_text(index, &id.work, id.ordinal)?;
    let mut lines = newlines(&seed);
    let mut parts = VecDeque::from([seed]);
    let mut lower = id.ordinal.checked_sub(1);
    let mut upper = id.ordinal + 1;

    while lines < min_lines && (lower.is_some() || upper < block_count) {
        if let Some(ordinal) = lower {
            let text = fetch_text(index, &id.work, ordinal)?;
            lines += newlines(&text) + 1;
            parts.push_front(text);
            lower = ordinal.checked_sub(1);
        }
        if upper < block_count && lines < min_lines {
            let text = fetch_text(index, &id.work, upper)?;
            lines += newlines(&text) + 1;
            parts.push_back(text);
            upper += 1;
        }
    }

    Ok(Vec::from(parts).join("\n"))
}

fn fetch_text<I: TextIndex + ?Sized>(index: &I, work: &str, ordinal: usize) -> Result<String> {
    index.fetch_stored_field(&BlockId::new(work, ordinal).to_string(), TEXT_FIELD)
}

fn newlines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}
