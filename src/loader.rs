//! Turns the raw corpus into indexed blocks and records how many blocks each work has.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{DuplicateTitlePolicy, SearchConfig};
use crate::error::{Error, Result};
use crate::index::{Batch, TextIndex};
use crate::preview::BlockId;
use crate::segment::{WorkSegment, segment};

/// Stored field holding the owning work's title.
pub const WORK_FIELD: &str = "work";
/// Stored and searched field holding the block text.
pub const TEXT_FIELD: &str = "text";

/// Number of blocks per work title. Written once by [`load`], read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkTable {
    counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkSummary<'a> {
    pub title: &'a str,
    pub blocks: usize,
}

impl WorkTable {
    pub fn block_count(&self, title: &str) -> Option<usize> {
        self.counts.get(title).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total_blocks(&self) -> usize {
        self.counts.values().sum()
    }

    /// Works in title order.
    pub fn iter(&self) -> impl Iterator<Item = WorkSummary<'_>> + '_ {
        self.counts.iter().map(|(title, &blocks)| WorkSummary {
            title: title.as_str(),
            blocks,
        })
    }
}

/// Segments `corpus`, indexes every block of every work into `index` with a single
/// commit, and returns the block count of each work.
///
/// Per-work batches are built in parallel; nothing touches the index until all of
/// them are merged. Any failure leaves the index uncommitted.
pub fn load<I: TextIndex + ?Sized>(
    index: &I,
    corpus: &str,
    config: &SearchConfig,
) -> Result<WorkTable> {
    let started = Instant::now();
    let works = segment(corpus, &config.title_marker);
    let titles = resolve_titles(&works, config.duplicate_titles)?;
    debug!(works = works.len(), "segmented corpus");

    let built: Vec<(String, Batch, usize)> = works
        .into_par_iter()
        .zip(titles.into_par_iter())
        .map(|(work, title)| {
            let (batch, blocks) = build_batch(index, &title, &work);
            (title, batch, blocks)
        })
        .collect();

    let mut combined = index.new_batch();
    let mut counts = BTreeMap::new();
    for (title, batch, blocks) in built {
        combined.merge(batch);
        counts.insert(title, blocks);
    }
    let documents = combined.len();
    index.commit(combined)?;

    let table = WorkTable { counts };
    info!(
        works = table.len(),
        blocks = documents,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Corpus indexed"
    );
    Ok(table)
}

/// One document per block, keyed by `"<title>-<ordinal>"`.
fn build_batch<I: TextIndex + ?Sized>(
    index: &I,
    title: &str,
    work: &WorkSegment<'_>,
) -> (Batch, usize) {
    let mut batch = index.new_batch();
    for (ordinal, text) in work.blocks.iter().enumerate() {
        let id = BlockId::new(title, ordinal);
        batch.ingest(id.to_string(), [(WORK_FIELD, title), (TEXT_FIELD, *text)]);
    }
    (batch, work.block_count())
}

/// Final title of every work, in corpus order, after applying the duplicate policy.
fn resolve_titles(
    works: &[WorkSegment<'_>],
    policy: DuplicateTitlePolicy,
) -> Result<Vec<String>> {
    // Renames must not collide with a title spelled that way in the corpus.
    let literal: HashSet<&str> = works.iter().map(|work| work.title).collect();
    let mut renamed_titles: HashSet<String> = HashSet::new();
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut titles = Vec::with_capacity(works.len());
    for work in works {
        let seen = occurrences.entry(work.title).or_insert(0);
        *seen += 1;
        let seen = *seen;
        if seen == 1 {
            titles.push(work.title.to_string());
            continue;
        }
        match policy {
            DuplicateTitlePolicy::Reject => {
                return Err(Error::DuplicateTitle(work.title.to_string()));
            }
            DuplicateTitlePolicy::Disambiguate => {
                let mut n = seen;
                let mut renamed = format!("{} ({n})", work.title);
                while literal.contains(renamed.as_str()) || renamed_titles.contains(&renamed) {
                    n += 1;
                    renamed = format!("{} ({n})", work.title);
                }
                renamed_titles.insert(renamed.clone());
                warn!(title = work.title, renamed = %renamed, "Duplicate work title");
                titles.push(renamed);
            }
        }
    }
    Ok(titles)
}
