//! Fuzzy full-text search and passage previews over a single literary corpus.
//!
//! The corpus is segmented into works and header-delimited blocks, indexed once, and then
//! served read-only: [`Searcher::search`] pages through matching blocks, relaxing the
//! match from exact to edit distance 2 only when nothing matches, and
//! [`Searcher::preview`] stitches neighbouring blocks around a hit into a readable passage.

pub mod analysis;
pub mod config;
pub mod error;
pub mod highlight;
pub mod index;
pub mod loader;
pub mod preview;
pub mod query;
pub mod segment;
#[cfg(feature = "web")]
pub mod web;

use std::fs;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::info;
use zstd::stream::decode_all;

pub use config::{DuplicateTitlePolicy, SearchConfig};
pub use error::{Error, Result};
pub use index::{MemIndex, TextIndex};
pub use loader::{WorkSummary, WorkTable};
pub use preview::BlockId;
pub use query::{SearchResult, SearchResultPage};

/// The search service: an index handle, the block counts recorded when it was loaded,
/// and a cache of previews.
///
/// Lifecycle: constructed empty, loaded exactly once, read-only afterwards. All query
/// methods take `&self` and may be called concurrently.
pub struct Searcher<I = MemIndex> {
    index: I,
    works: OnceCell<WorkTable>,
    config: SearchConfig,
    previews: Option<Mutex<LruCache<String, String>>>,
}

impl Searcher<MemIndex> {
    pub fn new(config: SearchConfig) -> Self {
        Self::with_index(MemIndex::new(), config)
    }
}

impl Default for Searcher<MemIndex> {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

impl<I: TextIndex> Searcher<I> {
    pub fn with_index(index: I, config: SearchConfig) -> Self {
        let previews = NonZeroUsize::new(config.preview_cache_capacity)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self {
            index,
            works: OnceCell::new(),
            config,
            previews,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn is_loaded(&self) -> bool {
        self.works.get().is_some()
    }

    /// Indexes `corpus`. Must be called once, before serving queries.
    pub fn load(&self, corpus: &str) -> Result<()> {
        if self.is_loaded() {
            return Err(Error::AlreadyLoaded);
        }
        let table = loader::load(&self.index, corpus, &self.config)?;
        self.works.set(table).map_err(|_| Error::AlreadyLoaded)
    }

    /// Reads the corpus from `path` and loads it. Files ending in `.zst` are
    /// zstd-decompressed first.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let read_error = |source| Error::CorpusRead {
            path: path.to_path_buf(),
            source,
        };
        let raw = fs::read(path).map_err(read_error)?;
        let bytes = if path.extension().is_some_and(|ext| ext == "zst") {
            decode_all(Cursor::new(raw)).map_err(read_error)?
        } else {
            raw
        };
        let corpus = String::from_utf8(bytes).map_err(|err| {
            read_error(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        info!(path = %path.display(), bytes = corpus.len(), "Loading corpus");
        self.load(&corpus)
    }

    /// Block counts per work, available once the corpus is loaded.
    pub fn works(&self) -> Result<&WorkTable> {
        self.works.get().ok_or(Error::NotLoaded)
    }

    /// Page `page` (0-based) of `page_length` blocks matching `query`.
    pub fn search(&self, query: &str, page: usize, page_length: usize) -> Result<SearchResultPage> {
        if page_length > self.config.max_page_length {
            return Err(Error::InvalidRequest(format!(
                "page length {page_length} exceeds the maximum of {}",
                self.config.max_page_length
            )));
        }
        query::search(&self.index, query, page, page_length)
    }

    /// The reading window around the block identified by `id` (`"<title>-<ordinal>"`).
    pub fn preview(&self, id: &str) -> Result<String> {
        let block: BlockId = id.parse()?;
        let works = self.works()?;
        if let Some(cache) = &self.previews {
            if let Some(hit) = cache.lock().get(id) {
                return Ok(hit.clone());
            }
        }
        let text = preview::build_preview(&self.index, works, &block, self.config.min_preview_lines)?;
        if let Some(cache) = &self.previews {
            cache.lock().put(id.to_string(), text.clone());
        }
        Ok(text)
    }
}
