/// Character that directly precedes the title of every work in the corpus.
pub const TITLE_MARKER: &str = "🙂";

/// Minimum number of lines a preview is padded to.
pub const MIN_PREVIEW_LINES: usize = 30;

pub const DEFAULT_PAGE_LENGTH: usize = 10;
pub const MAX_PAGE_LENGTH: usize = 100;
pub const PREVIEW_CACHE_CAPACITY: usize = 256;

/// What to do when two works share the same title line.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum DuplicateTitlePolicy {
    /// Rename the n-th repeat to `"<title> (n)"` and keep loading.
    #[default]
    Disambiguate,
    /// Fail the load.
    Reject,
}

/// Tunables shared by the loader, query engine and preview engine.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub title_marker: String,
    pub min_preview_lines: usize,
    pub default_page_length: usize,
    pub max_page_length: usize,
    /// Number of previews kept in memory; zero disables the cache.
    pub preview_cache_capacity: usize,
    pub duplicate_titles: DuplicateTitlePolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            title_marker: TITLE_MARKER.to_string(),
            min_preview_lines: MIN_PREVIEW_LINES,
            default_page_length: DEFAULT_PAGE_LENGTH,
            max_page_length: MAX_PAGE_LENGTH,
            preview_cache_capacity: PREVIEW_CACHE_CAPACITY,
            duplicate_titles: DuplicateTitlePolicy::default(),
        }
    }
}

impl SearchConfig {
    pub fn with_title_marker(mut self, marker: impl Into<String>) -> Self {
        self.title_marker = marker.into();
        self
    }

    pub fn with_min_preview_lines(mut self, lines: usize) -> Self {
        self.min_preview_lines = lines;
        self
    }

    pub fn with_max_page_length(mut self, length: usize) -> Self {
        self.max_page_length = length;
        self
    }

    pub fn with_preview_cache_capacity(mut self, capacity: usize) -> Self {
        self.preview_cache_capacity = capacity;
        self
    }

    pub fn with_duplicate_titles(mut self, policy: DuplicateTitlePolicy) -> Self {
        self.duplicate_titles = policy;
        self
    }
}
