//! Paged search over block text with progressively relaxed fuzziness.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::index::{Hit, MatchQuery, QueryResponse, TextIndex};
use crate::loader::{TEXT_FIELD, WORK_FIELD};

/// Edit distances tried in order until one yields a match.
pub const FUZZINESS_LEVELS: [u8; 3] = [0, 1, 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub work: String,
    pub text: String,
    /// Non-empty lines in `text`.
    pub lines: usize,
    pub fragments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultPage {
    /// Matches across the whole corpus, as reported by the last query executed.
    pub total: usize,
    pub page: usize,
    pub length: usize,
    /// Fuzziness of the query that produced `total` and `results`.
    pub fuzziness: u8,
    pub results: Vec<SearchResult>,
}

/// Runs `query` against block text and returns page `page` of `page_length` results.
///
/// Exact matching is tried first; only when it matches nothing anywhere in the corpus is
/// the same query repeated at fuzziness 1, then 2.
pub fn search<I: TextIndex + ?Sized>(
    index: &I,
    query: &str,
    page: usize,
    page_length: usize,
) -> Result<SearchResultPage> {
    if page_length == 0 {
        return Err(Error::InvalidRequest(
            "page length must be greater than zero".to_string(),
        ));
    }
    let offset = page
        .checked_mul(page_length)
        .ok_or_else(|| Error::InvalidRequest(format!("page {page} is out of range")))?;

    let mut fuzziness = FUZZINESS_LEVELS[0];
    let mut response = QueryResponse::default();
    for level in FUZZINESS_LEVELS {
        fuzziness = level;
        let request = MatchQuery::new(TEXT_FIELD, query)
            .with_fuzziness(level)
            .with_window(page_length, offset)
            .with_highlight(TEXT_FIELD);
        response = index.query(&request)?;
        if response.total > 0 {
            break;
        }
        debug!(query, fuzziness = level, "No matches");
    }

    Ok(SearchResultPage {
        total: response.total,
        page,
        length: page_length,
        fuzziness,
        results: response.hits.into_iter().map(to_result).collect(),
    })
}

fn to_result(mut hit: Hit) -> SearchResult {
    let work = hit.fields.remove(WORK_FIELD).unwrap_or_default();
    let text = hit.fields.remove(TEXT_FIELD).unwrap_or_default();
    SearchResult {
        id: hit.id,
        lines: count_lines(&text),
        fragments: hit.fragments.remove(TEXT_FIELD).unwrap_or_default(),
        work,
        text,
    }
}

fn count_lines(text: &str) -> usize {
    text.lines().filter(|line| !line.trim().is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::index::{Batch, MemIndex};
    use crate::loader::load;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashSet};

    fn loaded(corpus: &str) -> MemIndex {
        let index = MemIndex::new();
        load(&index, corpus, &SearchConfig::default()).unwrap();
        index
    }

    /// Answers every query with a fixed total per fuzziness level.
    struct Scripted {
        totals: [usize; 3],
        fail_at: Option<u8>,
        asked: Mutex<Vec<u8>>,
    }

    impl Scripted {
        fn new(totals: [usize; 3]) -> Self {
            Self {
                totals,
                fail_at: None,
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextIndex for Scripted {
        fn commit(&self, _batch: Batch) -> Result<()> {
            Ok(())
        }

        fn query(&self, query: &MatchQuery<'_>) -> Result<QueryResponse> {
            self.asked.lock().push(query.fuzziness);
            if self.fail_at == Some(query.fuzziness) {
                return Err(Error::Query("backend unavailable".to_string()));
            }
            let total = self.totals[query.fuzziness as usize];
            let hits = (0..total.min(query.limit))
                .map(|i| Hit {
                    id: format!("PLAY-{i}"),
                    score: 1.0,
                    fields: BTreeMap::new(),
                    fragments: BTreeMap::new(),
                })
                .collect();
            Ok(QueryResponse { total, hits })
        }

        fn fetch_stored_field(&self, id: &str, _field: &str) -> Result<String> {
            Err(Error::NotFound(id.to_string()))
        }
    }

    #[test]
    fn single_exact_match_uses_no_fuzziness() {
        let index = loaded("🙂HAMLET\nACT I\nTo be or not to be.\nACT II\nThat is the question.");
        let page = search(&index, "to be", 0, 10).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.fuzziness, 0);

        let result = &page.results[0];
        assert_eq!(result.id, "HAMLET-1");
        assert_eq!(result.work, "HAMLET");
        assert_eq!(result.text, "To be or not to be.");
        assert_eq!(result.lines, 1);
        assert_eq!(
            result.fragments,
            vec!["<mark>To</mark> <mark>be</mark> or not <mark>to</mark> <mark>be</mark>."]
        );
    }

    #[test]
    fn misspelling_escalates_to_fuzziness_one() {
        let index = loaded("🙂HAMLET\nHAMLET.\nAlas, poor Yorick!\nHORATIO.\nE'en so, my lord.");
        let page = search(&index, "yorik", 0, 10).unwrap();
        assert_eq!(page.fuzziness, 1);
        assert_eq!(page.total, 1);
        assert_eq!(page.results[0].id, "HAMLET-1");
        assert_eq!(page.results[0].fragments, vec!["Alas, poor <mark>Yorick</mark>!"]);
    }

    #[test]
    fn no_match_at_any_level_reports_zero_after_three_queries() {
        let index = Scripted::new([0, 0, 0]);
        let page = search(&index, "zounds", 0, 10).unwrap();
        assert_eq!(page.total, 0);
        assert!(page.results.is_empty());
        assert_eq!(page.fuzziness, 2);
        assert_eq!(*index.asked.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn total_comes_from_the_last_executed_query() {
        let index = Scripted::new([0, 4, 9]);
        let page = search(&index, "anything", 0, 3).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.fuzziness, 1);
        assert_eq!(page.results.len(), 3);
        assert_eq!(*index.asked.lock(), vec![0, 1]);
    }

    #[test]
    fn exact_hits_stop_escalation() {
        let index = Scripted::new([2, 5, 9]);
        search(&index, "anything", 0, 10).unwrap();
        assert_eq!(*index.asked.lock(), vec![0]);
    }

    #[test]
    fn backend_failure_surfaces_without_partial_results() {
        let mut index = Scripted::new([0, 3, 3]);
        index.fail_at = Some(1);
        let err = search(&index, "anything", 0, 10).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert_eq!(*index.asked.lock(), vec![0, 1]);
    }

    #[test]
    fn zero_page_length_is_rejected() {
        let index = Scripted::new([1, 1, 1]);
        assert!(search(&index, "ghost", 0, 0).unwrap_err().is_request_error());
        assert!(index.asked.lock().is_empty());
    }

    #[test]
    fn pages_cover_every_match_exactly_once() {
        let mut corpus = String::from("🙂MACBETH\n");
        for scene in 0..11 {
            let filler = "out ".repeat(scene);
            corpus.push_str(&format!("SCENE {scene}\nOut, damned spot! {filler}\n"));
        }
        let index = loaded(&corpus);
        let total = search(&index, "spot", 0, 4).unwrap().total;
        assert_eq!(total, 11);

        let mut seen = HashSet::new();
        for page in 0..total.div_ceil(4) {
            let result = search(&index, "spot", page, 4).unwrap();
            assert_eq!(result.total, total);
            assert_eq!(result.results.len(), (total - page * 4).min(4));
            for hit in result.results {
                assert!(seen.insert(hit.id));
            }
        }
        assert_eq!(seen.len(), total);
        assert!(search(&index, "spot", 3, 4).unwrap().results.is_empty());
    }

    #[test]
    fn hits_near_the_fragment_edge_are_highlighted() {
        let corpus = format!("🙂PLAY\nghost{}ghost\n", " ".repeat(193));
        let index = loaded(&corpus);
        let page = search(&index, "ghost", 0, 10).unwrap();
        assert_eq!(page.total, 1);
        let marks: usize = page.results[0]
            .fragments
            .iter()
            .map(|fragment| fragment.matches("<mark>").count())
            .sum();
        assert_eq!(marks, 2);
    }

    #[test]
    fn line_count_ignores_blank_lines() {
        assert_eq!(count_lines("one\n\n  \ntwo\n"), 2);
        assert_eq!(count_lines(""), 0);
    }
}
