//! The full-text index contract and its in-memory implementation.
//!
//! [`TextIndex`] is everything the loader, query engine and preview engine need from an
//! index: ingest a batch of documents once, run a fielded fuzzy match query, and fetch a
//! stored field back by document identifier. [`MemIndex`] implements it with an `fst`
//! term dictionary per field, BM25 scoring and Levenshtein-automaton term expansion.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use fst::automaton::Levenshtein;
use fst::{IntoStreamer, Map, Streamer};
use once_cell::sync::OnceCell;
use rapidfuzz::distance::levenshtein;
use rayon::prelude::*;

use crate::analysis::terms;
use crate::error::{Error, Result};
use crate::highlight;

/// Stored fields of a document, by field name.
pub type Fields = BTreeMap<String, String>;

/// Highest edit distance a match query may ask for.
pub const MAX_FUZZINESS: u8 = 2;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// Documents queued for a single commit. Batches are plain values, so they can be
/// built on independent threads and merged afterwards.
#[derive(Debug, Default)]
pub struct Batch {
    docs: Vec<Document>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest<I, K, V>(&mut self, id: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.docs.push(Document {
            id: id.into(),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        });
    }

    /// Appends every document of `other`, keeping their order.
    pub fn merge(&mut self, other: Batch) {
        self.docs.extend(other.docs);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.docs
    }

    fn into_documents(self) -> Vec<Document> {
        self.docs
    }
}

/// A match query against one field: any analyzed query term may match.
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub field: &'a str,
    pub text: &'a str,
    pub fuzziness: u8,
    pub limit: usize,
    pub offset: usize,
    pub highlight_field: Option<&'a str>,
}

impl<'a> MatchQuery<'a> {
    pub fn new(field: &'a str, text: &'a str) -> Self {
        Self {
            field,
            text,
            fuzziness: 0,
            limit: 10,
            offset: 0,
            highlight_field: None,
        }
    }

    pub fn with_fuzziness(mut self, fuzziness: u8) -> Self {
        self.fuzziness = fuzziness;
        self
    }

    pub fn with_window(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn with_highlight(mut self, field: &'a str) -> Self {
        self.highlight_field = Some(field);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    pub fields: Fields,
    /// Highlighted fragments keyed by field name; absent when nothing could be marked.
    pub fragments: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Number of matching documents across the whole index.
    pub total: usize,
    /// The requested window of hits, best first.
    pub hits: Vec<Hit>,
}

/// Capabilities the search service needs from a full-text index.
///
/// An index is written exactly once through [`TextIndex::commit`] and is read-only
/// afterwards; implementations must allow concurrent reads after the commit.
pub trait TextIndex: Send + Sync {
    fn new_batch(&self) -> Batch {
        Batch::new()
    }

    fn commit(&self, batch: Batch) -> Result<()>;

    fn query(&self, query: &MatchQuery<'_>) -> Result<QueryResponse>;

    /// Fails with [`Error::NotFound`] when the document or the field is absent.
    fn fetch_stored_field(&self, id: &str, field: &str) -> Result<String>;
}

impl<T: TextIndex + ?Sized> TextIndex for Arc<T> {
    fn new_batch(&self) -> Batch {
        (**self).new_batch()
    }

    fn commit(&self, batch: Batch) -> Result<()> {
        (**self).commit(batch)
    }

    fn query(&self, query: &MatchQuery<'_>) -> Result<QueryResponse> {
        (**self).query(query)
    }

    fn fetch_stored_field(&self, id: &str, field: &str) -> Result<String> {
        (**self).fetch_stored_field(id, field)
    }
}

/// In-memory index: empty until the single commit, immutable afterwards.
#[derive(Default)]
pub struct MemIndex {
    segment: OnceCell<Segment>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_committed(&self) -> bool {
        self.segment.get().is_some()
    }

    pub fn document_count(&self) -> usize {
        self.segment.get().map_or(0, |segment| segment.docs.len())
    }

    fn segment(&self) -> Result<&Segment> {
        self.segment.get().ok_or(Error::NotCommitted)
    }
}

impl TextIndex for MemIndex {
    fn commit(&self, batch: Batch) -> Result<()> {
        if self.is_committed() {
            return Err(Error::AlreadyCommitted);
        }
        let segment = Segment::build(batch.into_documents())?;
        self.segment
            .set(segment)
            .map_err(|_| Error::AlreadyCommitted)
    }

    fn query(&self, query: &MatchQuery<'_>) -> Result<QueryResponse> {
        let segment = self.segment()?;
        if query.fuzziness > MAX_FUZZINESS {
            return Err(Error::Query(format!(
                "fuzziness {} exceeds the maximum of {MAX_FUZZINESS}",
                query.fuzziness
            )));
        }
        let Some(field) = segment.fields.get(query.field) else {
            return Ok(QueryResponse::default());
        };

        let total_docs = segment.docs.len() as f32;
        let mut scores: HashMap<u32, f32> = HashMap::new();
        // Expanded terms each document actually contains, for highlighting.
        let mut matched: HashMap<u32, HashSet<String>> = HashMap::new();
        let mut seen = HashSet::new();
        for token in terms(query.text) {
            if !seen.insert(token.clone()) {
                continue;
            }
            for (term, ordinal) in field.expand(&token, query.fuzziness)? {
                let weight = if term == token {
                    1.0
                } else {
                    levenshtein::normalized_similarity(token.chars(), term.chars()) as f32
                };
                let postings = &field.postings[ordinal as usize];
                let df = postings.len() as f32;
                for posting in postings {
                    let doc_len = field.doc_lengths[posting.doc as usize] as f32;
                    let score =
                        bm25_score(posting.freq as f32, df, total_docs, doc_len, field.avg_length);
                    *scores.entry(posting.doc).or_insert(0.0) += score * weight;
                    matched.entry(posting.doc).or_default().insert(term.clone());
                }
            }
        }

        let total = scores.len();
        let mut ranked: Vec<(u32, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let no_terms = HashSet::new();
        let hits = ranked
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|(doc, score)| {
                let terms = matched.get(&doc).unwrap_or(&no_terms);
                segment.hit(doc, score, query.highlight_field, terms)
            })
            .collect();
        Ok(QueryResponse { total, hits })
    }

    fn fetch_stored_field(&self, id: &str, field: &str) -> Result<String> {
        let segment = self.segment()?;
        let doc = segment
            .ids
            .get(id)
            .map(|&doc| &segment.docs[doc as usize])
            .ok_or_else(|| Error::NotFound(format!("document {id:?}")))?;
        doc.fields
            .get(field)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("field {field:?} of document {id:?}")))
    }
}

fn bm25_score(tf: f32, df: f32, total_docs: f32, doc_len: f32, avg_doc_len: f32) -> f32 {
    let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
    let norm = 1.0 - BM25_B + BM25_B * (doc_len / avg_doc_len);
    idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * norm)
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: u32,
    freq: u32,
}

struct Segment {
    docs: Vec<Document>,
    ids: HashMap<String, u32>,
    fields: HashMap<String, FieldIndex>,
}

struct FieldIndex {
    /// Term to term ordinal; the ordinal indexes `postings`.
    terms: Map<Vec<u8>>,
    postings: Vec<Vec<Posting>>,
    doc_lengths: Vec<u32>,
    avg_length: f32,
}

/// Term frequencies of one field of one document.
struct AnalyzedField {
    name: String,
    length: u32,
    freqs: HashMap<String, u32>,
}

impl Segment {
    fn build(docs: Vec<Document>) -> Result<Self> {
        let mut ids = HashMap::with_capacity(docs.len());
        for (doc, document) in docs.iter().enumerate() {
            if ids.insert(document.id.clone(), doc as u32).is_some() {
                return Err(Error::DuplicateDocument(document.id.clone()));
            }
        }

        let analyzed: Vec<Vec<AnalyzedField>> = docs
            .par_iter()
            .map(|document| {
                document
                    .fields
                    .iter()
                    .map(|(name, value)| analyze(name, value))
                    .collect()
            })
            .collect();

        let mut builders: HashMap<String, FieldBuilder> = HashMap::new();
        for (doc, fields) in analyzed.into_iter().enumerate() {
            for field in fields {
                builders
                    .entry(field.name)
                    .or_insert_with(|| FieldBuilder::new(docs.len()))
                    .add(doc as u32, field.length, field.freqs);
            }
        }
        let fields = builders
            .into_iter()
            .map(|(name, builder)| Ok((name, builder.finish()?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { docs, ids, fields })
    }

    fn hit(
        &self,
        doc: u32,
        score: f32,
        highlight_field: Option<&str>,
        matched: &HashSet<String>,
    ) -> Hit {
        let document = &self.docs[doc as usize];
        let mut fragments = BTreeMap::new();
        if let Some((name, text)) =
            highlight_field.and_then(|name| document.fields.get(name).map(|text| (name, text)))
        {
            let marked = highlight::fragments(text, matched);
            if !marked.is_empty() {
                fragments.insert(name.to_string(), marked);
            }
        }
        Hit {
            id: document.id.clone(),
            score,
            fields: document.fields.clone(),
            fragments,
        }
    }
}

fn analyze(name: &str, value: &str) -> AnalyzedField {
    let mut freqs = HashMap::new();
    let mut length = 0;
    for term in terms(value) {
        *freqs.entry(term).or_insert(0) += 1;
        length += 1;
    }
    AnalyzedField {
        name: name.to_string(),
        length,
        freqs,
    }
}

struct FieldBuilder {
    postings: BTreeMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    total_length: u64,
    docs_with_field: u32,
}

impl FieldBuilder {
    fn new(doc_count: usize) -> Self {
        Self {
            postings: BTreeMap::new(),
            doc_lengths: vec![0; doc_count],
            total_length: 0,
            docs_with_field: 0,
        }
    }

    fn add(&mut self, doc: u32, length: u32, freqs: HashMap<String, u32>) {
        self.doc_lengths[doc as usize] = length;
        self.total_length += u64::from(length);
        self.docs_with_field += 1;
        for (term, freq) in freqs {
            self.postings
                .entry(term)
                .or_default()
                .push(Posting { doc, freq });
        }
    }

    fn finish(self) -> Result<FieldIndex> {
        // BTreeMap iterates in byte order, which is what the fst builder requires.
        let terms = Map::from_iter(
            self.postings
                .keys()
                .enumerate()
                .map(|(ordinal, term)| (term.as_bytes(), ordinal as u64)),
        )?;
        let avg_length = if self.docs_with_field == 0 {
            0.0
        } else {
            (self.total_length as f32 / self.docs_with_field as f32).max(1.0)
        };
        Ok(FieldIndex {
            terms,
            postings: self.postings.into_values().collect(),
            doc_lengths: self.doc_lengths,
            avg_length,
        })
    }
}

impl FieldIndex {
    /// Indexed terms within `fuzziness` edits of `token`, with their ordinals.
    fn expand(&self, token: &str, fuzziness: u8) -> Result<Vec<(String, u64)>> {
        if fuzziness == 0 {
            return Ok(self
                .terms
                .get(token)
                .map(|ordinal| vec![(token.to_string(), ordinal)])
                .unwrap_or_default());
        }
        let automaton = Levenshtein::new(token, u32::from(fuzziness))
            .map_err(|err| Error::Query(format!("cannot expand {token:?}: {err}")))?;
        let mut stream = self.terms.search(automaton).into_stream();
        let mut expanded = Vec::new();
        while let Some((key, ordinal)) = stream.next() {
            expanded.push((String::from_utf8_lossy(key).into_owned(), ordinal));
        }
        Ok(expanded)
    }
}
