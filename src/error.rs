use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the corpus or answering queries.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read corpus {path:?}: {source}")]
    CorpusRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus has already been loaded")]
    AlreadyLoaded,

    #[error("corpus has not been loaded")]
    NotLoaded,

    #[error("index has already been committed")]
    AlreadyCommitted,

    #[error("index has not been committed")]
    NotCommitted,

    #[error("document {0:?} was ingested more than once")]
    DuplicateDocument(String),

    #[error("work title {0:?} appears more than once in the corpus")]
    DuplicateTitle(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed block identifier {0:?}")]
    MalformedId(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the failure was caused by the caller's input rather than the service.
    pub fn is_request_error(&self) -> bool {
        matches!(self, Error::InvalidRequest(_) | Error::MalformedId(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<fst::Error> for Error {
    fn from(value: fst::Error) -> Self {
        Error::Index(value.to_string())
    }
}
