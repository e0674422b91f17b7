//! Error types for pngfetch.
//!
//! Format and codec problems live in [`crate::png::PngError`]; everything the
//! downloader, reassembly and server can hit is collected here.

use std::path::PathBuf;
use thiserror::Error;

use crate::png::PngError;
use crate::utils::multierr::MultiError;

/// Result type alias for pngfetch operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Mirror answered with a non-success status
    #[error("{url} answered with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Response did not carry the fragment sequence header
    #[error("response from {url} has no fragment sequence header")]
    MissingSequence { url: String },

    /// Sequence header named an index outside the known fragment range
    #[error("fragment sequence {seq} outside 0..{total}")]
    SequenceOutOfRange { seq: i64, total: usize },

    /// Body is not a PNG fragment
    #[error("fragment {seq} from {url} rejected: {source}")]
    InvalidFragment {
        url: String,
        seq: i64,
        #[source]
        source: PngError,
    },

    /// Growing the capture buffer failed
    #[error("cannot grow capture buffer to {requested} bytes")]
    CaptureAlloc { requested: usize },

    /// Workers stopped before every fragment was obtained
    #[error("fetch stopped with {} fragment(s) missing: {missing:?}", .missing.len())]
    Incomplete {
        missing: Vec<usize>,
        #[source]
        causes: MultiError<Error>,
    },

    /// Shared request budget spent before completion
    #[error("request budget of {0} exhausted")]
    BudgetExhausted(usize),

    /// Structural or codec problem in a fragment file
    #[error("{}: {source}", .path.display())]
    Png {
        path: PathBuf,
        #[source]
        source: PngError,
    },

    /// Worker task panicked or was cancelled
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn png(path: impl Into<PathBuf>, source: PngError) -> Self {
        Error::Png {
            path: path.into(),
            source,
        }
    }
}
