//! The one error type every stage of the pipeline propagates.
//!
//! Nothing here is recoverable: a single bad byte invalidates the whole
//! aggregate, so every variant ends the run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A raw block had no line terminator at all, so its fragments can't be told apart.
    #[error(
        "no newline in {len}-byte block at offset {offset}: a record is longer than the block \
         size or the input does not end with a newline"
    )]
    NoNewlineInBlock { offset: u64, len: usize },

    #[error("input does not end with a newline (unterminated record {record:?})")]
    MissingTrailingNewline { record: String },

    #[error("malformed record {record:?} at chunk byte {offset}: {reason}")]
    MalformedRecord {
        offset: usize,
        record: String,
        reason: &'static str,
    },

    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidConfig {
        parameter: &'static str,
        reason: String,
    },

    #[error("a worker exited without publishing its partial result")]
    WorkerLost,
}
