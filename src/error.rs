//! Error types for sort and map/reduce operations.

use std::process::ExitStatus;
use thiserror::Error;

/// Result type for sort and map/reduce operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation on a run or spill file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A run file ended in the middle of a length-prefixed record.
    /// Never recoverable; the sort or merge that hit it is aborted.
    #[error("malformed run file: truncated record at byte {offset}")]
    MalformedRun { offset: u64 },

    /// The external sort utility exited with a non-zero status
    #[error("external sort failed: {status}")]
    ExternalSortFailed { status: ExitStatus },

    /// A spill record was missing its field delimiter or was not valid UTF-8
    #[error("malformed spill record at record {index}")]
    MalformedSpillRecord { index: u64 },

    /// A serialized value could not be base64-decoded
    #[error("serialized value could not be decoded: {0}")]
    ValueDecode(#[from] base64::DecodeError),
}
