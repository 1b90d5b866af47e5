//! Bounded-memory sorting and grouping for datasets too large to hold in
//! memory.
//!
//! Two engines share a run-file convention and temp-file lifecycle:
//!
//! - [`ExternalSorter`] sorts an arbitrary element stream under a byte
//!   budget, spilling sorted runs to disk and streaming a pairwise merge
//!   back to the caller. Serialization is entirely the caller's business,
//!   injected through the [`SortFormat`] trait.
//! - [`MapReduce`] buffers mapped `(key, value)` pairs, degrades once to a
//!   disk-backed spill file sorted by the system `sort(1)` utility, and
//!   groups contiguous equal keys for reduction.
//!
//! Both are single-threaded and pull-driven: nothing is produced until the
//! consumer asks for the next output item, beyond the eager work needed
//! before a first result can exist. Every temp file created by a call is
//! deleted when its output is dropped — or earlier, via the `close()`
//! methods on [`SortedOutput`] and [`Reduced`], which exist for consumers
//! that abandon iteration but keep the output value alive. On any failure,
//! files created so far are deleted before the error reaches the caller.
//!
//! There is no retry logic anywhere in this crate; every failure surfaces
//! synchronously and recovery belongs to the orchestration layer.
//!
//! ```
//! use bigsort::{ByteFormat, ExternalSorter};
//!
//! let sorter = ExternalSorter::new(ByteFormat).with_max_memory(64 << 20);
//! let sorted = sorter
//!     .sort(vec![b"b".to_vec(), b"a".to_vec(), b"c".to_vec()])
//!     .unwrap();
//! let elements: Vec<_> = sorted.collect::<Result<_, _>>().unwrap();
//! assert_eq!(elements, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
//! ```

pub mod config;
mod error;
mod mapreduce;
mod merge;
mod run;
mod sorter;

pub use error::{Error, Result};
pub use mapreduce::{ByteValues, MapReduce, Reduced, SerializedReduced, Values};
pub use sorter::{ByteFormat, ExternalSorter, SortFormat, SortedOutput};
