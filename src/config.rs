//! Process-level defaults.
//!
//! The memory budget can be set per call on [`ExternalSorter`] and
//! [`MapReduce`](crate::MapReduce); when it isn't, both fall back to the
//! budget configured here.
//!
//! [`ExternalSorter`]: crate::ExternalSorter

/// Default in-memory budget when `BIGSORT_MEM_LIMIT_MB` is unset, in MB.
pub const DEFAULT_MEM_LIMIT_MB: usize = 100;

/// The default memory budget in bytes.
///
/// Reads `BIGSORT_MEM_LIMIT_MB` from the environment, falling back to
/// [`DEFAULT_MEM_LIMIT_MB`]. Note actual memory usage will be higher than
/// the budget: only serialized payload bytes are counted, not allocator or
/// bookkeeping overhead.
pub fn default_mem_limit() -> usize {
    std::env::var("BIGSORT_MEM_LIMIT_MB")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MEM_LIMIT_MB)
        << 20
}
