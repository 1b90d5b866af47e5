//! Bounded-memory external sort.
//!
//! [`ExternalSorter`] consumes an element stream, buffering serialized
//! elements up to a byte budget. When the budget is exceeded the buffer is
//! sorted and spilled to a run file; runs are then pairwise-merged down to
//! one, and the output streams that last run merged against whatever is
//! still buffered in memory. Small inputs never touch the disk.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use tempfile::TempPath;
use tracing::debug;

use crate::config;
use crate::error::{Error, Result};
use crate::merge::MergeIter;
use crate::run::{self, RecordReader};

/// Caller-supplied key extraction, ordering, and serialization for the
/// element type being sorted.
///
/// `compare` defaults to the key's natural ordering; override it to sort
/// under a different order. Equal-key elements keep their relative input
/// order, both within a buffered batch and across merged runs.
pub trait SortFormat {
    type Item;
    type Key: Ord + Clone;

    fn key(&self, item: &Self::Item) -> Self::Key;

    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering {
        a.cmp(b)
    }

    fn serialize(&self, item: &Self::Item) -> Vec<u8>;

    fn deserialize(&self, bytes: &[u8]) -> Self::Item;
}

/// Raw byte strings ordered bytewise; the element is its own key and its
/// own serialized form.
#[derive(Clone, Copy, Default)]
pub struct ByteFormat;

impl SortFormat for ByteFormat {
    type Item = Vec<u8>;
    type Key = Vec<u8>;

    fn key(&self, item: &Self::Item) -> Self::Key {
        item.clone()
    }

    fn serialize(&self, item: &Self::Item) -> Vec<u8> {
        item.clone()
    }

    fn deserialize(&self, bytes: &[u8]) -> Self::Item {
        bytes.to_vec()
    }
}

/// External sorter configured with a format and a byte budget.
///
/// The budget counts serialized payload bytes only; actual memory usage is
/// higher. A budget of zero spills on every element and still produces a
/// correct total order.
pub struct ExternalSorter<F: SortFormat> {
    format: F,
    max_memory: usize,
    tmp_dir: Option<PathBuf>,
}

impl<F: SortFormat> ExternalSorter<F> {
    /// Create a sorter with the process-default memory budget
    /// ([`config::default_mem_limit`]).
    pub fn new(format: F) -> Self {
        Self {
            format,
            max_memory: config::default_mem_limit(),
            tmp_dir: None,
        }
    }

    /// Set the in-memory byte budget.
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Place run files in `dir` instead of the system temp directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(dir.into());
        self
    }

    fn spill(&self, buffer: &mut Vec<(F::Key, Vec<u8>)>) -> Result<TempPath> {
        buffer.sort_by(|a, b| self.format.compare(&a.0, &b.0));
        let file = run::new_run_file(self.tmp_dir.as_deref())?;
        let mut writer = BufWriter::new(file);
        for (_, bytes) in buffer.iter() {
            run::write_record(&mut writer, bytes)?;
        }
        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        debug!(records = buffer.len(), path = ?file.path(), "spilled run");
        buffer.clear();
        Ok(file.into_temp_path())
    }

    /// Open a run file as a stream of `(key, serialized bytes)` pairs.
    fn run_stream(
        &self,
        path: &TempPath,
    ) -> Result<impl Iterator<Item = Result<(F::Key, Vec<u8>)>> + '_> {
        let reader = RecordReader::new(BufReader::new(File::open(path)?));
        Ok(reader.map(move |record| {
            let bytes = record?;
            let item = self.format.deserialize(&bytes);
            Ok((self.format.key(&item), bytes))
        }))
    }

    /// Merge two runs into a new run file. The inputs are deleted by the
    /// caller dropping their [`TempPath`]s.
    fn merge_runs(&self, left: &TempPath, right: &TempPath) -> Result<TempPath> {
        let merged = MergeIter::new(self.run_stream(left)?, self.run_stream(right)?, |a, b| {
            self.format.compare(a, b)
        });
        let file = run::new_run_file(self.tmp_dir.as_deref())?;
        let mut writer = BufWriter::new(file);
        for record in merged {
            let (_, bytes) = record?;
            run::write_record(&mut writer, &bytes)?;
        }
        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        Ok(file.into_temp_path())
    }
}

impl<F: SortFormat + Clone + 'static> ExternalSorter<F>
where
    F::Key: 'static,
{
    /// Sort `items` in non-decreasing key order.
    ///
    /// Elements are deserialized on demand as the output is pulled. All run
    /// files created by the call are deleted when the output is dropped or
    /// [`SortedOutput::close`]d; on error every file created so far is
    /// deleted before the error is returned.
    pub fn sort<I>(&self, items: I) -> Result<SortedOutput<F>>
    where
        I: IntoIterator<Item = F::Item>,
    {
        let mut buffer: Vec<(F::Key, Vec<u8>)> = Vec::new();
        let mut buffered_bytes = 0usize;
        let mut runs: Vec<TempPath> = Vec::new();

        for item in items {
            let key = self.format.key(&item);
            let bytes = self.format.serialize(&item);
            buffered_bytes += bytes.len();
            buffer.push((key, bytes));
            if buffered_bytes > self.max_memory {
                runs.push(self.spill(&mut buffer)?);
                buffered_bytes = 0;
            }
        }

        // Tail of the input that never overflowed the budget. Stable sort,
        // so equal keys keep insertion order.
        buffer.sort_by(|a, b| self.format.compare(&a.0, &b.0));

        if runs.is_empty() {
            return Ok(SortedOutput {
                format: self.format.clone(),
                state: OutputState::InMemory {
                    entries: buffer.into_iter(),
                },
            });
        }

        // Pairwise merge-down: always the two oldest runs, appending the
        // merged result as the newest.
        while runs.len() > 1 {
            let left = runs.remove(0);
            let right = runs.remove(0);
            let merged = self.merge_runs(&left, &right)?;
            debug!(remaining = runs.len() + 1, "merged two runs");
            runs.push(merged);
        }
        let last = runs.pop().expect("one run must remain after merge-down");

        let format = self.format.clone();
        let reader = RecordReader::new(BufReader::new(File::open(&last)?));
        let left: KvStream<F> = Box::new(reader.map(move |record| {
            let bytes = record?;
            let item = format.deserialize(&bytes);
            Ok((format.key(&item), bytes))
        }));
        let right: KvStream<F> = Box::new(buffer.into_iter().map(Ok));
        let cmp_format = self.format.clone();
        let cmp: CmpFn<F::Key> = Box::new(move |a, b| cmp_format.compare(a, b));
        let merge = MergeIter::new(left, right, cmp);

        Ok(SortedOutput {
            format: self.format.clone(),
            state: OutputState::Merged { merge, _run: last },
        })
    }
}

type KvStream<F> = Box<dyn Iterator<Item = Result<(<F as SortFormat>::Key, Vec<u8>)>>>;
type CmpFn<K> = Box<dyn Fn(&K, &K) -> Ordering>;

/// Lazy, single-pass sorted output of [`ExternalSorter::sort`].
///
/// Dropping the output deletes any remaining run file. Call [`close`] to do
/// that explicitly when abandoning iteration early while keeping the value
/// around.
///
/// [`close`]: SortedOutput::close
pub struct SortedOutput<F: SortFormat> {
    format: F,
    state: OutputState<F>,
}

enum OutputState<F: SortFormat> {
    InMemory {
        entries: std::vec::IntoIter<(F::Key, Vec<u8>)>,
    },
    Merged {
        merge: MergeIter<F::Key, Vec<u8>, KvStream<F>, KvStream<F>, CmpFn<F::Key>>,
        _run: TempPath,
    },
    Closed,
}

impl<F: SortFormat> SortedOutput<F> {
    /// Release the remaining run file immediately. Subsequent calls to
    /// `next` return `None`.
    pub fn close(&mut self) {
        self.state = OutputState::Closed;
    }
}

impl<F: SortFormat> Iterator for SortedOutput<F> {
    type Item = Result<F::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match &mut self.state {
            OutputState::InMemory { entries } => entries.next().map(|(_, bytes)| Ok(bytes)),
            OutputState::Merged { merge, .. } => {
                merge.next().map(|record| record.map(|(_, bytes)| bytes))
            }
            OutputState::Closed => None,
        };
        match record {
            Some(Ok(bytes)) => Some(Ok(self.format.deserialize(&bytes))),
            Some(Err(e)) => {
                // Delete run files before surfacing the error.
                self.close();
                Some(Err(e))
            }
            None => {
                self.close();
                None
            }
        }
    }
}
