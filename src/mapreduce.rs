//! Spilling map/reduce engine.
//!
//! The map phase buffers emitted `(key, value)` pairs in memory. The first
//! time the buffered value bytes exceed the budget the engine switches
//! permanently to disk mode: everything buffered so far and every pair
//! emitted afterwards is appended to a single spill file as `key|value\0`
//! text records, and the budget is never consulted again for the rest of
//! the call. The spill file is then sorted by the system `sort(1)` utility
//! (NUL-terminated records, `|`-delimited fields, first field as the key)
//! and the sorted stream is grouped and reduced lazily.
//!
//! Two consequences of that design are deliberate and preserved: the single
//! spill file grows without bound after the transition, and a hung `sort(1)`
//! blocks the caller indefinitely. Environments without a usable `sort(1)`
//! would need an in-process fallback (running the pair stream through
//! [`ExternalSorter`](crate::ExternalSorter)); this implementation does not
//! provide one.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::Command;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tempfile::{NamedTempFile, TempPath};
use tracing::info;

use crate::config;
use crate::error::{Error, Result};

/// Values of one group, in the order the mapper emitted them.
pub type Values = std::vec::IntoIter<String>;

/// Decoded values of one group in serialized mode.
pub type ByteValues = std::vec::IntoIter<Vec<u8>>;

/// Map/reduce engine configured with a byte budget for the map phase.
///
/// A budget of zero enters disk mode on the very first pair. Spilling is
/// purely a resource optimization: forced disk mode and a budget large
/// enough to never spill produce identical output.
pub struct MapReduce {
    mem_limit: usize,
    tmp_dir: Option<PathBuf>,
}

impl Default for MapReduce {
    fn default() -> Self {
        Self::new()
    }
}

impl MapReduce {
    /// Create an engine with the process-default memory budget
    /// ([`config::default_mem_limit`]).
    pub fn new() -> Self {
        Self {
            mem_limit: config::default_mem_limit(),
            tmp_dir: None,
        }
    }

    /// Set the map-phase byte budget.
    pub fn with_mem_limit(mut self, bytes: usize) -> Self {
        self.mem_limit = bytes;
        self
    }

    /// Place spill files in `dir` instead of the system temp directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(dir.into());
        self
    }

    /// Run the map phase over `items`, then group and reduce.
    ///
    /// `mapper` may emit any number of pairs per item, including none.
    /// Returns `(key, reducer result)` pairs in ascending key order; the
    /// reducer runs lazily as the output is pulled. Keys must not contain
    /// `|` and values must not contain NUL bytes — violating either is a
    /// caller bug and panics once the engine is in disk mode.
    pub fn run<I, T, M, P, R, O>(&self, mapper: M, reducer: R, items: I) -> Result<Reduced<R>>
    where
        I: IntoIterator<Item = T>,
        M: FnMut(T) -> P,
        P: IntoIterator<Item = (String, String)>,
        R: FnMut(&str, Values) -> O,
    {
        let stream = self.map_phase(mapper, items)?;
        Ok(Reduced {
            groups: Grouped::new(stream),
            reducer,
        })
    }

    /// Like [`run`], but transports opaque byte values through the textual
    /// spill framing by base64-encoding them. The reducer receives the
    /// decoded bytes.
    ///
    /// [`run`]: MapReduce::run
    pub fn run_serialized<I, T, M, P, R, O>(
        &self,
        mut mapper: M,
        reducer: R,
        items: I,
    ) -> Result<SerializedReduced<R>>
    where
        I: IntoIterator<Item = T>,
        M: FnMut(T) -> P,
        P: IntoIterator<Item = (String, Vec<u8>)>,
        R: FnMut(&str, ByteValues) -> O,
    {
        let encoding = move |item: T| {
            mapper(item)
                .into_iter()
                .map(|(key, value)| (key, STANDARD.encode(value)))
                .collect::<Vec<_>>()
        };
        let stream = self.map_phase(encoding, items)?;
        Ok(SerializedReduced {
            groups: Grouped::new(stream),
            reducer,
        })
    }

    fn map_phase<I, T, M, P>(&self, mut mapper: M, items: I) -> Result<PairStream>
    where
        I: IntoIterator<Item = T>,
        M: FnMut(T) -> P,
        P: IntoIterator<Item = (String, String)>,
    {
        let mut buffered: Vec<(String, String)> = Vec::new();
        let mut buffered_bytes = 0usize;
        let mut spill: Option<BufWriter<NamedTempFile>> = None;

        for item in items {
            for (key, value) in mapper(item) {
                if spill.is_none() && buffered_bytes >= self.mem_limit {
                    // One-shot transition: the budget is never consulted
                    // again for the remainder of this call.
                    info!(buffered_bytes, "switching to disk sorting");
                    let mut writer = BufWriter::new(self.new_spill_file(".spill")?);
                    for (k, v) in buffered.drain(..) {
                        write_pair(&mut writer, &k, &v)?;
                    }
                    spill = Some(writer);
                }
                match spill.as_mut() {
                    Some(writer) => write_pair(writer, &key, &value)?,
                    None => {
                        buffered_bytes += value.len();
                        buffered.push((key, value));
                    }
                }
            }
        }

        match spill {
            None => {
                // Stable by key, ties keep emission order.
                buffered.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(PairStream::Mem(buffered.into_iter()))
            }
            Some(writer) => {
                let infile = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
                let outfile = self.new_spill_file(".sorted")?;
                self.external_sort(&infile, &outfile)?;
                info!(path = ?outfile.path(), "reducing from sorted spill file");
                let records = BufReader::new(File::open(outfile.path())?).split(b'\0');
                Ok(PairStream::Disk {
                    records,
                    index: 0,
                    _spill: infile.into_temp_path(),
                    _sorted: outfile.into_temp_path(),
                })
            }
        }
    }

    /// Sort the spill file with the system line-sort utility: first
    /// `|`-delimited field as the key, NUL as the record terminator.
    /// `--stable` and the C locale keep the disk path's key order and
    /// equal-key value order identical to the in-memory path's.
    fn external_sort(&self, infile: &NamedTempFile, outfile: &NamedTempFile) -> Result<()> {
        let status = Command::new("sort")
            .arg("--stable")
            .arg("-z")
            .arg("-t")
            .arg("|")
            .arg("-k")
            .arg("1,1")
            .arg("-o")
            .arg(outfile.path())
            .arg(infile.path())
            .env("LC_ALL", "C")
            .status()?;
        if !status.success() {
            return Err(Error::ExternalSortFailed { status });
        }
        Ok(())
    }

    fn new_spill_file(&self, suffix: &str) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bigsort-").suffix(suffix);
        match &self.tmp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}

fn write_pair<W: Write>(writer: &mut W, key: &str, value: &str) -> io::Result<()> {
    assert!(
        !key.contains('|'),
        "'|' is not allowed in keys when disk sorting"
    );
    assert!(
        !value.contains('\0'),
        "NUL bytes are not allowed in values when disk sorting"
    );
    writer.write_all(key.as_bytes())?;
    writer.write_all(b"|")?;
    writer.write_all(value.as_bytes())?;
    writer.write_all(b"\0")
}

/// Key-sorted pair stream produced by the map phase.
enum PairStream {
    Mem(std::vec::IntoIter<(String, String)>),
    Disk {
        records: io::Split<BufReader<File>>,
        index: u64,
        _spill: TempPath,
        _sorted: TempPath,
    },
    Closed,
}

impl Iterator for PairStream {
    type Item = Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            PairStream::Mem(pairs) => pairs.next().map(Ok),
            PairStream::Disk { records, index, .. } => {
                let record = match records.next()? {
                    Ok(record) => record,
                    Err(e) => return Some(Err(Error::Io(e))),
                };
                let i = *index;
                *index += 1;
                Some(parse_pair(record, i))
            }
            PairStream::Closed => None,
        }
    }
}

fn parse_pair(record: Vec<u8>, index: u64) -> Result<(String, String)> {
    let sep = record
        .iter()
        .position(|&b| b == b'|')
        .ok_or(Error::MalformedSpillRecord { index })?;
    let key = String::from_utf8(record[..sep].to_vec())
        .map_err(|_| Error::MalformedSpillRecord { index })?;
    let value = String::from_utf8(record[sep + 1..].to_vec())
        .map_err(|_| Error::MalformedSpillRecord { index })?;
    Ok((key, value))
}

/// Groups maximal runs of adjacent equal keys in an already key-sorted
/// stream. Does not re-sort.
struct Grouped {
    stream: PairStream,
    pending: Option<(String, String)>,
    done: bool,
}

impl Grouped {
    fn new(stream: PairStream) -> Self {
        Self {
            stream,
            pending: None,
            done: false,
        }
    }

    fn close(&mut self) {
        self.stream = PairStream::Closed;
        self.pending = None;
        self.done = true;
    }
}

impl Iterator for Grouped {
    type Item = Result<(String, Vec<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (key, first) = match self.pending.take() {
            Some(pair) => pair,
            None => match self.stream.next() {
                None => {
                    self.close();
                    return None;
                }
                Some(Err(e)) => {
                    self.close();
                    return Some(Err(e));
                }
                Some(Ok(pair)) => pair,
            },
        };
        let mut values = vec![first];
        loop {
            match self.stream.next() {
                None => {
                    // Exhausted: release the spill files now rather than
                    // waiting for the output to be dropped.
                    self.close();
                    break;
                }
                Some(Err(e)) => {
                    self.close();
                    return Some(Err(e));
                }
                Some(Ok((k, v))) => {
                    if k == key {
                        values.push(v);
                    } else {
                        self.pending = Some((k, v));
                        break;
                    }
                }
            }
        }
        Some(Ok((key, values)))
    }
}

/// Lazy `(key, reducer result)` output of [`MapReduce::run`], in ascending
/// key order.
///
/// Dropping it deletes any spill files; [`close`](Reduced::close) does so
/// explicitly when abandoning iteration early.
pub struct Reduced<R> {
    groups: Grouped,
    reducer: R,
}

impl<R> Reduced<R> {
    /// Release spill files immediately. Subsequent `next` calls return
    /// `None`.
    pub fn close(&mut self) {
        self.groups.close();
    }
}

impl<R, O> Iterator for Reduced<R>
where
    R: FnMut(&str, Values) -> O,
{
    type Item = Result<(String, O)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.groups.next()? {
            Err(e) => Some(Err(e)),
            Ok((key, values)) => {
                let result = (self.reducer)(&key, values.into_iter());
                Some(Ok((key, result)))
            }
        }
    }
}

/// Lazy output of [`MapReduce::run_serialized`]; values are base64-decoded
/// before the reducer sees them.
pub struct SerializedReduced<R> {
    groups: Grouped,
    reducer: R,
}

impl<R> SerializedReduced<R> {
    /// Release spill files immediately. Subsequent `next` calls return
    /// `None`.
    pub fn close(&mut self) {
        self.groups.close();
    }
}

impl<R, O> Iterator for SerializedReduced<R>
where
    R: FnMut(&str, ByteValues) -> O,
{
    type Item = Result<(String, O)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.groups.next()? {
            Err(e) => Some(Err(e)),
            Ok((key, values)) => {
                let mut decoded = Vec::with_capacity(values.len());
                for value in values {
                    match STANDARD.decode(&value) {
                        Ok(bytes) => decoded.push(bytes),
                        Err(e) => {
                            self.groups.close();
                            return Some(Err(Error::ValueDecode(e)));
                        }
                    }
                }
                let result = (self.reducer)(&key, decoded.into_iter());
                Some(Ok((key, result)))
            }
        }
    }
}
