//! Run Store: framing and lifecycle of on-disk runs.
//!
//! A run is a temporary file holding a key-sorted sequence of serialized
//! elements, each framed as a 4-byte little-endian length prefix followed by
//! the payload bytes. Runs are created with unique names via [`new_run_file`]
//! and deleted when their [`tempfile::TempPath`] is dropped, which is what
//! backs the crate-wide guarantee that no temp files survive a sort or
//! map/reduce call.

use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Write one length-prefixed record.
pub(crate) fn write_record<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = bytes.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(bytes)
}

/// Create a uniquely named run file in `dir`, or in the system temp
/// directory when `dir` is `None`.
pub(crate) fn new_run_file(dir: Option<&Path>) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("bigsort-").suffix(".run");
    match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
}

/// Streaming reader over a run file's records.
///
/// End-of-stream is only clean at a record boundary: hitting EOF with zero
/// bytes of the next length prefix read yields `Ok(None)`, while a partial
/// prefix or a short payload is a fatal [`Error::MalformedRun`].
pub(crate) struct RecordReader<R: Read> {
    reader: R,
    offset: u64,
}

impl<R: Read> RecordReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Read the next record, or `None` at clean end-of-stream.
    pub(crate) fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match self.read_prefix()? {
            Some(len) => len as usize,
            None => return Ok(None),
        };
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                Error::MalformedRun {
                    offset: self.offset,
                }
            } else {
                Error::Io(e)
            }
        })?;
        self.offset += len as u64;
        Ok(Some(payload))
    }

    fn read_prefix(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(Error::MalformedRun {
                        offset: self.offset + filled as u64,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        self.offset += buf.len() as u64;
        Ok(Some(u32::from_le_bytes(buf)))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
