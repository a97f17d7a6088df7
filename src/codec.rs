//! Fixed-width record codec.
//!
//! A record is a single `u64` stored as 8 little-endian bytes with no framing.

use std::io;
use std::io::prelude::*;

/// Size of an encoded record in bytes.
pub const RECORD_SIZE: usize = 8;

/// Outcome of a single record read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete record was decoded.
    Record(u64),
    /// The stream ended on a record boundary.
    End,
    /// The stream ended after `1..=7` bytes of a record.
    Truncated(usize),
}

/// Appends a record to the writer.
pub fn write_record<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Reads the next record from the reader.
///
/// Short reads are retried until either a full record is assembled or the reader reports
/// end-of-stream, so the result does not depend on how the underlying reader splits its data.
pub fn read_record<R: Read>(reader: &mut R) -> io::Result<ReadOutcome> {
    let mut buf = [0u8; RECORD_SIZE];
    let mut filled = 0;

    while filled < RECORD_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    return Ok(match filled {
        0 => ReadOutcome::End,
        RECORD_SIZE => ReadOutcome::Record(u64::from_le_bytes(buf)),
        trailing => ReadOutcome::Truncated(trailing),
    });
}
