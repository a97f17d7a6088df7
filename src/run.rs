//! Sorted runs stored on the file system.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::codec::{self, ReadOutcome, RECORD_SIZE};

/// Run position inside a merge round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId {
    /// Round the run was created in. Runs of the internal sort phase belong to round 0.
    pub round: usize,
    /// Position of the run within its round.
    pub position: usize,
}

impl RunId {
    pub fn new(round: usize, position: usize) -> Self {
        RunId { round, position }
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.round, self.position)
    }
}

/// Phase that produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Produced by sorting an input block in memory.
    Sorted,
    /// Produced by merging runs of the previous round.
    Merged,
}

impl RunKind {
    /// File name suffix of the runs of this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            RunKind::Sorted => "sorted",
            RunKind::Merged => "merged",
        }
    }
}

/// Run reading error.
#[derive(Debug)]
pub enum RunError {
    /// Common I/O error.
    IO(io::Error),
    /// The run ends with an incomplete record.
    Truncated { trailing: usize },
    /// The run ends before all the records it was written with.
    Missing { remaining: u64 },
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            RunError::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunError::IO(err) => write!(f, "I/O operation failed: {}", err),
            RunError::Truncated { trailing } => write!(f, "incomplete trailing record ({} bytes)", trailing),
            RunError::Missing { remaining } => write!(f, "run ended {} records early", remaining),
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::IO(err)
    }
}

/// A completely written run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    id: RunId,
    kind: RunKind,
    path: PathBuf,
    len: u64,
    checksum: u64,
}

impl Run {
    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the run.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Wrapping sum of all the records in the run.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }
}

/// Buffered run writer. Keeps track of the number and the checksum of the written records.
pub struct RunWriter {
    id: RunId,
    kind: RunKind,
    path: PathBuf,
    writer: io::BufWriter<fs::File>,
    len: u64,
    checksum: u64,
}

impl RunWriter {
    /// Creates (or truncates) the run file.
    ///
    /// # Arguments
    /// * `id` - Run identifier
    /// * `kind` - Phase producing the run
    /// * `path` - Run file path
    /// * `buf_size` - Write buffer size in bytes
    pub fn create(id: RunId, kind: RunKind, path: &Path, buf_size: usize) -> io::Result<Self> {
        let file = fs::File::create(path)?;

        return Ok(RunWriter {
            id,
            kind,
            path: path.to_path_buf(),
            writer: io::BufWriter::with_capacity(buf_size, file),
            len: 0,
            checksum: 0,
        });
    }

    /// Appends a record to the run.
    pub fn push(&mut self, value: u64) -> io::Result<()> {
        codec::write_record(&mut self.writer, value)?;
        self.len += 1;
        self.checksum = self.checksum.wrapping_add(value);

        return Ok(());
    }

    /// Flushes the buffer and syncs the file to disk, sealing the run.
    pub fn finish(mut self) -> io::Result<Run> {
        self.writer.flush()?;
        let file = self.writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;

        return Ok(Run {
            id: self.id,
            kind: self.kind,
            path: self.path,
            len: self.len,
            checksum: self.checksum,
        });
    }
}

/// Buffered run reader. Yields exactly as many records as the run was written with.
pub struct RunReader {
    reader: io::Take<io::BufReader<fs::File>>,
    remaining: u64,
}

impl RunReader {
    /// Opens a run for reading.
    ///
    /// # Arguments
    /// * `run` - Run to be read
    /// * `buf_size` - Read buffer size in bytes
    pub fn open(run: &Run, buf_size: usize) -> io::Result<Self> {
        let file = fs::File::open(run.path())?;
        let reader = io::BufReader::with_capacity(buf_size, file);

        return Ok(RunReader {
            reader: reader.take(run.len() * RECORD_SIZE as u64),
            remaining: run.len(),
        });
    }

    /// Number of records not read yet.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for RunReader {
    type Item = Result<u64, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let result = match codec::read_record(&mut self.reader) {
            Ok(ReadOutcome::Record(value)) => {
                self.remaining -= 1;
                return Some(Ok(value));
            }
            Ok(ReadOutcome::End) => RunError::Missing {
                remaining: self.remaining,
            },
            Ok(ReadOutcome::Truncated(trailing)) => RunError::Truncated { trailing },
            Err(err) => RunError::IO(err),
        };

        // a broken run yields no more records
        self.remaining = 0;
        return Some(Err(result));
    }
}
