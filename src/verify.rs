//! Sorted output verification.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use crate::codec::{self, ReadOutcome};
use crate::sort::Totals;

const VERIFY_BUFFER_SIZE: usize = 64 * 1024;

/// Verification error.
#[derive(Debug)]
pub enum VerifyError {
    /// Common I/O error.
    IO(io::Error),
    /// The file ends with an incomplete record.
    Truncated { trailing: usize },
    /// A record is smaller than the one before it.
    Unordered { index: u64, previous: u64, value: u64 },
}

impl Error for VerifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            VerifyError::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            VerifyError::IO(err) => write!(f, "I/O operation failed: {}", err),
            VerifyError::Truncated { trailing } => write!(f, "incomplete trailing record ({} bytes)", trailing),
            VerifyError::Unordered { index, previous, value } => write!(
                f,
                "record {} ({:#x}) is smaller than the previous one ({:#x})",
                index, value, previous
            ),
        }
    }
}

impl From<io::Error> for VerifyError {
    fn from(err: io::Error) -> Self {
        VerifyError::IO(err)
    }
}

/// Checks that the file holds whole records in non-decreasing order.
/// Returns the number of records and their checksum.
pub fn verify_sorted(path: &Path) -> Result<Totals, VerifyError> {
    let file = fs::File::open(path)?;
    verify_reader(io::BufReader::with_capacity(VERIFY_BUFFER_SIZE, file))
}

/// Checks that the stream holds whole records in non-decreasing order.
pub fn verify_reader<R: Read>(mut reader: R) -> Result<Totals, VerifyError> {
    let mut totals = Totals::default();
    let mut previous: Option<u64> = None;

    loop {
        match codec::read_record(&mut reader)? {
            ReadOutcome::Record(value) => {
                if let Some(previous) = previous.filter(|p| *p > value) {
                    return Err(VerifyError::Unordered {
                        index: totals.records,
                        previous,
                        value,
                    });
                }
                previous = Some(value);
                totals.records += 1;
                totals.checksum = totals.checksum.wrapping_add(value);
            }
            ReadOutcome::End => return Ok(totals),
            ReadOutcome::Truncated(trailing) => return Err(VerifyError::Truncated { trailing }),
        }
    }
}
