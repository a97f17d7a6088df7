//! In-memory block buffer.

use std::io;
use std::io::prelude::*;

use rayon;
use rayon::slice::ParallelSliceMut;

use crate::codec::{self, ReadOutcome, RECORD_SIZE};

/// Reason a block fill stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The buffer reached its limit.
    Full,
    /// The input ended on a record boundary.
    End,
    /// The input ended with an incomplete record of the given length.
    Truncated(usize),
}

/// Record buffer limited by elements count.
pub struct BlockBuffer {
    limit: usize,
    inner: Vec<u64>,
}

impl BlockBuffer {
    pub fn new(limit: usize) -> Self {
        BlockBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    /// Creates a buffer that holds as many records as fit into `budget` bytes.
    pub fn for_memory_budget(budget: u64) -> Self {
        let limit = usize::try_from(budget / RECORD_SIZE as u64).unwrap_or(usize::MAX);
        BlockBuffer::new(limit)
    }

    /// Maximum number of records the buffer holds.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: u64) {
        self.inner.push(item);
    }

    /// Returns buffer length
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    /// Preallocates room for up to `records` records, never more than the limit.
    pub fn reserve(&mut self, records: usize) {
        let wanted = records.min(self.limit);
        self.inner.reserve(wanted.saturating_sub(self.inner.len()));
    }

    /// Drops the buffered records keeping the allocation.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Reads records from the input until the buffer is full or the input ends.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<Fill> {
        while !self.is_full() {
            match codec::read_record(reader)? {
                ReadOutcome::Record(value) => self.push(value),
                ReadOutcome::End => return Ok(Fill::End),
                ReadOutcome::Truncated(trailing) => return Ok(Fill::Truncated(trailing)),
            }
        }

        return Ok(Fill::Full);
    }

    /// Sorts the buffered records in ascending order using the current rayon pool.
    pub fn sort(&mut self) {
        self.par_sort_unstable();
    }

    /// Smallest and largest records of a sorted buffer.
    pub fn bounds(&self) -> Option<(u64, u64)> {
        Some((*self.inner.first()?, *self.inner.last()?))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, u64> {
        self.inner.iter()
    }
}

impl rayon::slice::ParallelSliceMut<u64> for BlockBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [u64] {
        self.inner.as_mut_slice()
    }
}
