//! Merge round planning.
//!
//! A round splits the current runs, in order, into consecutive groups of `fan_in` runs. When exactly one
//! run would be left over for a trailing group it is appended to the previous group instead, so no round
//! ever spends a merge on copying a single run.

use std::ops::Range;

use crate::codec::RECORD_SIZE;

/// Layout of a single merge round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundPlan {
    /// Run index ranges merged together, in run order.
    pub groups: Vec<Range<usize>>,
    /// Read/write buffer size of every open run in bytes.
    pub buffer_size: usize,
}

impl RoundPlan {
    /// Plans the merge round for `run_count` runs.
    ///
    /// # Arguments
    /// * `run_count` - Number of runs produced by the previous round
    /// * `fan_in` - Maximum number of runs merged by one merge task (at least 2)
    /// * `memory_budget` - Bytes shared by the buffers of all the concurrently open runs
    pub fn new(run_count: usize, fan_in: usize, memory_budget: u64) -> Self {
        let groups = group_runs(run_count, fan_in);
        let buffer_size = io_buffer_size(memory_budget, run_count, groups.len());

        return RoundPlan { groups, buffer_size };
    }
}

/// Splits `run_count` runs into merge groups.
pub fn group_runs(run_count: usize, fan_in: usize) -> Vec<Range<usize>> {
    debug_assert!(fan_in >= 2, "fan-in must be at least 2");

    if run_count <= 1 {
        return Vec::new();
    }

    let (group_count, absorb_last) = if run_count % fan_in == 1 {
        (run_count / fan_in, true)
    } else {
        ((run_count + fan_in - 1) / fan_in, false)
    };

    let mut groups = Vec::with_capacity(group_count);
    for idx in 0..group_count {
        let start = idx * fan_in;
        let end = if idx + 1 == group_count {
            run_count
        } else {
            start + fan_in
        };
        groups.push(start..end);
    }

    debug_assert!(!absorb_last || groups.last().map_or(false, |g| g.len() == fan_in + 1));

    return groups;
}

/// Computes the per-handle buffer size for a round.
///
/// Every run of the round is open for reading and every group has one output run open for writing,
/// all at the same time. The budget is divided evenly between these handles and rounded down to whole
/// records, never going below a single record.
pub fn io_buffer_size(memory_budget: u64, run_count: usize, group_count: usize) -> usize {
    let handles = (run_count + group_count).max(1) as u64;
    let records = memory_budget / handles / RECORD_SIZE as u64;

    return usize::try_from(records.max(1))
        .unwrap_or(usize::MAX / RECORD_SIZE)
        .saturating_mul(RECORD_SIZE);
}

/// Number of merge rounds needed to reduce `run_count` runs to one.
pub fn round_count(mut run_count: usize, fan_in: usize) -> usize {
    let mut rounds = 0;
    while run_count > 1 {
        run_count = group_runs(run_count, fan_in).len();
        rounds += 1;
    }

    return rounds;
}
