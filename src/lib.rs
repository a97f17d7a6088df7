//! `u64-ext-sort` is a bounded-memory external sort for files of binary unsigned 64-bit integers.
//!
//! The input is a raw sequence of 8-byte little-endian `u64` records without any header or padding, and
//! so is the output. Sorting is achieved in two phases. During the first phase the input is split into
//! blocks that each fit into the memory budget, every block is sorted in memory and saved as a run.
//! During the second phase the runs are merged in rounds: each round merges groups of up to *k* runs
//! into one, merging independent groups in parallel, until a single run is left. That run becomes the
//! output file. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   a block never exceeds the memory budget, and the read/write buffers of every run open during a
//!   merge round share the same budget.
//! * **Multithreading support:**
//!   blocks are sorted with `rayon` parallel sort, merges of a round run on the same thread pool.
//! * **Integrity checks:**
//!   record counts and checksums of every merge output are checked against its inputs.
//!
//! # Example
//!
//! ```no_run
//! use std::path;
//!
//! use log;
//!
//! use u64_ext_sort::ExternalSorterBuilder;
//!
//! fn main() {
//!     // sorts ./data/numbers.in into ./data/numbers.out
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_data_dir(path::Path::new("./data"))
//!         .with_memory_budget(32 * 1024)
//!         .with_fan_in(4)
//!         .build()
//!         .unwrap();
//!
//!     let file_size = std::fs::metadata("./data/numbers.in").unwrap().len();
//!     let stats = sorter.sort("numbers", file_size).unwrap();
//!     log::info!("{} records sorted in {} rounds", stats.records, stats.rounds);
//! }
//! ```

pub mod buffer;
pub mod codec;
pub mod merger;
pub mod plan;
pub mod run;
pub mod sort;
pub mod tmp;
pub mod verify;

pub use buffer::BlockBuffer;
pub use codec::{read_record, write_record, ReadOutcome, RECORD_SIZE};
pub use merger::LinearMerger;
pub use run::{Run, RunError, RunId, RunKind, RunReader, RunWriter};
pub use sort::{sort, ExternalSorter, ExternalSorterBuilder, Phase, SortError, SortStats, Totals};
pub use verify::{verify_sorted, VerifyError};
