//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::buffer::{BlockBuffer, Fill};
use crate::codec::RECORD_SIZE;
use crate::merger::LinearMerger;
use crate::plan::RoundPlan;
use crate::run::{Run, RunError, RunId, RunKind, RunReader};
use crate::tmp::TempArea;

/// Default directory holding input and output files.
pub const DEFAULT_DATA_DIR: &str = "./data";
/// Default memory budget in bytes.
pub const DEFAULT_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;
/// Default number of runs merged by one merge task.
pub const DEFAULT_FAN_IN: usize = 8;
/// Input file name suffix.
pub const INPUT_SUFFIX: &str = "in";
/// Output file name suffix.
pub const OUTPUT_SUFFIX: &str = "out";

// read/write buffer size used by the internal sort phase
const BLOCK_IO_BUFFER_SIZE: usize = 4096;

/// Sort stage an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading input blocks and writing the initial runs.
    InternalSort,
    /// Merging runs.
    Merge,
    /// Moving the last run to the output and removing temporary data.
    Finalize,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::InternalSort => write!(f, "internal sort"),
            Phase::Merge => write!(f, "merge"),
            Phase::Finalize => write!(f, "finalize"),
        }
    }
}

/// Number of records and their wrapping sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub records: u64,
    pub checksum: u64,
}

impl Totals {
    /// Sums up the totals of the runs.
    pub fn of<'a>(runs: impl IntoIterator<Item = &'a Run>) -> Self {
        runs.into_iter().fold(Totals::default(), |acc, run| Totals {
            records: acc.records + run.len(),
            checksum: acc.checksum.wrapping_add(run.checksum()),
        })
    }
}

impl Display for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} records, checksum {:#018x}", self.records, self.checksum)
    }
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Memory budget is zero or not a multiple of the record size.
    InvalidMemoryBudget(u64),
    /// Fan-in is less than 2.
    InvalidFanIn(usize),
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// I/O operation on the input, a run or the output failed.
    IO { phase: Phase, path: PathBuf, source: io::Error },
    /// A file ends with an incomplete record.
    Corrupted { phase: Phase, path: PathBuf, trailing: usize },
    /// A run ends before all of its records were read.
    Missing { phase: Phase, path: PathBuf, remaining: u64 },
    /// A merge round lost or invented records.
    RoundInvariant { round: usize, expected: Totals, actual: Totals },
}

impl SortError {
    fn io(phase: Phase, path: &Path, source: io::Error) -> Self {
        SortError::IO {
            phase,
            path: path.to_path_buf(),
            source,
        }
    }

    fn run(phase: Phase, path: &Path, err: RunError) -> Self {
        let path = path.to_path_buf();
        match err {
            RunError::IO(source) => SortError::IO { phase, path, source },
            RunError::Truncated { trailing } => SortError::Corrupted { phase, path, trailing },
            RunError::Missing { remaining } => SortError::Missing { phase, path, remaining },
        }
    }

    /// Phase the error occurred in. Configuration errors have no phase.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SortError::IO { phase, .. } | SortError::Corrupted { phase, .. } | SortError::Missing { phase, .. } => {
                Some(*phase)
            }
            SortError::TempDir(_) => Some(Phase::InternalSort),
            SortError::RoundInvariant { .. } => Some(Phase::Merge),
            _ => None,
        }
    }

    /// Checks if the error was caused by an invalid sorter configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SortError::InvalidMemoryBudget(_) | SortError::InvalidFanIn(_))
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidMemoryBudget(budget) => write!(
                f,
                "memory budget must be a positive multiple of {} bytes, got {}",
                RECORD_SIZE, budget
            ),
            SortError::InvalidFanIn(fan_in) => write!(f, "fan-in must be at least 2, got {}", fan_in),
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO { phase, path, source } => {
                write!(f, "{}: I/O operation on {} failed: {}", phase, path.display(), source)
            }
            SortError::Corrupted { phase, path, trailing } => write!(
                f,
                "{}: {} ends with an incomplete record ({} bytes)",
                phase,
                path.display(),
                trailing
            ),
            SortError::Missing { phase, path, remaining } => {
                write!(f, "{}: {} ended {} records early", phase, path.display(), remaining)
            }
            SortError::RoundInvariant { round, expected, actual } => write!(
                f,
                "merge round {} produced {} instead of {}",
                round, actual, expected
            ),
        }
    }
}

/// Summary of a finished sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Number of sorted records.
    pub records: u64,
    /// Number of runs produced by the internal sort phase.
    pub initial_runs: usize,
    /// Number of merge rounds.
    pub rounds: usize,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Number of threads to be used to sort and merge data in parallel.
    threads_number: Option<usize>,
    /// Directory holding input and output files.
    data_dir: Option<Box<Path>>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Bytes of record data held in memory at once.
    memory_budget: u64,
    /// Maximum number of runs merged together.
    fan_in: usize,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(
            self.threads_number,
            self.data_dir.as_deref(),
            self.tmp_dir.as_deref(),
            self.memory_budget,
            self.fan_in,
        )
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory holding `{name}.in` input and `{name}.out` output files.
    pub fn with_data_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.data_dir = Some(path.into());
        return self;
    }

    /// Sets directory the temporary directory is created in.
    /// By default it is created next to the output file.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets memory budget in bytes. Must be a positive multiple of 8.
    ///
    /// The budget bounds the record data held in memory: every input block is exactly this large, and a
    /// merge round splits it between the buffers of its open runs. While a block is sorted and saved,
    /// one input read buffer and one run write buffer of up to 4 KiB each are held on top of it.
    pub fn with_memory_budget(mut self, memory_budget: u64) -> ExternalSorterBuilder {
        self.memory_budget = memory_budget;
        return self;
    }

    /// Sets maximum number of runs merged together. Must be at least 2.
    pub fn with_fan_in(mut self, fan_in: usize) -> ExternalSorterBuilder {
        self.fan_in = fan_in;
        return self;
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            data_dir: None,
            tmp_dir: None,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            fan_in: DEFAULT_FAN_IN,
        }
    }
}

/// External sorter.
pub struct ExternalSorter {
    /// Sorting and merging thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory holding input and output files.
    data_dir: PathBuf,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<PathBuf>,
    /// Bytes of record data held in memory at once.
    memory_budget: u64,
    /// Maximum number of runs merged together.
    fan_in: usize,
}

impl ExternalSorter {
    /// Creates a new external sorter instance. Configuration is validated before anything else.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `data_dir` - Directory holding input and output files. If the parameter is [`None`]
    ///   [`DEFAULT_DATA_DIR`] is used.
    /// * `tmp_path` - Directory the temporary directory is created in. If the parameter is [`None`]
    ///   the output file directory is used.
    /// * `memory_budget` - Bytes of record data held in memory at once, a positive multiple of 8.
    /// * `fan_in` - Maximum number of runs merged together, at least 2.
    pub fn new(
        threads_number: Option<usize>,
        data_dir: Option<&Path>,
        tmp_path: Option<&Path>,
        memory_budget: u64,
        fan_in: usize,
    ) -> Result<Self, SortError> {
        Self::validate(memory_budget, fan_in)?;

        return Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            data_dir: data_dir.map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), Path::to_path_buf),
            tmp_dir: tmp_path.map(Path::to_path_buf),
            memory_budget,
            fan_in,
        });
    }

    fn validate(memory_budget: u64, fan_in: usize) -> Result<(), SortError> {
        if memory_budget == 0 || memory_budget % RECORD_SIZE as u64 != 0 {
            return Err(SortError::InvalidMemoryBudget(memory_budget));
        }
        if fan_in < 2 {
            return Err(SortError::InvalidFanIn(fan_in));
        }

        return Ok(());
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Input file path of the file `name`.
    pub fn input_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.{}", name, INPUT_SUFFIX))
    }

    /// Output file path of the file `name`.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.{}", name, OUTPUT_SUFFIX))
    }

    /// Sorts `{data_dir}/{name}.in` into `{data_dir}/{name}.out`.
    ///
    /// # Arguments
    /// * `name` - File name without suffix
    /// * `file_size` - Number of input bytes to be sorted
    pub fn sort(&self, name: &str, file_size: u64) -> Result<SortStats, SortError> {
        self.sort_session(name, &self.input_path(name), &self.output_path(name), Some(file_size))
    }

    /// Sorts the `input` file into the `output` file.
    ///
    /// # Arguments
    /// * `input` - File to be sorted
    /// * `output` - Result file, replaced if it exists
    /// * `file_size` - Number of input bytes to be sorted. If the parameter is [`None`] the whole file is sorted.
    pub fn sort_file(&self, input: &Path, output: &Path, file_size: Option<u64>) -> Result<SortStats, SortError> {
        let name = input
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("run")
            .to_string();

        self.sort_session(&name, input, output, file_size)
    }

    fn sort_session(
        &self,
        name: &str,
        input: &Path,
        output: &Path,
        file_size: Option<u64>,
    ) -> Result<SortStats, SortError> {
        let input_file = fs::File::open(input).map_err(|err| SortError::io(Phase::InternalSort, input, err))?;
        let file_size = match file_size {
            Some(file_size) => file_size,
            None => input_file
                .metadata()
                .map_err(|err| SortError::io(Phase::InternalSort, input, err))?
                .len(),
        };

        let tmp_parent = match (&self.tmp_dir, output.parent()) {
            (Some(tmp_dir), _) => tmp_dir.as_path(),
            (None, Some(parent)) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let area = TempArea::create(tmp_parent, name).map_err(|err| SortError::TempDir(err))?;

        log::info!(
            "sorting {} ({} bytes, memory budget: {} bytes, fan-in: {})",
            input.display(),
            file_size,
            self.memory_budget,
            self.fan_in
        );

        let mut runs = self.internal_sort(&area, input, input_file, file_size)?;
        let initial = Totals::of(&runs);
        let initial_runs = runs.len();
        log::info!("internal sort done: {} runs, {}", initial_runs, initial);

        let mut rounds = 0;
        while runs.len() > 1 {
            rounds += 1;
            runs = self.merge_round(&area, rounds, runs)?;

            let totals = Totals::of(&runs);
            if totals != initial {
                return Err(SortError::RoundInvariant {
                    round: rounds,
                    expected: initial,
                    actual: totals,
                });
            }
        }

        match runs.pop() {
            Some(run) => area
                .promote(run, output)
                .map_err(|err| SortError::io(Phase::Finalize, output, err))?,
            None => fs::File::create(output)
                .and_then(|file| file.sync_all())
                .map_err(|err| SortError::io(Phase::Finalize, output, err))?,
        }

        let tmp_path = area.path().to_path_buf();
        area.close()
            .map_err(|err| SortError::io(Phase::Finalize, &tmp_path, err))?;

        log::info!("{} sorted into {} ({} merge rounds)", input.display(), output.display(), rounds);

        return Ok(SortStats {
            records: initial.records,
            initial_runs,
            rounds,
        });
    }

    fn internal_sort(
        &self,
        area: &TempArea,
        input: &Path,
        input_file: fs::File,
        file_size: u64,
    ) -> Result<Vec<Run>, SortError> {
        let block_count = file_size / self.memory_budget + u64::from(file_size % self.memory_budget != 0);
        let io_buf_size = BLOCK_IO_BUFFER_SIZE.min(self.memory_budget as usize);
        log::debug!("splitting input into {} blocks", block_count);

        let mut reader = io::BufReader::with_capacity(io_buf_size, input_file).take(file_size);
        let mut buffer = BlockBuffer::for_memory_budget(self.memory_budget);
        buffer.reserve(usize::try_from(file_size / RECORD_SIZE as u64).unwrap_or(usize::MAX));
        let mut runs = Vec::with_capacity(usize::try_from(block_count).unwrap_or(usize::MAX).min(1024));

        for position in 0..block_count as usize {
            buffer.clear();
            let fill = buffer
                .fill(&mut reader)
                .map_err(|err| SortError::io(Phase::InternalSort, input, err))?;

            if let Fill::Truncated(trailing) = fill {
                return Err(SortError::Corrupted {
                    phase: Phase::InternalSort,
                    path: input.to_path_buf(),
                    trailing,
                });
            }
            if buffer.is_empty() {
                log::warn!(
                    "{} ended after {} of {} blocks",
                    input.display(),
                    position,
                    block_count
                );
                break;
            }

            log::debug!("sorting block {} ...", position);
            self.thread_pool.install(|| buffer.sort());

            if let Some((min, max)) = buffer.bounds() {
                log::debug!(
                    "block {}: length = {}, from {:#x} to {:#x}",
                    position,
                    buffer.len(),
                    min,
                    max
                );
            }

            let id = RunId::new(0, position);
            let run_path = area.run_path(id, RunKind::Sorted);
            let mut writer = area
                .create_run(id, RunKind::Sorted, io_buf_size)
                .map_err(|err| SortError::io(Phase::InternalSort, &run_path, err))?;
            for value in buffer.iter() {
                writer
                    .push(*value)
                    .map_err(|err| SortError::io(Phase::InternalSort, &run_path, err))?;
            }
            runs.push(
                writer
                    .finish()
                    .map_err(|err| SortError::io(Phase::InternalSort, &run_path, err))?,
            );
        }

        return Ok(runs);
    }

    fn merge_round(&self, area: &TempArea, round: usize, runs: Vec<Run>) -> Result<Vec<Run>, SortError> {
        let plan = RoundPlan::new(runs.len(), self.fan_in, self.memory_budget);
        log::info!(
            "merge round {}: {} runs in {} groups (buffer size: {} bytes)",
            round,
            runs.len(),
            plan.groups.len(),
            plan.buffer_size
        );

        let mut runs = runs.into_iter();
        let groups: Vec<Vec<Run>> = plan
            .groups
            .iter()
            .map(|group| runs.by_ref().take(group.len()).collect())
            .collect();

        let buffer_size = plan.buffer_size;
        let merged: Result<Vec<Run>, SortError> = self.thread_pool.install(|| {
            groups
                .into_par_iter()
                .enumerate()
                .map(|(position, group)| self.merge_group(area, RunId::new(round, position), group, buffer_size))
                .collect()
        });

        return merged;
    }

    fn merge_group(&self, area: &TempArea, id: RunId, group: Vec<Run>, buffer_size: usize) -> Result<Run, SortError> {
        let mut readers = Vec::with_capacity(group.len());
        for run in group.iter() {
            let path = run.path().to_path_buf();
            let reader = RunReader::open(run, buffer_size).map_err(|err| SortError::io(Phase::Merge, &path, err))?;
            readers.push(reader.map(move |item| item.map_err(|err| SortError::run(Phase::Merge, &path, err))));
        }

        let run_path = area.run_path(id, RunKind::Merged);
        let mut writer = area
            .create_run(id, RunKind::Merged, buffer_size)
            .map_err(|err| SortError::io(Phase::Merge, &run_path, err))?;

        let mut bounds: Option<(u64, u64)> = None;
        for item in LinearMerger::new(readers) {
            let value = item?;
            writer
                .push(value)
                .map_err(|err| SortError::io(Phase::Merge, &run_path, err))?;
            bounds = Some((bounds.map_or(value, |(min, _)| min), value));
        }

        let merged = writer
            .finish()
            .map_err(|err| SortError::io(Phase::Merge, &run_path, err))?;

        let expected = Totals::of(&group);
        let actual = Totals::of([&merged]);
        if expected != actual {
            return Err(SortError::RoundInvariant {
                round: id.round,
                expected,
                actual,
            });
        }

        if let (Some(first), Some(last)) = (group.first(), group.last()) {
            let (min, max) = bounds.unwrap_or_default();
            log::debug!(
                "merged runs {}..={} into {}: length = {}, from {:#x} to {:#x}",
                first.id(),
                last.id(),
                id,
                merged.len(),
                min,
                max
            );
        }

        for run in group {
            let path = run.path().to_path_buf();
            area.remove_run(run)
                .map_err(|err| SortError::io(Phase::Merge, &path, err))?;
        }

        return Ok(merged);
    }
}

/// Sorts `{data_dir}/{name}.in` into `{data_dir}/{name}.out` with a one-off sorter.
///
/// Configuration is validated before any file is touched.
///
/// # Arguments
/// * `data_dir` - Directory holding input and output files
/// * `name` - File name without suffix
/// * `file_size` - Number of input bytes to be sorted
/// * `memory_budget` - Bytes of record data held in memory at once, a positive multiple of 8
/// * `fan_in` - Maximum number of runs merged together, at least 2
pub fn sort(
    data_dir: &Path,
    name: &str,
    file_size: u64,
    memory_budget: u64,
    fan_in: usize,
) -> Result<SortStats, SortError> {
    ExternalSorterBuilder::new()
        .with_data_dir(data_dir)
        .with_memory_budget(memory_budget)
        .with_fan_in(fan_in)
        .build()?
        .sort(name, file_size)
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rand::Rng;
    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{sort, ExternalSorter, ExternalSorterBuilder, Phase, SortError, Totals};
    use crate::plan;
    use crate::run::{Run, RunId, RunKind};
    use crate::tmp::TempArea;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn write_input(dir: &Path, name: &str, values: &[u64]) -> u64 {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(dir.join(format!("{}.in", name)), &bytes).unwrap();
        bytes.len() as u64
    }

    fn read_output(dir: &Path, name: &str) -> Vec<u64> {
        let bytes = fs::read(dir.join(format!("{}.out", name))).unwrap();
        assert_eq!(bytes.len() % 8, 0);
        bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut entries: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        entries
    }

    fn write_runs(area: &TempArea, runs: &[&[u64]]) -> Vec<Run> {
        runs.iter()
            .enumerate()
            .map(|(position, values)| {
                let mut writer = area.create_run(RunId::new(0, position), RunKind::Sorted, 16).unwrap();
                for value in values.iter() {
                    writer.push(*value).unwrap();
                }
                writer.finish().unwrap()
            })
            .collect()
    }

    fn sorter(dir: &Path, memory_budget: u64, fan_in: usize) -> ExternalSorter {
        ExternalSorterBuilder::new()
            .with_data_dir(dir)
            .with_memory_budget(memory_budget)
            .with_fan_in(fan_in)
            .with_threads_number(4)
            .build()
            .unwrap()
    }

    #[rstest]
    fn test_two_blocks_one_round(tmp_dir: tempfile::TempDir) {
        let file_size = write_input(tmp_dir.path(), "data", &[5, 3, 8, 1]);

        let stats = sort(tmp_dir.path(), "data", file_size, 16, 2).unwrap();

        assert_eq!(stats.initial_runs, 2);
        assert_eq!(stats.rounds, 1);
        assert_eq!(stats.records, 4);
        assert_eq!(read_output(tmp_dir.path(), "data"), vec![1, 3, 5, 8]);
        assert_eq!(dir_entries(tmp_dir.path()), vec!["data.in", "data.out"]);
    }

    #[rstest]
    fn test_empty_input(tmp_dir: tempfile::TempDir) {
        write_input(tmp_dir.path(), "empty", &[]);

        let stats = sorter(tmp_dir.path(), 16, 2).sort("empty", 0).unwrap();

        assert_eq!(stats.initial_runs, 0);
        assert_eq!(stats.rounds, 0);
        assert_eq!(fs::metadata(tmp_dir.path().join("empty.out")).unwrap().len(), 0);
        assert_eq!(dir_entries(tmp_dir.path()), vec!["empty.in", "empty.out"]);
    }

    #[rstest]
    #[case(80)]
    #[case(1024)]
    fn test_single_block(tmp_dir: tempfile::TempDir, #[case] memory_budget: u64) {
        let input: Vec<u64> = (0..10).rev().collect();
        let file_size = write_input(tmp_dir.path(), "data", &input);

        let stats = sorter(tmp_dir.path(), memory_budget, 2).sort("data", file_size).unwrap();

        assert_eq!(stats.initial_runs, 1);
        assert_eq!(stats.rounds, 0);
        assert_eq!(read_output(tmp_dir.path(), "data"), Vec::from_iter(0..10));
    }

    #[rstest]
    #[case(1000, 64, 2)]
    #[case(1000, 64, 3)]
    #[case(1000, 800, 4)]
    #[case(4096, 256, 16)]
    #[case(257, 8, 5)]
    fn test_random_input(
        tmp_dir: tempfile::TempDir,
        #[case] records: usize,
        #[case] memory_budget: u64,
        #[case] fan_in: usize,
    ) {
        let mut rng = rand::thread_rng();
        let input: Vec<u64> = (0..records).map(|_| rng.gen()).collect();
        let file_size = write_input(tmp_dir.path(), "data", &input);

        let stats = sorter(tmp_dir.path(), memory_budget, fan_in).sort("data", file_size).unwrap();

        let block_records = (memory_budget / 8) as usize;
        let initial_runs = (records + block_records - 1) / block_records;
        assert_eq!(stats.initial_runs, initial_runs);
        assert_eq!(stats.rounds, plan::round_count(initial_runs, fan_in));

        let mut expected = input.clone();
        expected.sort();
        assert_eq!(read_output(tmp_dir.path(), "data"), expected);
        assert_eq!(dir_entries(tmp_dir.path()), vec!["data.in", "data.out"]);
    }

    #[rstest]
    fn test_output_independent_of_configuration(tmp_dir: tempfile::TempDir) {
        let mut rng = rand::thread_rng();
        // narrow value range to get plenty of duplicates
        let input: Vec<u64> = (0..600).map(|_| rng.gen_range(0..100)).collect();

        let configs = [(16, 2), (24, 3), (64, 4), (256, 7), (4800, 2), (1 << 20, 8)];
        let mut outputs = Vec::new();
        for (idx, (memory_budget, fan_in)) in configs.iter().enumerate() {
            let name = format!("data{}", idx);
            let file_size = write_input(tmp_dir.path(), &name, &input);
            sorter(tmp_dir.path(), *memory_budget, *fan_in).sort(&name, file_size).unwrap();
            outputs.push(fs::read(tmp_dir.path().join(format!("{}.out", name))).unwrap());
        }

        assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(outputs[0].len(), 600 * 8);
    }

    #[rstest]
    fn test_remainder_grouping(tmp_dir: tempfile::TempDir) {
        // 14 records with 2 records per block give 7 = 3 * 2 + 1 initial runs
        let mut input: Vec<u64> = (0..14).collect();
        input.shuffle(&mut rand::thread_rng());
        let file_size = write_input(tmp_dir.path(), "data", &input);

        let stats = sorter(tmp_dir.path(), 16, 3).sort("data", file_size).unwrap();

        assert_eq!(stats.initial_runs, 7);
        // 7 runs -> groups of 3 and 4 -> a single group of 2
        assert_eq!(stats.rounds, 2);
        assert_eq!(read_output(tmp_dir.path(), "data"), Vec::from_iter(0..14));
    }

    #[rstest]
    fn test_extreme_values(tmp_dir: tempfile::TempDir) {
        let input = vec![u64::MAX, 0, u64::MAX, 1, 0, u64::MAX - 1, 1 << 63, 7, 7];
        let file_size = write_input(tmp_dir.path(), "data", &input);

        sorter(tmp_dir.path(), 16, 2).sort("data", file_size).unwrap();

        let mut expected = input.clone();
        expected.sort();
        assert_eq!(read_output(tmp_dir.path(), "data"), expected);
    }

    #[rstest]
    #[case(0, 2)]
    #[case(12, 2)]
    #[case(1001, 4)]
    #[case(16, 1)]
    #[case(16, 0)]
    fn test_configuration_rejected(tmp_dir: tempfile::TempDir, #[case] memory_budget: u64, #[case] fan_in: usize) {
        let missing_dir = tmp_dir.path().join("missing");

        let err = sort(&missing_dir, "data", 64, memory_budget, fan_in).unwrap_err();

        assert!(err.is_config_error(), "unexpected error: {}", err);
        assert_eq!(err.phase(), None);
        assert!(dir_entries(tmp_dir.path()).is_empty());
    }

    #[rstest]
    fn test_trailing_partial_record(tmp_dir: tempfile::TempDir) {
        let mut bytes: Vec<u8> = [3u64, 2, 1].iter().flat_map(|v| v.to_le_bytes()).collect();
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(tmp_dir.path().join("data.in"), &bytes).unwrap();

        let err = sorter(tmp_dir.path(), 16, 2).sort("data", bytes.len() as u64).unwrap_err();

        match err {
            SortError::Corrupted { phase, path, trailing } => {
                assert_eq!(phase, Phase::InternalSort);
                assert_eq!(path, tmp_dir.path().join("data.in"));
                assert_eq!(trailing, 3);
            }
            err => panic!("unexpected error: {}", err),
        }
        assert_eq!(dir_entries(tmp_dir.path()), vec!["data.in"]);
    }

    #[rstest]
    fn test_missing_input(tmp_dir: tempfile::TempDir) {
        let err = sorter(tmp_dir.path(), 16, 2).sort("data", 32).unwrap_err();

        assert!(matches!(err, SortError::IO { phase: Phase::InternalSort, .. }));
        assert!(dir_entries(tmp_dir.path()).is_empty());
    }

    #[rstest]
    fn test_file_size_limits_input(tmp_dir: tempfile::TempDir) {
        write_input(tmp_dir.path(), "data", &[9, 4, 6, 1, 0]);

        let stats = sorter(tmp_dir.path(), 16, 2).sort("data", 24).unwrap();

        assert_eq!(stats.records, 3);
        assert_eq!(read_output(tmp_dir.path(), "data"), vec![4, 6, 9]);
    }

    #[rstest]
    fn test_file_size_beyond_input(tmp_dir: tempfile::TempDir) {
        write_input(tmp_dir.path(), "data", &[9, 4, 6]);

        let stats = sorter(tmp_dir.path(), 16, 2).sort("data", 80).unwrap();

        assert_eq!(stats.initial_runs, 2);
        assert_eq!(read_output(tmp_dir.path(), "data"), vec![4, 6, 9]);
    }

    #[rstest]
    fn test_sort_file(tmp_dir: tempfile::TempDir) {
        let input: Vec<u64> = (0..100).map(|x| (x * 7919) % 100).collect();
        write_input(tmp_dir.path(), "numbers", &input);
        let output_dir = tempfile::tempdir_in(tmp_dir.path()).unwrap();
        let output = output_dir.path().join("sorted.bin");

        let stats = sorter(tmp_dir.path(), 64, 3)
            .sort_file(&tmp_dir.path().join("numbers.in"), &output, None)
            .unwrap();

        assert_eq!(stats.records, 100);
        let bytes = fs::read(&output).unwrap();
        let actual: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(actual, Vec::from_iter(0..100));
        assert_eq!(dir_entries(output_dir.path()), vec!["sorted.bin"]);
    }

    #[rstest]
    fn test_custom_tmp_dir(tmp_dir: tempfile::TempDir) {
        let scratch = tempfile::tempdir_in(tmp_dir.path()).unwrap();
        let input: Vec<u64> = (0..50).rev().collect();
        let file_size = write_input(tmp_dir.path(), "data", &input);

        let sorter = ExternalSorterBuilder::new()
            .with_data_dir(tmp_dir.path())
            .with_tmp_dir(scratch.path())
            .with_memory_budget(40)
            .with_fan_in(2)
            .build()
            .unwrap();
        sorter.sort("data", file_size).unwrap();

        assert_eq!(read_output(tmp_dir.path(), "data"), Vec::from_iter(0..50));
        assert!(dir_entries(scratch.path()).is_empty());
    }

    #[rstest]
    fn test_merge_round_fails_on_short_run(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 64, 2);
        let area = TempArea::create(tmp_dir.path(), "data").unwrap();
        let area_path = area.path().to_path_buf();

        let runs = write_runs(&area, &[&[1, 2], &[3, 4], &[5, 6], &[7, 8]]);
        let short_run = runs[3].path().to_path_buf();
        fs::OpenOptions::new()
            .write(true)
            .open(&short_run)
            .unwrap()
            .set_len(8)
            .unwrap();

        match sorter.merge_round(&area, 1, runs) {
            Err(SortError::Missing { phase, path, remaining }) => {
                assert_eq!(phase, Phase::Merge);
                assert_eq!(path, short_run);
                assert_eq!(remaining, 1);
            }
            Err(err) => panic!("unexpected error: {}", err),
            Ok(runs) => panic!("merge succeeded with {} runs", runs.len()),
        }

        drop(area);
        assert!(!area_path.exists());
        assert!(!tmp_dir.path().join("data.out").exists());
    }

    #[rstest]
    fn test_merge_round_detects_changed_records(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 64, 2);
        let area = TempArea::create(tmp_dir.path(), "data").unwrap();

        let runs = write_runs(&area, &[&[1, 2], &[3, 4]]);
        // same length and still sorted, but not what the run was written with
        let replaced: Vec<u8> = [1u64, 5].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(runs[0].path(), &replaced).unwrap();

        match sorter.merge_round(&area, 1, runs) {
            Err(SortError::RoundInvariant { round, expected, actual }) => {
                assert_eq!(round, 1);
                assert_eq!(expected, Totals { records: 4, checksum: 10 });
                assert_eq!(actual, Totals { records: 4, checksum: 13 });
            }
            Err(err) => panic!("unexpected error: {}", err),
            Ok(runs) => panic!("merge succeeded with {} runs", runs.len()),
        }
    }

    #[rstest]
    fn test_failed_finalize_cleans_up(tmp_dir: tempfile::TempDir) {
        let file_size = write_input(tmp_dir.path(), "data", &[5, 3, 8, 1]);
        fs::create_dir(tmp_dir.path().join("data.out")).unwrap();

        let err = sort(tmp_dir.path(), "data", file_size, 16, 2).unwrap_err();

        assert!(matches!(err, SortError::IO { phase: Phase::Finalize, .. }), "unexpected error: {}", err);
        assert_eq!(dir_entries(tmp_dir.path()), vec!["data.in", "data.out"]);
        assert!(tmp_dir.path().join("data.out").is_dir());
    }
}
