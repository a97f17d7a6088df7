use std::fs;
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use u64_ext_sort::{verify_sorted, ExternalSorter, ExternalSorterBuilder};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let data_dir = arg_parser.value_of("data_dir").expect("value has default");
    let name = arg_parser.value_of("name").expect("value is required");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let memory = arg_parser.value_of("memory").expect("value is required");
    let fan_in: usize = arg_parser.value_of_t_or_exit("fan_in");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let file_size: Option<u64> = arg_parser
        .value_of("file_size")
        .map(|v| v.parse::<ByteSize>().expect("value is pre-validated").as_u64());

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_data_dir(path::Path::new(data_dir))
        .with_memory_budget(memory.parse::<ByteSize>().expect("value is pre-validated").as_u64())
        .with_fan_in(fan_in);

    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let sorter: ExternalSorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let file_size = match file_size {
        Some(file_size) => file_size,
        None => match fs::metadata(sorter.input_path(name)) {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                log::error!("input file {} error: {}", sorter.input_path(name).display(), err);
                process::exit(1);
            }
        },
    };

    let stats = match sorter.sort(name, file_size) {
        Ok(stats) => stats,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };
    log::info!(
        "{} records sorted ({} initial runs, {} merge rounds)",
        stats.records,
        stats.initial_runs,
        stats.rounds
    );

    if arg_parser.is_present("verify") {
        let output = sorter.output_path(name);
        match verify_sorted(&output) {
            Ok(totals) if totals.records == stats.records => {
                log::info!("{} verified: {}", output.display(), totals)
            }
            Ok(totals) => {
                log::error!(
                    "{} holds {} records, {} expected",
                    output.display(),
                    totals.records,
                    stats.records
                );
                process::exit(1);
            }
            Err(err) => {
                log::error!("{} verification error: {}", output.display(), err);
                process::exit(1);
            }
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_byte_size(v: &str) -> Result<(), String> {
    match v.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("u64-ext-sort")
        .about("external sorter of binary little-endian u64 files")
        .arg(
            clap::Arg::new("data_dir")
                .short('D')
                .long("data-dir")
                .help("directory holding {name}.in and {name}.out files")
                .takes_value(true)
                .default_value("./data"),
        )
        .arg(
            clap::Arg::new("name")
                .short('n')
                .long("name")
                .help("name of the file to be sorted, without suffix")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("memory budget, a multiple of 8 bytes")
                .required(true)
                .takes_value(true)
                .validator(validate_byte_size),
        )
        .arg(
            clap::Arg::new("fan_in")
                .short('k')
                .long("fan-in")
                .help("maximum number of runs merged together")
                .takes_value(true)
                .default_value("8"),
        )
        .arg(
            clap::Arg::new("file_size")
                .short('s')
                .long("file-size")
                .help("number of input bytes to be sorted (default: whole file)")
                .takes_value(true)
                .validator(validate_byte_size),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting and merging")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("verify")
                .long("verify")
                .help("check the output order after sorting"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
