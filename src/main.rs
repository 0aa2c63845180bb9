use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;
use std::sync::Arc;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_merge::{ExceededPolicy, MemoryRegistry, MergeEngine, MergeEngineBuilder, RecordStream};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let mode: Mode = arg_parser.value_of_t_or_exit("mode");
    let order: Order = arg_parser.value_of_t_or_exit("sort");
    let on_exceed: OnExceed = arg_parser.value_of_t_or_exit("on_exceed");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let memory = parse_size(arg_parser.value_of("memory").expect("value has default"));
    let block_size = parse_size(arg_parser.value_of("block_size").expect("value has default"));
    let seed: Option<u64> = arg_parser
        .is_present("seed")
        .then(|| arg_parser.value_of_t_or_exit("seed"));
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let input = arg_parser.value_of("input").expect("value is required");
    let input_lines = match fs::File::open(input) {
        Ok(file) => io::BufReader::new(file).lines(),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output = arg_parser.value_of("output").expect("value is required");
    let mut output_writer = match fs::File::create(output) {
        Ok(file) => io::BufWriter::new(file),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let registry = Arc::new(MemoryRegistry::new(
        memory,
        match on_exceed {
            OnExceed::Abort => ExceededPolicy::Abort,
            OnExceed::Warn => ExceededPolicy::Warn,
            OnExceed::Ignore => ExceededPolicy::Ignore,
        },
    ));

    let mut engine_builder = MergeEngineBuilder::new()
        .with_memory(registry)
        .with_block_size(block_size);
    if let Some(threads) = threads {
        engine_builder = engine_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        engine_builder = engine_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let engine = match engine_builder.build() {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("engine initialization error: {}", err);
            process::exit(1);
        }
    };

    let mut input_stream = load_input(&engine, input_lines);
    let mut output_stream: RecordStream<i64> = match engine.create_stream() {
        Ok(stream) => stream,
        Err(err) => {
            log::error!("output stream creation error: {}", err);
            process::exit(1);
        }
    };

    let result = match (mode, order) {
        (Mode::Sort, Order::Asc) => engine.sort(&mut input_stream, &mut output_stream),
        (Mode::Sort, Order::Desc) => {
            engine.sort_by(&mut input_stream, &mut output_stream, |a: &i64, b: &i64| b.cmp(a))
        }
        (Mode::Shuffle, _) => engine.shuffle(&mut input_stream, &mut output_stream, seed),
    };
    match result {
        Ok(stats) => log::info!(
            "done (records: {}, runs: {}, merge passes: {})",
            output_stream.size(),
            stats.runs,
            stats.passes
        ),
        Err(err) => {
            log::error!("data processing error: {}", err);
            process::exit(1);
        }
    }
    drop(input_stream);

    if let Err(err) = output_stream.seek(0) {
        log::error!("result stream error: {}", err);
        process::exit(1);
    }
    for item in output_stream {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                log::error!("result stream error: {}", err);
                process::exit(1);
            }
        };
        if let Err(err) = output_writer.write_all(format!("{}\n", item).as_bytes()) {
            log::error!("data saving error: {}", err);
            process::exit(1);
        };
    }

    if let Err(err) = output_writer.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }
}

fn load_input(engine: &MergeEngine, lines: io::Lines<io::BufReader<fs::File>>) -> RecordStream<i64> {
    let mut stream = match engine.create_stream() {
        Ok(stream) => stream,
        Err(err) => {
            log::error!("input stream creation error: {}", err);
            process::exit(1);
        }
    };

    for (number, line) in lines.enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::error!("input reading error: {}", err);
                process::exit(1);
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let item: i64 = match line.parse() {
            Ok(item) => item,
            Err(err) => {
                log::error!("line {}: integer expected: {}", number + 1, err);
                process::exit(1);
            }
        };
        if let Err(err) = stream.write(&item) {
            log::error!("input stream writing error: {}", err);
            process::exit(1);
        }
    }

    return stream;
}

fn parse_size(value: &str) -> usize {
    value.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize
}

fn validate_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(size) if size.as_u64() > 0 => Ok(()),
        Ok(_) => Err(String::from("size must be positive")),
        Err(err) => Err(format!("size format incorrect: {}", err)),
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

#[derive(Copy, Clone, clap::ArgEnum)]
enum Mode {
    Sort,
    Shuffle,
}

impl Mode {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Mode::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Mode as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum OnExceed {
    Abort,
    Warn,
    Ignore,
}

impl OnExceed {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        OnExceed::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for OnExceed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <OnExceed as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-merge")
        .about("external memory sorter and shuffler of integer files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file with one integer per line")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("mode")
                .short('m')
                .long("mode")
                .help("operation to perform")
                .takes_value(true)
                .default_value("sort")
                .possible_values(Mode::possible_values()),
        )
        .arg(
            clap::Arg::new("sort")
                .short('s')
                .long("sort")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
        )
        .arg(
            clap::Arg::new("seed")
                .long("seed")
                .help("shuffle random generator seed")
                .takes_value(true),
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
                .help("number of threads to use for run preparation")
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
            clap::Arg::new("memory")
                .short('M')
                .long("memory")
                .help("memory limit")
                .takes_value(true)
                .default_value("64MiB")
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("block_size")
                .short('b')
                .long("block-size")
                .help("stream block size")
                .takes_value(true)
                .default_value("64KiB")
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("on_exceed")
                .long("on-exceed")
                .help("behaviour when the memory limit is exceeded")
                .takes_value(true)
                .default_value("warn")
                .possible_values(OnExceed::possible_values()),
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
