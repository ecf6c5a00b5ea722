//! dlt-sort CLI
//!
//! Command-line front-end for the dlt-sort-core library: parses DLT log
//! files, reconstructs per-ECU lifecycles, aligns them on a common wall
//! clock and writes the merged, time-sorted stream back out.

use anyhow::Result;
use clap::Parser;
use dlt_sort_core::{OutputOptions, SortConfig, Sorter, DEFAULT_OUTPUT_TEMPLATE};
use std::path::PathBuf;

/// Sort DLT log files by reconstructed ECU lifecycles
#[derive(Parser, Debug)]
#[command(name = "dlt-sort")]
#[command(about = "Sort DLT logs into a coherent, time-ordered stream", long_about = None)]
#[command(version)]
struct Args {
    /// DLT input file(s)
    #[arg(value_name = "FILE", required = true)]
    input: Vec<PathBuf>,

    /// Write one output file per detected overall lifecycle
    #[arg(short, long)]
    split: bool,

    /// Output filename template; with --split a three-digit sequence number
    /// is inserted before the .dlt suffix
    #[arg(short, long, value_name = "NAME", default_value = DEFAULT_OUTPUT_TEMPLATE)]
    file: String,

    /// Rewrite storage-header times with the reconstructed absolute times
    #[arg(short, long)]
    timestamps: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    log::info!("dlt-sort v{}", env!("CARGO_PKG_VERSION"));
    log::info!("using core library v{}", dlt_sort_core::VERSION);
    if args.split {
        log::debug!("splitting output files by overall lifecycle");
    }

    let mut sorter = Sorter::new(SortConfig::new());

    // a bad file must not abort the run, but it must show in the exit code
    let mut open_failures = 0usize;
    for input in &args.input {
        if let Err(e) = sorter.ingest_file(input) {
            log::error!("cannot open {} for input: {}", input.display(), e);
            open_failures += 1;
        }
    }

    sorter.sort();

    let opts = OutputOptions::new()
        .with_file_template(&args.file)
        .with_split(args.split)
        .with_rewrite_timestamps(args.timestamps);
    let stats = sorter.write_output(&opts)?;
    log::info!(
        "done: {} message(s) in {} output file(s)",
        stats.messages,
        stats.files
    );

    if open_failures > 0 {
        anyhow::bail!("{} input file(s) could not be opened", open_failures);
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
