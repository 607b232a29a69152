//! Convert OWAMP raw records into one-way delays
//!
//! Prints `[send_secs] Delay: S.UUUUUU` for each record so wire-level
//! measurements can be lined up with kernel-side hop latencies.

use anyhow::{Context, Result};
use clap::Parser;
use hop_latency::owamp::OwampRecord;
use log::warn;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
};

/// One-way delays from OWAMP raw records
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// File of raw OWAMP records
    records: PathBuf,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    let file = File::open(&args.records)
        .with_context(|| format!("Failed to open {:?}", args.records))?;
    let mut out = io::stdout().lock();

    for line in BufReader::new(file).lines() {
        let line = line.context("Failed to read records")?;
        if line.trim().is_empty() {
            continue;
        }

        let record = OwampRecord::parse(&line)?;
        match record.delay() {
            Some(delay) => writeln!(out, "[{}] Delay: {}", record.send_secs(), delay)?,
            None => warn!("Record {} received before it was sent, skipped", record.seq),
        }
    }

    Ok(())
}
