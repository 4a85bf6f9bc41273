//! Seedscan CLI: search seed ranges, manage profiles, export matches.

use anyhow::Result;
use clap::Parser;
use seedscan::engine::arg_parser::Cli;
use seedscan::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
