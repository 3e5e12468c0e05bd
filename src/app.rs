//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - loads and validates the job
//! - resolves realizations
//! - runs the scheduled computation and statistics
//! - prints reports and writes optional exports

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, JobArgs, RealizationArgs, RunArgs};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `hz` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Command::Validate(args) => handle_validate(args),
        Command::Realizations(args) => handle_realizations(args),
        Command::Run(args) => handle_run(args),
    }
}

/// Logs go to stderr so reports on stdout stay pipeable.
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_validate(args: JobArgs) -> Result<(), AppError> {
    let job = crate::io::load_job(&args.job)?;
    let prepared = pipeline::prepare(job)?;

    println!("{}", crate::report::format_tree_summary(&prepared.source_tree));
    if let Some(tree) = &prepared.gsim_tree {
        println!("{}", crate::report::format_tree_summary(tree));
    }
    println!(
        "Job OK: {} source models, {} sources",
        prepared.sources.len(),
        prepared.sources.values().map(Vec::len).sum::<usize>()
    );
    Ok(())
}

fn handle_realizations(args: RealizationArgs) -> Result<(), AppError> {
    let mut job = crate::io::load_job(&args.job.job)?;
    args.sampling.apply(&mut job);
    let prepared = pipeline::prepare(job)?;
    let set = pipeline::realizations(&prepared)?;

    println!("{}", crate::report::format_realizations(&set, args.limit));
    Ok(())
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let mut job = crate::io::load_job(&args.job.job)?;
    args.apply(&mut job);
    debug!(
        realizations = ?job.realizations,
        concurrency = job.concurrency,
        batch_size = job.batch_size,
        "Effective job settings"
    );
    let prepared = pipeline::prepare(job)?;
    let run = pipeline::run_job(&prepared)?;

    let job = &prepared.job;
    println!(
        "{}",
        crate::report::format_run_summary(job, &run.realizations, &run.schedule, run.elapsed)
    );
    println!(
        "{}",
        crate::report::format_statistics(&job.grid, &run.statistics, &run.maps)
    );
    for path in &run.exported {
        println!("wrote {}", path.display());
    }
    Ok(())
}
