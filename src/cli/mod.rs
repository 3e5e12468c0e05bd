//! Command-line parsing for the `hz` hazard engine.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! tree/realization/aggregation code. Every flag overrides the matching job
//! file setting; `HZ_*` environment variables (also read from `.env`) provide
//! defaults for the pool settings.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{JobConfig, RealizationMode, SampleWeighting, Weighting};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "hz", version, about = "Logic-tree seismic hazard engine")]
pub struct Cli {
    /// Log filter (`info`, `debug`, `hazard_tree=trace`, ...). Defaults to `RUST_LOG`, then `info`.
    #[arg(long, global = true, env = "HZ_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse and validate the job, its logic trees and its sources.
    Validate(JobArgs),
    /// Print the realizations a job would compute.
    Realizations(RealizationArgs),
    /// Compute hazard curves, statistics and maps.
    Run(RunArgs),
}

#[derive(Debug, Args, Clone)]
pub struct JobArgs {
    /// Job file (JSON).
    #[arg(long, value_name = "JSON")]
    pub job: PathBuf,
}

/// Overrides of the realization mode.
#[derive(Debug, Args, Clone, Default)]
pub struct SamplingArgs {
    /// Draw this many Monte-Carlo samples instead of the job's mode.
    #[arg(long)]
    pub samples: Option<usize>,

    /// Sampling seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// How sampled realizations are weighted.
    #[arg(long, value_enum)]
    pub sample_weighting: Option<SampleWeighting>,

    /// Enumerate every path, ignoring the job's sampling settings.
    #[arg(long, conflicts_with = "samples")]
    pub enumerate: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RealizationArgs {
    #[command(flatten)]
    pub job: JobArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Show at most this many rows.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub job: JobArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Maximum number of work units in flight.
    #[arg(long, env = "HZ_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Worker threads (0 = one per core).
    #[arg(long, env = "HZ_WORKERS")]
    pub workers: Option<usize>,

    /// Source items per work unit.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Quantile curves to compute (repeatable); replaces the job's list.
    #[arg(long = "quantile")]
    pub quantiles: Vec<f64>,

    /// Weighted or unweighted statistics.
    #[arg(long, value_enum)]
    pub weighting: Option<Weighting>,

    /// Also export every realization's curves.
    #[arg(long)]
    pub individual_curves: bool,

    /// Write JSON exports into this directory.
    #[arg(long)]
    pub export_dir: Option<PathBuf>,
}

impl SamplingArgs {
    /// Apply the overrides to a job's realization mode.
    pub fn apply(&self, job: &mut JobConfig) {
        if self.enumerate {
            job.realizations = RealizationMode::Enumerate;
            return;
        }
        let (seed, count, weighting) = match &job.realizations {
            RealizationMode::Sample {
                seed,
                count,
                weighting,
            } => (Some(*seed), Some(*count), *weighting),
            RealizationMode::Enumerate => (None, None, SampleWeighting::default()),
        };
        let count = self.samples.or(count);
        if let Some(count) = count {
            job.realizations = RealizationMode::Sample {
                seed: self.seed.or(seed).unwrap_or(DEFAULT_SEED),
                count,
                weighting: self.sample_weighting.unwrap_or(weighting),
            };
        }
    }
}

/// Seed used when sampling is requested without one.
pub const DEFAULT_SEED: u64 = 42;

impl RunArgs {
    /// Apply every override to a job.
    pub fn apply(&self, job: &mut JobConfig) {
        self.sampling.apply(job);
        if let Some(c) = self.concurrency {
            job.concurrency = c;
        }
        if let Some(w) = self.workers {
            job.workers = w;
        }
        if let Some(b) = self.batch_size {
            job.batch_size = b;
        }
        if !self.quantiles.is_empty() {
            job.statistics.quantiles = self.quantiles.clone();
        }
        if let Some(w) = self.weighting {
            job.statistics.weighting = w;
        }
        if self.individual_curves {
            job.statistics.individual_curves = true;
        }
        if let Some(dir) = &self.export_dir {
            job.export_dir = Some(dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobConfig {
        serde_json::from_str(
            r#"{
                "source_model_logic_tree": "sm.json",
                "synthetic_sources": {"tectonic_region_types": ["ASC"], "bbox": [0, 0, 1, 1]},
                "grid": {"sites": [{"lon": 0.5, "lat": 0.5}], "imts": {"PGA": [0.1]}},
                "realizations": {"mode": "enumerate"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn run_flags_override_the_job() {
        let cli = Cli::try_parse_from([
            "hz",
            "run",
            "--job",
            "job.json",
            "--samples",
            "25",
            "--concurrency",
            "3",
            "--quantile",
            "0.15",
            "--quantile",
            "0.85",
            "--weighting",
            "unweighted",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut job = job();
        args.apply(&mut job);
        assert_eq!(
            job.realizations,
            RealizationMode::Sample {
                seed: DEFAULT_SEED,
                count: 25,
                weighting: SampleWeighting::Uniform
            }
        );
        assert_eq!(job.concurrency, 3);
        assert_eq!(job.statistics.quantiles, vec![0.15, 0.85]);
        assert_eq!(job.statistics.weighting, Weighting::Unweighted);
    }

    #[test]
    fn seed_alone_keeps_enumeration() {
        let args = SamplingArgs {
            seed: Some(7),
            ..SamplingArgs::default()
        };
        let mut job = job();
        args.apply(&mut job);
        assert_eq!(job.realizations, RealizationMode::Enumerate);
    }

    #[test]
    fn enumerate_flag_replaces_sampling() {
        let mut job = job();
        job.realizations = RealizationMode::Sample {
            seed: 1,
            count: 5,
            weighting: SampleWeighting::Frequency,
        };
        let args = SamplingArgs {
            enumerate: true,
            ..SamplingArgs::default()
        };
        args.apply(&mut job);
        assert_eq!(job.realizations, RealizationMode::Enumerate);
    }

    #[test]
    fn enumerate_conflicts_with_samples() {
        assert!(
            Cli::try_parse_from([
                "hz",
                "realizations",
                "--job",
                "j.json",
                "--enumerate",
                "--samples",
                "3"
            ])
            .is_err()
        );
    }
}
