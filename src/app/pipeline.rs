//! Shared job pipeline used by every subcommand.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! job -> sources/catalog -> trees -> realizations -> scheduled work ->
//! finalized curves -> statistics -> maps -> exports
//!
//! The CLI can then focus on presentation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::aggregate::{Aggregator, FinalizedRealization};
use crate::domain::{
    AttenuationModel, Filter, JobConfig, SourceItem, StatisticKind, TreeKind, UncertaintyValue,
};
use crate::error::AppError;
use crate::io::{Exporter, RealizationInfo, read_sources, read_tree_document};
use crate::realize::{RealizationSet, resolve};
use crate::schedule::{PoolTransport, ScheduleSummary, Scheduler};
use crate::stats::{HazardMap, StatisticCurves, compute_statistics, hazard_maps};
use crate::tree::{LogicTree, SourceCatalog, TreeDocument, parse};
use crate::work::{BatchedWorkSource, PoissonWorker, WorkSource, WorkStream, default_models};

/// A job whose inputs are loaded and validated.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub job: JobConfig,
    pub source_tree: LogicTree,
    pub gsim_tree: Option<LogicTree>,
    pub sources: BTreeMap<String, Vec<SourceItem>>,
    pub catalog: SourceCatalog,
    pub gsim_models: BTreeMap<String, AttenuationModel>,
}

/// All computed outputs of a single `hz run`.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub realizations: RealizationSet,
    pub finalized: Vec<FinalizedRealization>,
    pub statistics: Vec<StatisticCurves>,
    /// Hazard maps per curve set label (`mean`, `quantile-0.85`, ...).
    pub maps: Vec<(String, Vec<HazardMap>)>,
    pub schedule: ScheduleSummary,
    pub exported: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Load sources and trees and run every check that precedes dispatch.
pub fn prepare(job: JobConfig) -> Result<PreparedJob, AppError> {
    job.validate()?;

    let source_doc = read_tree_document(&job.source_model_logic_tree)?;
    expect_kind(&source_doc, TreeKind::SourceModel)?;

    let sources = match (&job.sources, &job.synthetic_sources) {
        (Some(path), _) => read_sources(path)?,
        (None, Some(synthetic)) => {
            crate::data::generate_sources(synthetic, &source_doc.source_model_names())?
        }
        (None, None) => return Err(AppError::new(2, "Invalid job: no sources configured")),
    };
    let catalog = SourceCatalog::from_sources(&sources);

    let source_tree = parse(&source_doc, &catalog)?;
    let gsim_tree = match &job.gsim_logic_tree {
        Some(path) => {
            let doc = read_tree_document(path)?;
            expect_kind(&doc, TreeKind::Gsim)?;
            Some(parse(&doc, &catalog)?)
        }
        None => None,
    };

    let gsim_models = if job.gsim_models.is_empty() {
        default_models()
    } else {
        job.gsim_models.clone()
    };
    if let Some(tree) = &gsim_tree {
        check_gsim_names(tree, &gsim_models)?;
    }
    let used_models = source_doc.source_model_names();
    let inventory = catalog.union_of(used_models.iter().map(String::as_str));
    check_gsim_coverage(
        &inventory.tectonic_region_types,
        gsim_tree.as_ref(),
        default_gsim(&job, &gsim_models).as_deref(),
    )?;

    info!(
        source_models = sources.len(),
        source_branches = source_tree.n_branches(),
        gsim_branches = gsim_tree.as_ref().map(|t| t.n_branches()).unwrap_or(0),
        "Job prepared"
    );
    Ok(PreparedJob {
        job,
        source_tree,
        gsim_tree,
        sources,
        catalog,
        gsim_models,
    })
}

fn expect_kind(doc: &TreeDocument, kind: TreeKind) -> Result<(), AppError> {
    if doc.kind != kind {
        return Err(AppError::new(
            2,
            format!(
                "Logic tree '{}' has kind {:?}, expected {:?}",
                doc.name, doc.kind, kind
            ),
        ));
    }
    Ok(())
}

fn check_gsim_names(
    tree: &LogicTree,
    models: &BTreeMap<String, AttenuationModel>,
) -> Result<(), AppError> {
    for set in tree.branch_sets() {
        for branch in &set.branches {
            if let UncertaintyValue::Gsim(name) = &branch.value {
                if !models.contains_key(name) {
                    return Err(AppError::new(
                        2,
                        format!(
                            "Branch '{}' of '{}' names unknown ground-motion model '{name}'",
                            branch.id,
                            tree.name()
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Every tectonic region type with sources needs a GSIM branch set or a default model.
fn check_gsim_coverage(
    trts: &BTreeSet<String>,
    gsim_tree: Option<&LogicTree>,
    default: Option<&str>,
) -> Result<(), AppError> {
    if default.is_some() {
        return Ok(());
    }
    let claimed: BTreeSet<&str> = gsim_tree
        .into_iter()
        .flat_map(|tree| tree.branch_sets())
        .filter_map(|set| match &set.filter {
            Some(Filter::TectonicRegionType(trt)) => Some(trt.as_str()),
            _ => None,
        })
        .collect();
    let missing: Vec<&str> = trts
        .iter()
        .map(String::as_str)
        .filter(|trt| !claimed.contains(trt))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::new(
            2,
            format!(
                "No ground-motion model for tectonic region type(s) {}: add a gmpeModel branch set or set default_gsim",
                missing
                    .iter()
                    .map(|t| format!("'{t}'"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    }
    Ok(())
}

/// Resolve the realizations of a prepared job.
pub fn realizations(prepared: &PreparedJob) -> Result<RealizationSet, AppError> {
    Ok(resolve(
        &prepared.source_tree,
        prepared.gsim_tree.as_ref(),
        &prepared.job.realizations,
    )?)
}

/// Execute the full hazard pipeline and return the computed outputs.
pub fn run_job(prepared: &PreparedJob) -> Result<RunOutput, AppError> {
    let started = Instant::now();
    let job = &prepared.job;

    // 1) Realizations and their work.
    let realizations = realizations(prepared)?;
    let work_source = BatchedWorkSource::new(prepared.sources.clone(), job.batch_size);
    let mut aggregator = Aggregator::new(job.grid.clone());
    let mut streams: Vec<WorkStream> = Vec::with_capacity(realizations.len());
    for realization in &realizations {
        let stream = work_source.open(realization)?;
        aggregator.register(realization, stream.total());
        streams.push(stream);
    }

    // 2) Scheduled computation.
    let worker = PoissonWorker::new(
        job.grid.clone(),
        prepared.gsim_models.clone(),
        default_gsim(job, &prepared.gsim_models),
        job.investigation_time,
    );
    let transport = PoolTransport::new(Arc::new(worker), job.workers, job.concurrency)?;
    info!(threads = transport.threads(), "Worker pool started");
    let mut scheduler = Scheduler::new(transport, job.concurrency, streams);
    let schedule = scheduler.run(&mut aggregator)?;
    let finalized = aggregator.into_finalized();

    // 3) Statistics and maps.
    let statistics = compute_requested_statistics(job, &finalized)?;
    let mut maps = Vec::new();
    if !job.poes.is_empty() {
        for stat in &statistics {
            maps.push((
                stat.kind.label(),
                hazard_maps(&stat.curves, &job.grid, &job.poes),
            ));
        }
        if statistics.is_empty() {
            if let [only] = finalized.as_slice() {
                maps.push((
                    realization_kind(only.realization),
                    hazard_maps(&only.curves, &job.grid, &job.poes),
                ));
            }
        }
    }

    // 4) Optional exports.
    let exported = match &job.export_dir {
        Some(dir) => export(prepared, &realizations, &finalized, &statistics, &maps, dir)?,
        None => Vec::new(),
    };

    Ok(RunOutput {
        realizations,
        finalized,
        statistics,
        maps,
        schedule,
        exported,
        elapsed: started.elapsed(),
    })
}

/// The GSIM applied to regions no GSIM branch covers.
fn default_gsim(job: &JobConfig, models: &BTreeMap<String, AttenuationModel>) -> Option<String> {
    job.default_gsim.clone().or_else(|| {
        if models.len() == 1 {
            models.keys().next().cloned()
        } else {
            None
        }
    })
}

fn compute_requested_statistics(
    job: &JobConfig,
    finalized: &[FinalizedRealization],
) -> Result<Vec<StatisticCurves>, AppError> {
    let config = &job.statistics;
    let mut kinds = Vec::new();
    if config.mean {
        kinds.push(StatisticKind::Mean);
    }
    kinds.extend(config.quantiles.iter().map(|&q| StatisticKind::Quantile(q)));
    if kinds.is_empty() {
        return Ok(Vec::new());
    }
    if finalized.len() == 1 {
        warn!("Statistics over a single realization equal its own curves");
    }
    kinds
        .into_iter()
        .map(|kind| Ok(compute_statistics(finalized, kind, config.weighting)?))
        .collect()
}

fn realization_kind(ordinal: usize) -> String {
    format!("rlz-{ordinal:04}")
}

fn export(
    prepared: &PreparedJob,
    realizations: &RealizationSet,
    finalized: &[FinalizedRealization],
    statistics: &[StatisticCurves],
    maps: &[(String, Vec<HazardMap>)],
    dir: &std::path::Path,
) -> Result<Vec<PathBuf>, AppError> {
    let job = &prepared.job;
    let mut exporter = Exporter::new(dir, job.investigation_time)?;

    if job.statistics.individual_curves || statistics.is_empty() {
        for f in finalized {
            let info = realizations.get(f.realization).map(|r| RealizationInfo {
                ordinal: r.ordinal,
                label: r.label(),
                weight: r.weight,
            });
            exporter.write_curves(&realization_kind(f.realization), info, &job.grid, &f.curves)?;
        }
    }
    for stat in statistics {
        exporter.write_curves(&stat.kind.label(), None, &job.grid, &stat.curves)?;
    }
    for (kind, set) in maps {
        exporter.write_maps(kind, &job.grid, set)?;
    }

    info!(files = exporter.written().len(), dir = %dir.display(), "Exports written");
    Ok(exporter.written().to_vec())
}
