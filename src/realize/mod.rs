//! Realization resolution.
//!
//! Turns a validated source-model tree (plus an optional GSIM tree) into the
//! ordered list of realizations a job computes:
//!
//! - full enumeration (`enumerate`): cartesian product honoring
//!   `applyToBranches`, weight = product of branch weights
//! - Monte-Carlo sampling (`sample`): `N` seeded draws, weighted `1/N` or
//!   left unweighted
//!
//! With two trees the source-model path varies slowest.

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::domain::{
    Filter, Realization, RealizationMode, SampleWeighting, SourceAdjustment, UncertaintyValue,
};
use crate::error::{HazardError, Result};
use crate::tree::LogicTree;

pub mod enumerate;
pub mod sample;

pub use enumerate::{TreePath, enumerate_paths};
pub use sample::{derive_seed, sample_path};

/// The realizations of one job, in ordinal order.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizationSet {
    realizations: Vec<Realization>,
}

impl RealizationSet {
    pub fn new(realizations: Vec<Realization>) -> Self {
        Self { realizations }
    }

    pub fn len(&self) -> usize {
        self.realizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realizations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Realization> {
        self.realizations.iter()
    }

    pub fn get(&self, ordinal: usize) -> Option<&Realization> {
        self.realizations.get(ordinal)
    }

    pub fn as_slice(&self) -> &[Realization] {
        &self.realizations
    }

    /// Sum of explicit weights (`None` counts as 0).
    pub fn total_weight(&self) -> f64 {
        self.realizations.iter().filter_map(|r| r.weight).sum()
    }
}

impl<'a> IntoIterator for &'a RealizationSet {
    type Item = &'a Realization;
    type IntoIter = std::slice::Iter<'a, Realization>;

    fn into_iter(self) -> Self::IntoIter {
        self.realizations.iter()
    }
}

/// Resolve the realizations of a job.
pub fn resolve(
    source: &LogicTree,
    gsim: Option<&LogicTree>,
    mode: &RealizationMode,
) -> Result<RealizationSet> {
    let realizations = match mode {
        RealizationMode::Enumerate => enumerate(source, gsim)?,
        RealizationMode::Sample {
            seed,
            count,
            weighting,
        } => sample(source, gsim, *seed, *count, *weighting)?,
    };

    info!(
        realizations = realizations.len(),
        mode = match mode {
            RealizationMode::Enumerate => "enumerate",
            RealizationMode::Sample { .. } => "sample",
        },
        "Resolved realizations"
    );
    Ok(RealizationSet::new(realizations))
}

fn enumerate(source: &LogicTree, gsim: Option<&LogicTree>) -> Result<Vec<Realization>> {
    let source_paths = enumerate_paths(source)?;
    let gsim_paths = match gsim {
        Some(tree) => enumerate_paths(tree)?,
        None => vec![TreePath::empty()],
    };

    let mut out = Vec::with_capacity(source_paths.len() * gsim_paths.len());
    for s in &source_paths {
        for g in &gsim_paths {
            let ordinal = out.len();
            out.push(build_realization(ordinal, s, g, Some(s.weight * g.weight)));
        }
    }
    Ok(out)
}

fn sample(
    source: &LogicTree,
    gsim: Option<&LogicTree>,
    seed: u64,
    count: usize,
    weighting: SampleWeighting,
) -> Result<Vec<Realization>> {
    if count == 0 {
        return Err(HazardError::SamplingConfig(
            "number of logic tree samples must be > 0".to_string(),
        ));
    }

    let weight = match weighting {
        SampleWeighting::Uniform => Some(1.0 / count as f64),
        SampleWeighting::Frequency => None,
    };

    let mut out = Vec::with_capacity(count);
    for ordinal in 0..count {
        let mut rng = StdRng::seed_from_u64(derive_seed(seed, ordinal));
        let s = sample_path(source, &mut rng)?;
        let g = match gsim {
            Some(tree) => sample_path(tree, &mut rng)?,
            None => TreePath::empty(),
        };
        out.push(build_realization(ordinal, &s, &g, weight));
    }
    Ok(out)
}

fn build_realization(
    ordinal: usize,
    source: &TreePath<'_>,
    gsim: &TreePath<'_>,
    weight: Option<f64>,
) -> Realization {
    let mut realization = Realization {
        ordinal,
        path: source.branch_ids(),
        gsim_path: gsim.branch_ids(),
        source_model: None,
        adjustments: Vec::new(),
        gsims: Default::default(),
        weight,
    };

    for (set, branch) in source.steps.iter().chain(gsim.steps.iter()) {
        match &branch.value {
            UncertaintyValue::SourceModel(name) => realization.source_model = Some(name.clone()),
            UncertaintyValue::Gsim(name) => {
                if let Some(Filter::TectonicRegionType(trt)) = &set.filter {
                    realization.gsims.insert(trt.clone(), name.clone());
                }
            }
            value => realization.adjustments.push(SourceAdjustment {
                uncertainty: set.uncertainty,
                value: value.clone(),
                filter: set.filter.clone(),
            }),
        }
    }
    realization
}
