//! Work units and the collaborators that produce and compute them.
//!
//! - [`WorkSource`] turns a realization into a lazy [`WorkStream`] of
//!   [`WorkUnit`]s (batches of source items with the realization's branch
//!   adjustments already applied)
//! - [`Worker`] computes the partial PoE curves of one unit
//! - [`CompletionSignal`] carries the outcome back to the coordinator
//!
//! Batching is deterministic: the same realization and batch size always yield
//! the same units in the same order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::domain::{
    Imt, Realization, SourceAdjustment, SourceItem, UncertaintyType, UncertaintyValue,
};
use crate::error::{HazardError, Result};

pub mod poisson;

pub use poisson::{PoissonWorker, default_models};

/// Partial PoE curves of one work unit, one `sites × levels` matrix per IMT.
pub type PartialCurves = BTreeMap<Imt, DMatrix<f64>>;

/// Why a worker could not compute a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFailure {
    pub message: String,
}

impl WorkerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A dispatchable batch of sources belonging to one realization.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub realization: usize,
    pub batch: Vec<SourceItem>,
    /// Ground-motion model per tectonic region type for this realization.
    pub gsims: Arc<BTreeMap<String, String>>,
}

impl WorkUnit {
    /// Number of source items; this is what the unit contributes to progress.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Outcome of one dispatched unit. Exactly one per dispatch.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    pub realization: usize,
    pub units_completed: usize,
    pub payload: std::result::Result<PartialCurves, WorkerFailure>,
}

/// Computes the partial curves of a work unit.
///
/// Workers are stateless with respect to the job: they never see the
/// accumulated curves.
pub trait Worker: Send + Sync {
    fn compute(&self, unit: &WorkUnit) -> std::result::Result<PartialCurves, WorkerFailure>;
}

/// Produces the work of a realization.
pub trait WorkSource {
    fn open(&self, realization: &Realization) -> Result<WorkStream>;
}

/// Lazy sequence of the work units of one realization.
#[derive(Debug, Clone)]
pub struct WorkStream {
    realization: usize,
    items: Vec<SourceItem>,
    gsims: Arc<BTreeMap<String, String>>,
    batch_size: usize,
    cursor: usize,
}

impl WorkStream {
    pub fn new(
        realization: usize,
        items: Vec<SourceItem>,
        gsims: BTreeMap<String, String>,
        batch_size: usize,
    ) -> Self {
        Self {
            realization,
            items,
            gsims: Arc::new(gsims),
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }

    pub fn realization(&self) -> usize {
        self.realization
    }

    /// Source items the realization has in total (the progress target).
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Units not yet pulled.
    pub fn remaining_units(&self) -> usize {
        (self.items.len() - self.cursor).div_ceil(self.batch_size)
    }
}

impl Iterator for WorkStream {
    type Item = WorkUnit;

    fn next(&mut self) -> Option<WorkUnit> {
        if self.cursor >= self.items.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.items.len());
        let batch = self.items[self.cursor..end].to_vec();
        self.cursor = end;
        Some(WorkUnit {
            realization: self.realization,
            batch,
            gsims: Arc::clone(&self.gsims),
        })
    }
}

impl std::iter::FusedIterator for WorkStream {}

/// [`WorkSource`] over in-memory source models, split into fixed-size batches.
#[derive(Debug, Clone)]
pub struct BatchedWorkSource {
    models: BTreeMap<String, Arc<Vec<SourceItem>>>,
    batch_size: usize,
}

impl BatchedWorkSource {
    pub fn new(models: BTreeMap<String, Vec<SourceItem>>, batch_size: usize) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|(name, items)| (name, Arc::new(items)))
                .collect(),
            batch_size: batch_size.max(1),
        }
    }

    fn model_for(&self, realization: &Realization) -> Result<&Arc<Vec<SourceItem>>> {
        let found = match &realization.source_model {
            Some(name) => self.models.get(name),
            // A tree without a source-model level only makes sense with one model.
            None if self.models.len() == 1 => self.models.values().next(),
            None => None,
        };
        found.ok_or_else(|| {
            HazardError::validation(
                "work source",
                format!("realization {}", realization.ordinal),
                match &realization.source_model {
                    Some(name) => format!("no sources loaded for source model '{name}'"),
                    None => "realization names no source model and several are loaded".to_string(),
                },
            )
        })
    }
}

impl WorkSource for BatchedWorkSource {
    fn open(&self, realization: &Realization) -> Result<WorkStream> {
        let base = self.model_for(realization)?;
        let mut items: Vec<SourceItem> = base.as_ref().clone();
        for item in &mut items {
            for adjustment in &realization.adjustments {
                apply_adjustment(item, adjustment);
            }
            if item.max_magnitude < item.min_magnitude {
                return Err(HazardError::validation(
                    "work source",
                    format!("realization {} source '{}'", realization.ordinal, item.id),
                    format!(
                        "adjusted maximum magnitude {} is below the minimum {}",
                        item.max_magnitude, item.min_magnitude
                    ),
                ));
            }
        }
        Ok(WorkStream::new(
            realization.ordinal,
            items,
            realization.gsims.clone(),
            self.batch_size,
        ))
    }
}

/// Apply one branch adjustment to a source if the branch set's filter selects it.
pub fn apply_adjustment(item: &mut SourceItem, adjustment: &SourceAdjustment) {
    if let Some(filter) = &adjustment.filter {
        if !filter.matches(item) {
            return;
        }
    }
    match (adjustment.uncertainty, &adjustment.value) {
        (UncertaintyType::MaxMagGrRelative, UncertaintyValue::Relative(d)) => {
            item.max_magnitude += d
        }
        (UncertaintyType::BGrRelative, UncertaintyValue::Relative(d)) => item.b_value += d,
        (UncertaintyType::MaxMagGrAbsolute, UncertaintyValue::Absolute(v)) => {
            item.max_magnitude = *v
        }
        (UncertaintyType::AbGrAbsolute, UncertaintyValue::AbsolutePair(a, b)) => {
            item.a_value = *a;
            item.b_value = *b;
        }
        _ => {}
    }
}
