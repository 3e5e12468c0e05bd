//! Single-writer accumulation of partial curves.
//!
//! Every realization owns one all-zero `sites × levels` curve per IMT and a
//! [`ProgressCounter`]. Partial results are folded in with
//! `new = 1 − (1 − old)(1 − partial)`, which is commutative, associative and
//! has `0` as identity, so the final curves do not depend on completion order
//! or batching.
//!
//! Only the coordinator calls into the [`Aggregator`]; it needs no locking.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use tracing::debug;

use crate::domain::{HazardGrid, Imt, Realization};
use crate::error::{HazardError, Result};
use crate::work::PartialCurves;

/// Accumulated curves of one realization, one matrix per IMT.
pub type AggregateCurves = BTreeMap<Imt, DMatrix<f64>>;

/// OR-combination of two independent exceedance probabilities.
///
/// Written as `old + partial − old·partial`, which equals
/// `1 − (1 − old)(1 − partial)` and keeps `combine(x, 0) == x` exact.
pub fn combine(old: f64, partial: f64) -> f64 {
    old + partial - old * partial
}

/// Fold `partial` into `acc` cell by cell. Shapes must match.
pub fn combine_into(acc: &mut DMatrix<f64>, partial: &DMatrix<f64>) {
    for (a, p) in acc.iter_mut().zip(partial.iter()) {
        *a = combine(*a, *p);
    }
}

/// Completed versus expected source items of one realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressCounter {
    total: usize,
    completed: usize,
    complete: bool,
}

impl ProgressCounter {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            complete: total == 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fails if `increment` cannot be applied; never mutates.
    pub fn check(&self, realization: usize, increment: usize) -> Result<()> {
        if self.complete || self.completed + increment > self.total {
            return Err(HazardError::ProgressOverrun {
                realization,
                completed: self.completed,
                increment,
                total: self.total,
                already_complete: self.complete,
            });
        }
        Ok(())
    }

    /// Advance by `increment`; returns `true` when this call completed the counter.
    pub fn advance(&mut self, realization: usize, increment: usize) -> Result<bool> {
        self.check(realization, increment)?;
        self.completed += increment;
        if self.completed == self.total {
            self.complete = true;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Frozen curves of a realization whose work is done.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedRealization {
    pub realization: usize,
    pub weight: Option<f64>,
    pub curves: AggregateCurves,
}

#[derive(Debug)]
struct Entry {
    weight: Option<f64>,
    progress: ProgressCounter,
    curves: AggregateCurves,
}

#[derive(Debug)]
pub struct Aggregator {
    grid: HazardGrid,
    entries: BTreeMap<usize, Entry>,
    finalized: Vec<FinalizedRealization>,
}

impl Aggregator {
    pub fn new(grid: HazardGrid) -> Self {
        Self {
            grid,
            entries: BTreeMap::new(),
            finalized: Vec::new(),
        }
    }

    fn zero_curves(&self) -> AggregateCurves {
        self.grid
            .imts
            .iter()
            .map(|(imt, levels)| (imt.clone(), DMatrix::zeros(self.grid.n_sites(), levels.len())))
            .collect()
    }

    /// Start tracking a realization expecting `total` source items.
    ///
    /// A realization without work is finalized immediately with all-zero curves.
    pub fn register(&mut self, realization: &Realization, total: usize) {
        let entry = Entry {
            weight: realization.weight,
            progress: ProgressCounter::new(total),
            curves: self.zero_curves(),
        };
        let id = realization.ordinal;
        if entry.progress.is_complete() {
            self.freeze(id, entry.weight, entry.curves.clone());
        }
        self.entries.insert(id, entry);
    }

    fn entry_mut(&mut self, realization: usize, increment: usize) -> Result<&mut Entry> {
        self.entries
            .get_mut(&realization)
            .ok_or(HazardError::ProgressOverrun {
                realization,
                completed: 0,
                increment,
                total: 0,
                already_complete: false,
            })
    }

    /// Fold one partial curve into a realization's accumulator.
    pub fn apply(
        &mut self,
        realization: usize,
        imt: &Imt,
        partial: &DMatrix<f64>,
    ) -> Result<&DMatrix<f64>> {
        validate_partial(realization, imt, partial, self.grid.shape(imt))?;
        let entry = self.entry_mut(realization, 0)?;
        if entry.progress.is_complete() {
            return Err(HazardError::ProgressOverrun {
                realization,
                completed: entry.progress.completed(),
                increment: 0,
                total: entry.progress.total(),
                already_complete: true,
            });
        }
        let acc = entry
            .curves
            .get_mut(imt)
            .ok_or_else(|| HazardError::worker(realization, format!("unknown IMT '{imt}'")))?;
        combine_into(acc, partial);
        Ok(&*acc)
    }

    /// Handle a successful completion signal.
    ///
    /// Progress and payload are checked before anything is mutated. Returns
    /// `true` if the signal completed the realization.
    pub fn record(
        &mut self,
        realization: usize,
        units_completed: usize,
        partial: &PartialCurves,
    ) -> Result<bool> {
        self.entry_mut(realization, units_completed)?
            .progress
            .check(realization, units_completed)?;
        for (imt, curve) in partial {
            validate_partial(realization, imt, curve, self.grid.shape(imt))?;
        }

        let entry = self.entry_mut(realization, units_completed)?;
        for (imt, curve) in partial {
            if let Some(acc) = entry.curves.get_mut(imt) {
                combine_into(acc, curve);
            }
        }
        let done = entry.progress.advance(realization, units_completed)?;
        if done {
            let weight = entry.weight;
            let curves = std::mem::take(&mut entry.curves);
            self.freeze(realization, weight, curves);
        }
        Ok(done)
    }

    fn freeze(&mut self, realization: usize, weight: Option<f64>, curves: AggregateCurves) {
        debug!(realization, "Realization finalized");
        self.finalized.push(FinalizedRealization {
            realization,
            weight,
            curves,
        });
    }

    pub fn progress(&self, realization: usize) -> Option<ProgressCounter> {
        self.entries.get(&realization).map(|e| e.progress)
    }

    /// Current accumulator of a realization still in progress.
    pub fn curves(&self, realization: usize) -> Option<&AggregateCurves> {
        self.entries
            .get(&realization)
            .filter(|e| !e.progress.is_complete())
            .map(|e| &e.curves)
    }

    /// Finalized realizations, in completion order.
    pub fn finalized(&self) -> &[FinalizedRealization] {
        &self.finalized
    }

    /// Finalized realizations sorted by ordinal.
    pub fn into_finalized(self) -> Vec<FinalizedRealization> {
        let mut out = self.finalized;
        out.sort_by_key(|f| f.realization);
        out
    }

    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !e.progress.is_complete())
            .count()
    }
}

fn validate_partial(
    realization: usize,
    imt: &Imt,
    partial: &DMatrix<f64>,
    expected: Option<(usize, usize)>,
) -> Result<()> {
    let Some(shape) = expected else {
        return Err(HazardError::worker(
            realization,
            format!("partial curve for unknown IMT '{imt}'"),
        ));
    };
    if partial.shape() != shape {
        return Err(HazardError::worker(
            realization,
            format!(
                "partial curve for {imt} has shape {:?}, expected {shape:?}",
                partial.shape()
            ),
        ));
    }
    if let Some(bad) = partial.iter().find(|v| !(0.0..=1.0).contains(*v)) {
        return Err(HazardError::worker(
            realization,
            format!("partial curve for {imt} holds {bad}, outside [0, 1]"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::domain::Location;

    fn grid() -> HazardGrid {
        let mut imts = BTreeMap::new();
        imts.insert(Imt::new("PGA"), vec![0.1, 0.2]);
        HazardGrid {
            sites: vec![Location { lon: 0.0, lat: 0.0 }],
            imts,
        }
    }

    fn realization(ordinal: usize) -> Realization {
        Realization {
            ordinal,
            path: vec![format!("b{ordinal}")],
            gsim_path: Vec::new(),
            source_model: None,
            adjustments: Vec::new(),
            gsims: BTreeMap::new(),
            weight: Some(0.5),
        }
    }

    fn partial(v: f64) -> PartialCurves {
        let mut out = BTreeMap::new();
        out.insert(Imt::new("PGA"), DMatrix::from_element(1, 2, v));
        out
    }

    #[test]
    fn combining_point_one_and_point_two_gives_point_two_eight() {
        assert!((combine(combine(0.0, 0.1), 0.2) - 0.28).abs() < 1e-12);
        assert!((combine(combine(0.0, 0.2), 0.1) - 0.28).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn combination_is_order_independent(a in 0.0f64..=1.0, b in 0.0f64..=1.0, c in 0.0f64..=1.0) {
            let left = combine(combine(a, b), c);
            let right = combine(combine(a, c), b);
            prop_assert!((left - right).abs() < 1e-12);
            prop_assert!((combine(a, combine(b, c)) - left).abs() < 1e-12);
            prop_assert!((combine(a, b) - combine(b, a)).abs() < 1e-15);
        }

        #[test]
        fn zero_is_the_identity(a in 0.0f64..=1.0) {
            prop_assert_eq!(combine(a, 0.0), a);
        }
    }

    #[test]
    fn two_units_complete_exactly_once_in_either_order() {
        for order in [[0.1, 0.2], [0.2, 0.1]] {
            let mut agg = Aggregator::new(grid());
            agg.register(&realization(0), 2);
            assert!(!agg.record(0, 1, &partial(order[0])).unwrap());
            assert!(agg.record(0, 1, &partial(order[1])).unwrap());
            assert_eq!(agg.finalized().len(), 1);
            let curve = &agg.finalized()[0].curves[&Imt::new("PGA")];
            assert!(curve.iter().all(|v| (v - 0.28).abs() < 1e-12));

            let err = agg.record(0, 1, &partial(0.3)).unwrap_err();
            assert!(matches!(
                err,
                HazardError::ProgressOverrun {
                    already_complete: true,
                    ..
                }
            ));
            assert_eq!(agg.finalized().len(), 1);
        }
    }

    #[test]
    fn excess_increment_is_rejected_before_mutation() {
        let mut agg = Aggregator::new(grid());
        agg.register(&realization(0), 2);
        let err = agg.record(0, 3, &partial(0.5)).unwrap_err();
        assert_eq!(
            err,
            HazardError::ProgressOverrun {
                realization: 0,
                completed: 0,
                increment: 3,
                total: 2,
                already_complete: false,
            }
        );
        assert!(agg.curves(0).unwrap()[&Imt::new("PGA")].iter().all(|v| *v == 0.0));
        assert_eq!(agg.progress(0).unwrap().completed(), 0);
    }

    #[test]
    fn bad_payloads_are_worker_errors() {
        let mut agg = Aggregator::new(grid());
        agg.register(&realization(0), 2);

        let mut wrong_shape = BTreeMap::new();
        wrong_shape.insert(Imt::new("PGA"), DMatrix::zeros(2, 2));
        assert!(matches!(
            agg.record(0, 1, &wrong_shape),
            Err(HazardError::Worker { realization: 0, .. })
        ));
        assert!(matches!(
            agg.record(0, 1, &partial(1.5)),
            Err(HazardError::Worker { .. })
        ));
        assert_eq!(agg.progress(0).unwrap().completed(), 0);
    }

    #[test]
    fn realizations_without_work_finalize_at_registration() {
        let mut agg = Aggregator::new(grid());
        agg.register(&realization(3), 0);
        assert_eq!(agg.pending(), 0);
        assert_eq!(agg.finalized()[0].realization, 3);
        assert!(agg.record(3, 1, &partial(0.1)).is_err());
    }

    #[test]
    fn apply_returns_the_updated_accumulator() {
        let mut agg = Aggregator::new(grid());
        agg.register(&realization(1), 5);
        let pga = Imt::new("PGA");
        agg.apply(1, &pga, &DMatrix::from_element(1, 2, 0.1)).unwrap();
        let curve = agg.apply(1, &pga, &DMatrix::from_element(1, 2, 0.2)).unwrap();
        assert!((curve[(0, 1)] - 0.28).abs() < 1e-12);
    }

    #[test]
    fn unregistered_realizations_overrun() {
        let mut agg = Aggregator::new(grid());
        assert!(matches!(
            agg.record(9, 1, &partial(0.1)),
            Err(HazardError::ProgressOverrun { realization: 9, .. })
        ));
    }

    #[test]
    fn finalized_are_sorted_by_ordinal() {
        let mut agg = Aggregator::new(grid());
        agg.register(&realization(0), 1);
        agg.register(&realization(1), 1);
        agg.record(1, 1, &partial(0.1)).unwrap();
        agg.record(0, 1, &partial(0.1)).unwrap();
        assert_eq!(agg.finalized()[0].realization, 1);
        let ids: Vec<usize> = agg.into_finalized().iter().map(|f| f.realization).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
