//! Statistics over finalized realizations.
//!
//! Per `(site, level)` cell, across realizations:
//!
//! - weighted or arithmetic mean
//! - weighted quantile (midpoint plotting positions on the normalized
//!   cumulative weights, linear interpolation, clamped at both ends)
//! - unweighted quantile (`mquantiles` estimator, `alphap = betap = 0.4`)
//!
//! Cells are independent, so each matrix is computed in parallel with rayon.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::info;

use crate::aggregate::FinalizedRealization;
use crate::domain::{Imt, StatisticKind, Weighting};
use crate::error::{HazardError, Result};

pub mod maps;

pub use maps::{HazardMap, hazard_map, hazard_maps};

/// Plotting-position parameters of the unweighted quantile estimator.
const ALPHAP: f64 = 0.4;
const BETAP: f64 = 0.4;

/// A derived curve set (one matrix per IMT).
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticCurves {
    pub kind: StatisticKind,
    pub weighting: Weighting,
    pub curves: BTreeMap<Imt, DMatrix<f64>>,
}

/// Compute a statistic over every finalized realization.
///
/// Weighted statistics fall back to equal weights when any realization has no
/// explicit weight (frequency-weighted samples); quantiles then still use the
/// weighted midpoint estimator. Only [`Weighting::Unweighted`] selects
/// [`mquantile`].
pub fn compute_statistics(
    finalized: &[FinalizedRealization],
    kind: StatisticKind,
    weighting: Weighting,
) -> Result<StatisticCurves> {
    let first = finalized.first().ok_or(HazardError::EmptyInput)?;
    if let StatisticKind::Quantile(q) = kind {
        if !(0.0..=1.0).contains(&q) {
            return Err(HazardError::InvalidQuantile(q));
        }
    }

    let weights: Option<Vec<f64>> = match weighting {
        Weighting::Weighted => Some(
            finalized
                .iter()
                .map(|f| f.weight)
                .collect::<Option<Vec<f64>>>()
                .unwrap_or_else(|| vec![1.0; finalized.len()]),
        ),
        Weighting::Unweighted => None,
    };

    let mut curves = BTreeMap::new();
    for (imt, template) in &first.curves {
        let matrices: Vec<&DMatrix<f64>> = finalized
            .iter()
            .filter_map(|f| f.curves.get(imt))
            .filter(|m| m.shape() == template.shape())
            .collect();
        if matrices.len() != finalized.len() {
            return Err(HazardError::worker(
                first.realization,
                format!("realizations disagree on the {imt} curve shape"),
            ));
        }

        let (rows, cols) = template.shape();
        let data: Vec<f64> = (0..rows * cols)
            .into_par_iter()
            .map(|idx| {
                let values: Vec<f64> = matrices.iter().map(|m| m[idx]).collect();
                cell_statistic(&values, weights.as_deref(), kind)
            })
            .collect();
        curves.insert(imt.clone(), DMatrix::from_vec(rows, cols, data));
    }

    info!(
        statistic = %kind.label(),
        realizations = finalized.len(),
        weighted = weights.is_some(),
        "Computed statistic"
    );
    Ok(StatisticCurves {
        kind,
        weighting,
        curves,
    })
}

fn cell_statistic(values: &[f64], weights: Option<&[f64]>, kind: StatisticKind) -> f64 {
    match (kind, weights) {
        (StatisticKind::Mean, Some(w)) => weighted_mean(values, w),
        (StatisticKind::Mean, None) => values.iter().sum::<f64>() / values.len() as f64,
        (StatisticKind::Quantile(q), Some(w)) => weighted_quantile(values, w, q),
        (StatisticKind::Quantile(q), None) => mquantile(values, q),
    }
}

/// `Σ w·v / Σ w`.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    values
        .iter()
        .zip(weights)
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / total
}

/// Weighted quantile by linear interpolation over midpoint positions.
///
/// After sorting by value, sample `i` sits at `(C_i − w_i/2) / W` where `C_i`
/// is the cumulative weight. `q` below the first position returns the minimum,
/// above the last the maximum.
pub fn weighted_quantile(values: &[f64], weights: &[f64], q: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = values.iter().copied().zip(weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();

    let mut positions = Vec::with_capacity(pairs.len());
    let mut acc = 0.0;
    for (_, w) in &pairs {
        acc += w;
        positions.push((acc - w / 2.0) / total);
    }

    let last = pairs.len() - 1;
    if q <= positions[0] {
        return pairs[0].0;
    }
    if q >= positions[last] {
        return pairs[last].0;
    }
    let i = positions.partition_point(|&p| p <= q);
    let (p0, p1) = (positions[i - 1], positions[i]);
    let (v0, v1) = (pairs[i - 1].0, pairs[i].0);
    if p1 <= p0 {
        return v1;
    }
    v0 + (v1 - v0) * (q - p0) / (p1 - p0)
}

/// Unweighted discrete quantile with plotting positions `alphap`/`betap`.
pub fn mquantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let m = ALPHAP + q * (1.0 - ALPHAP - BETAP);
    let aleph = n as f64 * q + m;
    let k = aleph.clamp(1.0, (n - 1) as f64).floor();
    let gamma = (aleph - k).clamp(0.0, 1.0);
    let k = k as usize;
    (1.0 - gamma) * sorted[k - 1] + gamma * sorted[k]
}
