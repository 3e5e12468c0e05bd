//! Hazard maps: the intensity level reached at a target PoE, per site.
//!
//! Interpolation is linear in `(ln PoE, ln level)`. A target above the curve's
//! first value clamps to the first level, one below its last value to the
//! last level.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::Serialize;

use crate::domain::{HazardGrid, Imt};

/// PoEs are floored here before taking logs.
const MIN_POE: f64 = 1e-300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardMap {
    pub imt: Imt,
    pub poe: f64,
    /// One intensity level per site.
    pub values: Vec<f64>,
}

/// Intensity level at `poe` for every row (site) of `curves`.
pub fn hazard_map(curves: &DMatrix<f64>, levels: &[f64], poe: f64) -> Vec<f64> {
    let log_levels: Vec<f64> = levels.iter().map(|l| l.max(MIN_POE).ln()).collect();
    let target = poe.max(MIN_POE).ln();
    curves
        .row_iter()
        .map(|row| {
            let log_poes: Vec<f64> = row.iter().map(|p| p.max(MIN_POE).ln()).collect();
            interpolate_descending(&log_poes, &log_levels, target).exp()
        })
        .collect()
}

/// Maps for every IMT of `curves` and every target PoE.
pub fn hazard_maps(
    curves: &BTreeMap<Imt, DMatrix<f64>>,
    grid: &HazardGrid,
    poes: &[f64],
) -> Vec<HazardMap> {
    let mut out = Vec::new();
    for (imt, matrix) in curves {
        let Some(levels) = grid.levels(imt) else {
            continue;
        };
        for &poe in poes {
            out.push(HazardMap {
                imt: imt.clone(),
                poe,
                values: hazard_map(matrix, levels, poe),
            });
        }
    }
    out
}

/// `y` at `x` along points whose `xs` are non-increasing.
fn interpolate_descending(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let last = xs.len() - 1;
    if x >= xs[0] {
        return ys[0];
    }
    if x <= xs[last] {
        return ys[last];
    }
    for i in 1..=last {
        if xs[i] <= x {
            let (x0, x1) = (xs[i - 1], xs[i]);
            if x0 == x1 {
                return ys[i];
            }
            return ys[i - 1] + (ys[i] - ys[i - 1]) * (x - x0) / (x1 - x0);
        }
    }
    ys[last]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_points_and_clamping() {
        let levels = [0.1, 0.2, 0.4];
        let curves = DMatrix::from_row_slice(1, 3, &[0.5, 0.1, 0.01]);
        let at = |poe| hazard_map(&curves, &levels, poe)[0];
        assert!((at(0.1) - 0.2).abs() < 1e-12);
        assert!((at(0.9) - 0.1).abs() < 1e-12);
        assert!((at(0.001) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn interpolation_is_log_log() {
        let levels = [0.1, 1.0];
        let curves = DMatrix::from_row_slice(1, 2, &[0.1, 0.001]);
        // ln(0.01) is halfway between ln(0.1) and ln(0.001).
        let v = hazard_map(&curves, &levels, 0.01)[0];
        assert!((v - 0.1f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn one_value_per_site() {
        let mut imts = BTreeMap::new();
        imts.insert(Imt::new("PGA"), vec![0.1, 0.2]);
        let grid = HazardGrid {
            sites: Vec::new(),
            imts,
        };
        let mut curves = BTreeMap::new();
        curves.insert(
            Imt::new("PGA"),
            DMatrix::from_row_slice(3, 2, &[0.5, 0.1, 0.4, 0.05, 0.0, 0.0]),
        );
        let maps = hazard_maps(&curves, &grid, &[0.1, 0.02]);
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0].values.len(), 3);
        // A zero curve never reaches the target.
        assert!((maps[0].values[2] - 0.1).abs() < 1e-12);
    }
}
