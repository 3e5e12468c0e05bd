//! Reference worker: Poissonian PoE curves from Gutenberg-Richter sources.
//!
//! For every source in a batch, the truncated GR distribution is discretised
//! into `0.1` magnitude bins. Each bin contributes its annual rate times the
//! probability that the lognormal ground motion at the site exceeds the level:
//!
//! - `ln Y = c0 + c1·M − c2·ln(R + c3)`, `σ` in natural-log units
//! - `λ(y) = Σ_bins rate · P(Y > y)`
//! - `PoE(y) = 1 − exp(−λ(y) · T)`
//!
//! Rates add across the sources of a batch, so the batch curve equals the
//! OR-combination of the per-source curves and batching does not change the
//! final result.

use std::collections::BTreeMap;

use nalgebra::DMatrix;

use crate::domain::{AttenuationModel, HazardGrid, SourceItem};
use crate::work::{PartialCurves, WorkUnit, Worker, WorkerFailure};

const BIN_WIDTH: f64 = 0.1;
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Name of the attenuation model used when a job defines none.
pub const GENERIC_GSIM: &str = "Generic";

/// Built-in attenuation models.
pub fn default_models() -> BTreeMap<String, AttenuationModel> {
    let mut models = BTreeMap::new();
    models.insert(
        GENERIC_GSIM.to_string(),
        AttenuationModel {
            c0: -3.5,
            c1: 1.0,
            c2: 1.2,
            c3: 10.0,
            sigma: 0.6,
        },
    );
    models
}

#[derive(Debug, Clone)]
pub struct PoissonWorker {
    grid: HazardGrid,
    models: BTreeMap<String, AttenuationModel>,
    default_gsim: Option<String>,
    investigation_time: f64,
}

impl PoissonWorker {
    pub fn new(
        grid: HazardGrid,
        models: BTreeMap<String, AttenuationModel>,
        default_gsim: Option<String>,
        investigation_time: f64,
    ) -> Self {
        Self {
            grid,
            models,
            default_gsim,
            investigation_time,
        }
    }

    fn model_for(
        &self,
        unit: &WorkUnit,
        source: &SourceItem,
    ) -> Result<&AttenuationModel, WorkerFailure> {
        let name = unit
            .gsims
            .get(&source.tectonic_region_type)
            .or(self.default_gsim.as_ref())
            .ok_or_else(|| {
                WorkerFailure::new(format!(
                    "no ground-motion model for tectonic region type '{}'",
                    source.tectonic_region_type
                ))
            })?;
        self.models
            .get(name)
            .ok_or_else(|| WorkerFailure::new(format!("unknown ground-motion model '{name}'")))
    }
}

impl Worker for PoissonWorker {
    fn compute(&self, unit: &WorkUnit) -> Result<PartialCurves, WorkerFailure> {
        let n_sites = self.grid.n_sites();
        let mut rates: BTreeMap<_, DMatrix<f64>> = self
            .grid
            .imts
            .iter()
            .map(|(imt, levels)| (imt.clone(), DMatrix::zeros(n_sites, levels.len())))
            .collect();

        for source in &unit.batch {
            let model = self.model_for(unit, source)?;
            let bins = magnitude_bins(source);
            for (row, site) in self.grid.sites.iter().enumerate() {
                let distance = haversine_km(source.lon, source.lat, site.lon, site.lat);
                for (imt, levels) in &self.grid.imts {
                    let Some(matrix) = rates.get_mut(imt) else {
                        continue;
                    };
                    for (col, &level) in levels.iter().enumerate() {
                        matrix[(row, col)] += bins
                            .iter()
                            .map(|&(m, rate)| rate * exceedance(model, m, distance, level))
                            .sum::<f64>();
                    }
                }
            }
        }

        let t = self.investigation_time;
        Ok(rates
            .into_iter()
            .map(|(imt, lambda)| (imt, lambda.map(|l| 1.0 - (-l * t).exp())))
            .collect())
    }
}

/// `(centre magnitude, annual rate)` per `0.1` bin of the truncated GR law.
pub fn magnitude_bins(source: &SourceItem) -> Vec<(f64, f64)> {
    let cumulative = |m: f64| 10f64.powf(source.a_value - source.b_value * m);
    let mut bins = Vec::new();
    let mut lo = source.min_magnitude;
    while lo < source.max_magnitude - 1e-9 {
        let hi = (lo + BIN_WIDTH).min(source.max_magnitude);
        bins.push(((lo + hi) / 2.0, cumulative(lo) - cumulative(hi)));
        lo = hi;
    }
    bins
}

/// `P(Y > level)` for a rupture of magnitude `m` at `distance` km.
fn exceedance(model: &AttenuationModel, m: f64, distance: f64, level: f64) -> f64 {
    if level <= 0.0 {
        return 1.0;
    }
    let ln_median = model.c0 + model.c1 * m - model.c2 * (distance + model.c3).ln();
    if model.sigma <= 0.0 {
        return if ln_median > level.ln() { 1.0 } else { 0.0 };
    }
    let z = (level.ln() - ln_median) / model.sigma;
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Complementary error function (Abramowitz & Stegun 7.1.26, |ε| < 1.5e-7).
fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    poly * (-x * x).exp()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{Imt, Location, SourceType};

    fn grid() -> HazardGrid {
        let mut imts = BTreeMap::new();
        imts.insert(Imt::new("PGA"), vec![0.01, 0.05, 0.1, 0.3, 1.0]);
        HazardGrid {
            sites: vec![
                Location { lon: 0.0, lat: 0.0 },
                Location { lon: 1.0, lat: 0.0 },
            ],
            imts,
        }
    }

    fn source(id: &str) -> SourceItem {
        SourceItem {
            id: id.to_string(),
            tectonic_region_type: "Active Shallow Crust".to_string(),
            source_type: SourceType::Point,
            lon: 0.0,
            lat: 0.1,
            a_value: 3.0,
            b_value: 1.0,
            min_magnitude: 5.0,
            max_magnitude: 7.0,
        }
    }

    fn unit(batch: Vec<SourceItem>) -> WorkUnit {
        WorkUnit {
            realization: 0,
            batch,
            gsims: Arc::new(BTreeMap::new()),
        }
    }

    fn worker() -> PoissonWorker {
        PoissonWorker::new(grid(), default_models(), Some(GENERIC_GSIM.to_string()), 50.0)
    }

    #[test]
    fn erfc_matches_reference_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-6);
        assert!((erfc(1.0) - 0.157_299_207).abs() < 1e-6);
        assert!((erfc(-1.0) - 1.842_700_793).abs() < 1e-6);
    }

    #[test]
    fn bins_sum_to_the_truncated_rate() {
        let src = source("s");
        let total: f64 = magnitude_bins(&src).iter().map(|(_, r)| r).sum();
        let expected = 10f64.powf(3.0 - 5.0) - 10f64.powf(3.0 - 7.0);
        assert!((total - expected).abs() < 1e-12);
        assert_eq!(magnitude_bins(&src).len(), 20);
    }

    #[test]
    fn curves_decrease_with_level_and_distance() {
        let curves = worker().compute(&unit(vec![source("s")])).unwrap();
        let pga = &curves[&Imt::new("PGA")];
        assert_eq!(pga.shape(), (2, 5));
        for row in 0..2 {
            for col in 1..5 {
                assert!(pga[(row, col)] <= pga[(row, col - 1)]);
            }
        }
        assert!(pga[(0, 2)] > pga[(1, 2)]);
        assert!(pga.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn batch_curve_is_the_or_combination_of_single_sources() {
        let w = worker();
        let both = w.compute(&unit(vec![source("a"), source("b")])).unwrap();
        let single = w.compute(&unit(vec![source("a")])).unwrap();
        let (b, s) = (&both[&Imt::new("PGA")], &single[&Imt::new("PGA")]);
        for (got, one) in b.iter().zip(s.iter()) {
            let want = 1.0 - (1.0 - one) * (1.0 - one);
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn missing_gsim_is_a_worker_failure() {
        let w = PoissonWorker::new(grid(), default_models(), None, 50.0);
        let err = w.compute(&unit(vec![source("s")])).unwrap_err();
        assert!(err.message.contains("Active Shallow Crust"));
    }
}
