//! Synthetic source catalogues for jobs that ship no sources file.
//!
//! Model `m` of the source-model tree is drawn from its own sub-seed of the
//! job seed; appending a model leaves the earlier catalogues unchanged.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{SourceItem, SourceType, SyntheticSources};
use crate::error::AppError;
use crate::realize::derive_seed;

/// Lower magnitude bound of every generated source.
const MIN_MAGNITUDE: f64 = 5.0;

/// Generate `sources_per_model` sources for each model name.
pub fn generate_sources(
    config: &SyntheticSources,
    models: &[String],
) -> Result<BTreeMap<String, Vec<SourceItem>>, AppError> {
    if config.sources_per_model == 0 {
        return Err(AppError::new(2, "Synthetic sources per model must be > 0."));
    }
    if config.tectonic_region_types.is_empty() {
        return Err(AppError::new(
            2,
            "Synthetic sources need at least one tectonic region type.",
        ));
    }
    let [min_lon, min_lat, max_lon, max_lat] = config.bbox;
    if !(config.bbox.iter().all(|v| v.is_finite()) && min_lon < max_lon && min_lat < max_lat) {
        return Err(AppError::new(
            2,
            "Synthetic source bbox must be [min_lon, min_lat, max_lon, max_lat].",
        ));
    }

    let a_dist = Normal::new(3.0_f64, 0.3)
        .map_err(|e| AppError::new(4, format!("a-value distribution error: {e}")))?;
    let b_dist = Normal::new(1.0_f64, 0.1)
        .map_err(|e| AppError::new(4, format!("b-value distribution error: {e}")))?;

    let mut out = BTreeMap::new();
    for (m, model) in models.iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(derive_seed(config.seed, m));
        let stem = model_stem(model);
        let items = (0..config.sources_per_model)
            .map(|i| {
                let trt = &config.tectonic_region_types[i % config.tectonic_region_types.len()];
                let source_type = SourceType::ALL[rng.gen_range(0..SourceType::ALL.len())];
                SourceItem {
                    id: format!("{stem}-{:03}", i + 1),
                    tectonic_region_type: trt.clone(),
                    source_type,
                    lon: rng.gen_range(min_lon..max_lon),
                    lat: rng.gen_range(min_lat..max_lat),
                    a_value: a_dist.sample(&mut rng),
                    b_value: b_dist.sample(&mut rng).clamp(0.6, 1.4),
                    min_magnitude: MIN_MAGNITUDE,
                    max_magnitude: rng.gen_range(6.5..7.5),
                }
            })
            .collect();
        out.insert(model.clone(), items);
    }
    Ok(out)
}

/// `sm_a.xml` → `sm_a`.
fn model_stem(model: &str) -> &str {
    match model.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => model,
    }
}
