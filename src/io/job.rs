//! Job files.
//!
//! A job is one JSON document naming the logic trees, the sources (a file or
//! synthetic settings), the hazard grid and the run settings. Relative paths
//! inside it are resolved against the job file's directory.

use std::path::{Path, PathBuf};

use crate::domain::{JobConfig, RealizationMode};
use crate::error::AppError;
use crate::io::read_json;

/// Read a job file and resolve its relative paths.
pub fn load_job(path: &Path) -> Result<JobConfig, AppError> {
    let mut job: JobConfig = read_json(path, "job")?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    job.source_model_logic_tree = resolve(base, &job.source_model_logic_tree);
    job.gsim_logic_tree = job.gsim_logic_tree.map(|p| resolve(base, &p));
    job.sources = job.sources.map(|p| resolve(base, &p));
    job.export_dir = job.export_dir.map(|p| resolve(base, &p));
    Ok(job)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl JobConfig {
    /// Range checks that do not need the trees or sources.
    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: String| Err(AppError::new(2, format!("Invalid job: {msg}")));

        match (&self.sources, &self.synthetic_sources) {
            (Some(_), Some(_)) => {
                return invalid("set either `sources` or `synthetic_sources`, not both".into());
            }
            (None, None) => return invalid("one of `sources` or `synthetic_sources` is required".into()),
            _ => {}
        }

        if self.grid.sites.is_empty() {
            return invalid("the hazard grid has no sites".into());
        }
        if let Some(site) = self
            .grid
            .sites
            .iter()
            .find(|s| !(s.lon.is_finite() && s.lat.is_finite() && s.lat.abs() <= 90.0))
        {
            return invalid(format!("site ({}, {}) is not a valid location", site.lon, site.lat));
        }
        if self.grid.imts.is_empty() {
            return invalid("the hazard grid has no intensity measure types".into());
        }
        for (imt, levels) in &self.grid.imts {
            if levels.is_empty() {
                return invalid(format!("{imt} has no intensity levels"));
            }
            if levels.iter().any(|l| !(l.is_finite() && *l > 0.0)) {
                return invalid(format!("{imt} levels must be positive"));
            }
            if levels.windows(2).any(|w| w[1] <= w[0]) {
                return invalid(format!("{imt} levels must be strictly increasing"));
            }
        }

        if let RealizationMode::Sample { count: 0, .. } = self.realizations {
            return invalid("number of logic tree samples must be > 0".into());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0".into());
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be > 0".into());
        }
        if !(self.investigation_time.is_finite() && self.investigation_time > 0.0) {
            return invalid("investigation_time must be > 0".into());
        }
        if let Some(q) = self
            .statistics
            .quantiles
            .iter()
            .find(|q| !(0.0..=1.0).contains(*q))
        {
            return invalid(format!("quantile {q} must lie in [0, 1]"));
        }
        if let Some(p) = self.poes.iter().find(|p| !(**p > 0.0 && **p < 1.0)) {
            return invalid(format!("hazard map PoE {p} must lie in (0, 1)"));
        }
        for (name, model) in &self.gsim_models {
            if !(model.sigma.is_finite() && model.sigma >= 0.0) {
                return invalid(format!("ground-motion model '{name}' has a negative sigma"));
            }
        }
        if let Some(name) = &self.default_gsim {
            if !self.gsim_models.is_empty() && !self.gsim_models.contains_key(name) {
                return invalid(format!("default_gsim '{name}' is not among gsim_models"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::domain::{Imt, SampleWeighting};

    const JOB: &str = r#"{
        "description": "two-site demo",
        "source_model_logic_tree": "trees/source_model.json",
        "gsim_logic_tree": "/abs/gsim.json",
        "synthetic_sources": {
            "seed": 3,
            "tectonic_region_types": ["Active Shallow Crust"],
            "bbox": [10.0, 40.0, 12.0, 42.0]
        },
        "grid": {
            "sites": [{"lon": 11.0, "lat": 41.0}, {"lon": 11.5, "lat": 41.5}],
            "imts": {"PGA": [0.05, 0.1, 0.2, 0.4]}
        },
        "realizations": {"mode": "sample", "seed": 42, "count": 10},
        "statistics": {"quantiles": [0.15, 0.85]},
        "poes": [0.1, 0.02]
    }"#;

    #[test]
    fn loads_job_with_defaults_and_resolved_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(&path, JOB).unwrap();

        let job = load_job(&path).unwrap();
        assert_eq!(
            job.source_model_logic_tree,
            dir.path().join("trees/source_model.json")
        );
        assert_eq!(job.gsim_logic_tree, Some(PathBuf::from("/abs/gsim.json")));
        assert_eq!(job.batch_size, 10);
        assert_eq!(job.concurrency, 8);
        assert_eq!(job.investigation_time, 50.0);
        assert!(job.statistics.mean);
        assert_eq!(job.grid.shape(&Imt::new("PGA")), Some((2, 4)));
        assert_eq!(
            job.realizations,
            RealizationMode::Sample {
                seed: 42,
                count: 10,
                weighting: SampleWeighting::Uniform
            }
        );
        job.validate().unwrap();
    }

    #[test]
    fn validation_catches_bad_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(&path, JOB).unwrap();
        let job = load_job(&path).unwrap();

        let mut bad = job.clone();
        bad.statistics.quantiles.push(1.2);
        assert!(bad.validate().unwrap_err().to_string().contains("1.2"));

        let mut bad = job.clone();
        bad.grid.imts.insert(Imt::new("SA(0.2)"), vec![0.2, 0.1]);
        assert!(bad.validate().unwrap_err().to_string().contains("increasing"));

        let mut bad = job.clone();
        bad.sources = Some(PathBuf::from("sources.json"));
        assert_eq!(bad.validate().unwrap_err().exit_code(), 2);

        let mut bad = job;
        bad.poes = vec![1.0];
        assert!(bad.validate().is_err());
    }

    #[test]
    fn missing_job_file_is_an_input_error() {
        let err = load_job(Path::new("/definitely/not/here.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
