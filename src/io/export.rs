//! JSON exports of hazard curves and maps.
//!
//! One file per curve set and IMT:
//!
//! - `hazard_curve-rlz-0003-PGA.json` (per-realization, opt-in)
//! - `hazard_curve-mean-PGA.json`, `hazard_curve-quantile-0.85-PGA.json`
//! - `hazard_map-mean.json` (every IMT and PoE of one curve set)
//!
//! Curves are stored row per site, matching the `sites × levels` layout.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{HazardGrid, Imt, Location};
use crate::error::AppError;
use crate::stats::HazardMap;

const TOOL: &str = "hz";

/// Portable form of one curve set for one IMT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveExport {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    /// `rlz-0003`, `mean`, `quantile-0.85`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realization: Option<RealizationInfo>,
    pub imt: Imt,
    pub investigation_time: f64,
    pub levels: Vec<f64>,
    pub sites: Vec<Location>,
    /// `poes[site][level]`.
    pub poes: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizationInfo {
    pub ordinal: usize,
    pub label: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapExport {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub kind: String,
    pub investigation_time: f64,
    pub sites: Vec<Location>,
    pub maps: Vec<HazardMapEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardMapEntry {
    pub imt: Imt,
    pub poe: f64,
    pub values: Vec<f64>,
}

impl From<&HazardMap> for HazardMapEntry {
    fn from(map: &HazardMap) -> Self {
        Self {
            imt: map.imt.clone(),
            poe: map.poe,
            values: map.values.clone(),
        }
    }
}

/// Writes exports into one directory with a shared timestamp.
#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
    generated_at: DateTime<Utc>,
    investigation_time: f64,
    written: Vec<PathBuf>,
}

impl Exporter {
    /// Create the directory if needed.
    pub fn new(dir: &Path, investigation_time: f64) -> Result<Self, AppError> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::new(4, format!("Failed to create export dir '{}': {e}", dir.display()))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            generated_at: Utc::now(),
            investigation_time,
            written: Vec::new(),
        })
    }

    /// Paths written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Write one file per IMT of `curves`.
    pub fn write_curves<'a>(
        &mut self,
        kind: &str,
        realization: Option<RealizationInfo>,
        grid: &HazardGrid,
        curves: impl IntoIterator<Item = (&'a Imt, &'a DMatrix<f64>)>,
    ) -> Result<(), AppError> {
        for (imt, matrix) in curves {
            let export = CurveExport {
                tool: TOOL.to_string(),
                generated_at: self.generated_at,
                kind: kind.to_string(),
                realization: realization.clone(),
                imt: imt.clone(),
                investigation_time: self.investigation_time,
                levels: grid.levels(imt).map(|l| l.to_vec()).unwrap_or_default(),
                sites: grid.sites.clone(),
                poes: matrix
                    .row_iter()
                    .map(|row| row.iter().copied().collect())
                    .collect(),
            };
            let name = format!("hazard_curve-{}-{}.json", sanitize(kind), sanitize(imt.as_str()));
            self.write(&name, &export)?;
        }
        Ok(())
    }

    /// Write every map of one curve set to a single file.
    pub fn write_maps(
        &mut self,
        kind: &str,
        grid: &HazardGrid,
        maps: &[HazardMap],
    ) -> Result<(), AppError> {
        let export = MapExport {
            tool: TOOL.to_string(),
            generated_at: self.generated_at,
            kind: kind.to_string(),
            investigation_time: self.investigation_time,
            sites: grid.sites.clone(),
            maps: maps.iter().map(HazardMapEntry::from).collect(),
        };
        let name = format!("hazard_map-{}.json", sanitize(kind));
        self.write(&name, &export)
    }

    fn write<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), AppError> {
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(|e| {
            AppError::new(4, format!("Failed to create export '{}': {e}", path.display()))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|e| {
            AppError::new(4, format!("Failed to write export '{}': {e}", path.display()))
        })?;
        self.written.push(path);
        Ok(())
    }
}

/// Read back a curve export.
pub fn read_curve_export(path: &Path) -> Result<CurveExport, AppError> {
    crate::io::read_json(path, "curve export")
}

/// `SA(0.1)` → `SA_0.1_`; keeps file names portable.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn grid() -> HazardGrid {
        let mut imts = BTreeMap::new();
        imts.insert(Imt::new("SA(0.1)"), vec![0.1, 0.2, 0.4]);
        HazardGrid {
            sites: vec![
                Location { lon: 1.0, lat: 2.0 },
                Location { lon: 3.0, lat: 4.0 },
            ],
            imts,
        }
    }

    #[test]
    fn curves_are_written_row_per_site() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = Exporter::new(&dir.path().join("out"), 50.0).unwrap();
        let mut curves = BTreeMap::new();
        curves.insert(
            Imt::new("SA(0.1)"),
            DMatrix::from_row_slice(2, 3, &[0.5, 0.2, 0.1, 0.4, 0.1, 0.0]),
        );
        exporter
            .write_curves(
                "rlz-0001",
                Some(RealizationInfo {
                    ordinal: 1,
                    label: "b1_b3".into(),
                    weight: Some(0.3),
                }),
                &grid(),
                &curves,
            )
            .unwrap();

        assert_eq!(exporter.written().len(), 1);
        let path = &exporter.written()[0];
        assert!(path.ends_with("hazard_curve-rlz-0001-SA_0.1_.json"));
        let back = read_curve_export(path).unwrap();
        assert_eq!(back.poes, vec![vec![0.5, 0.2, 0.1], vec![0.4, 0.1, 0.0]]);
        assert_eq!(back.levels, vec![0.1, 0.2, 0.4]);
        assert_eq!(back.realization.unwrap().label, "b1_b3");
    }

    #[test]
    fn maps_share_one_file_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = Exporter::new(dir.path(), 50.0).unwrap();
        let maps = vec![
            HazardMap {
                imt: Imt::new("SA(0.1)"),
                poe: 0.1,
                values: vec![0.2, 0.15],
            },
            HazardMap {
                imt: Imt::new("SA(0.1)"),
                poe: 0.02,
                values: vec![0.4, 0.3],
            },
        ];
        exporter.write_maps("quantile-0.5", &grid(), &maps).unwrap();
        let back: MapExport = crate::io::read_json(&exporter.written()[0], "map").unwrap();
        assert_eq!(back.maps.len(), 2);
        assert_eq!(back.kind, "quantile-0.5");
    }
}
