//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - read from job files and tree documents
//! - passed between the coordinator and worker threads
//! - exported to JSON

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which uncertainty a logic tree describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// Alternative source models plus value uncertainties on their sources.
    SourceModel,
    /// Alternative ground-motion models per tectonic region type.
    Gsim,
}

/// Uncertainty type of a branch set (NRML names on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UncertaintyType {
    #[serde(rename = "sourceModel")]
    SourceModel,
    #[serde(rename = "gmpeModel")]
    GsimModel,
    #[serde(rename = "maxMagGRRelative")]
    MaxMagGrRelative,
    #[serde(rename = "bGRRelative")]
    BGrRelative,
    #[serde(rename = "maxMagGRAbsolute")]
    MaxMagGrAbsolute,
    #[serde(rename = "abGRAbsolute")]
    AbGrAbsolute,
}

impl UncertaintyType {
    pub fn name(self) -> &'static str {
        match self {
            UncertaintyType::SourceModel => "sourceModel",
            UncertaintyType::GsimModel => "gmpeModel",
            UncertaintyType::MaxMagGrRelative => "maxMagGRRelative",
            UncertaintyType::BGrRelative => "bGRRelative",
            UncertaintyType::MaxMagGrAbsolute => "maxMagGRAbsolute",
            UncertaintyType::AbGrAbsolute => "abGRAbsolute",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            UncertaintyType::SourceModel,
            UncertaintyType::GsimModel,
            UncertaintyType::MaxMagGrRelative,
            UncertaintyType::BGrRelative,
            UncertaintyType::MaxMagGrAbsolute,
            UncertaintyType::AbGrAbsolute,
        ]
        .into_iter()
        .find(|t| t.name() == name)
    }

    /// True for the uncertainties that modify source parameters.
    pub fn is_value_uncertainty(self) -> bool {
        !matches!(self, UncertaintyType::SourceModel | UncertaintyType::GsimModel)
    }
}

/// Typed value carried by a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyValue {
    /// Name of a source model.
    SourceModel(String),
    /// Name of a ground-motion model.
    Gsim(String),
    /// Increment applied to a source parameter.
    Relative(f64),
    /// Replacement value for a source parameter.
    Absolute(f64),
    /// Replacement Gutenberg-Richter `(a, b)` pair.
    AbsolutePair(f64, f64),
}

impl fmt::Display for UncertaintyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncertaintyValue::SourceModel(name) | UncertaintyValue::Gsim(name) => write!(f, "{name}"),
            UncertaintyValue::Relative(v) => write!(f, "{v:+}"),
            UncertaintyValue::Absolute(v) => write!(f, "{v}"),
            UncertaintyValue::AbsolutePair(a, b) => write!(f, "{a} {b}"),
        }
    }
}

/// Kind of seismic source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "area")]
    Area,
    #[serde(rename = "point")]
    Point,
    #[serde(rename = "simpleFault")]
    SimpleFault,
    #[serde(rename = "complexFault")]
    ComplexFault,
    #[serde(rename = "characteristicFault")]
    CharacteristicFault,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::Area,
        SourceType::Point,
        SourceType::SimpleFault,
        SourceType::ComplexFault,
        SourceType::CharacteristicFault,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceType::Area => "area",
            SourceType::Point => "point",
            SourceType::SimpleFault => "simpleFault",
            SourceType::ComplexFault => "complexFault",
            SourceType::CharacteristicFault => "characteristicFault",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        SourceType::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Restriction of a branch set to a subset of sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    TectonicRegionType(String),
    Sources(Vec<String>),
    SourceType(SourceType),
}

impl Filter {
    /// Document name of the filter.
    pub fn name(&self) -> &'static str {
        match self {
            Filter::TectonicRegionType(_) => "applyToTectonicRegionType",
            Filter::Sources(_) => "applyToSources",
            Filter::SourceType(_) => "applyToSourceType",
        }
    }

    /// Does the filter select this source?
    pub fn matches(&self, item: &SourceItem) -> bool {
        match self {
            Filter::TectonicRegionType(trt) => &item.tectonic_region_type == trt,
            Filter::Sources(ids) => ids.iter().any(|id| id == &item.id),
            Filter::SourceType(kind) => item.source_type == *kind,
        }
    }
}

/// Intensity measure type (e.g. `PGA`, `SA(0.2)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Imt(pub String);

impl Imt {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Imt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A site where hazard is computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
}

/// Sites and intensity levels every curve is defined on.
///
/// Curves for an IMT are `sites × levels` matrices (row = site, column = level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardGrid {
    pub sites: Vec<Location>,
    pub imts: BTreeMap<Imt, Vec<f64>>,
}

impl HazardGrid {
    pub fn n_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn levels(&self, imt: &Imt) -> Option<&[f64]> {
        self.imts.get(imt).map(|v| v.as_slice())
    }

    /// Matrix shape `(sites, levels)` for an IMT.
    pub fn shape(&self, imt: &Imt) -> Option<(usize, usize)> {
        self.imts.get(imt).map(|levels| (self.sites.len(), levels.len()))
    }
}

/// One unit of physical work: a seismic source with a truncated
/// Gutenberg-Richter magnitude-frequency distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub tectonic_region_type: String,
    pub source_type: SourceType,
    pub lon: f64,
    pub lat: f64,
    pub a_value: f64,
    pub b_value: f64,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
}

/// A branch-value adjustment to apply to matching sources of a realization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAdjustment {
    pub uncertainty: UncertaintyType,
    pub value: UncertaintyValue,
    pub filter: Option<Filter>,
}

/// One complete path through the logic tree(s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realization {
    /// Position in resolution order; used as the realization id.
    pub ordinal: usize,
    /// Chosen source-model tree branch ids, one per level.
    pub path: Vec<String>,
    /// Chosen GSIM tree branch ids (empty without a GSIM tree).
    pub gsim_path: Vec<String>,
    /// Source model selected on the first level, if the tree has one.
    pub source_model: Option<String>,
    /// Value uncertainties collected along the path, in level order.
    pub adjustments: Vec<SourceAdjustment>,
    /// Ground-motion model per tectonic region type.
    pub gsims: BTreeMap<String, String>,
    /// `None` for frequency-weighted samples.
    pub weight: Option<f64>,
}

impl Realization {
    /// Compact `b1_b3~g2` label used in reports and exports.
    pub fn label(&self) -> String {
        let mut out = self.path.join("_");
        if !self.gsim_path.is_empty() {
            out.push('~');
            out.push_str(&self.gsim_path.join("_"));
        }
        out
    }
}

/// How sampled realizations are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SampleWeighting {
    /// Every sample weighs `1/N`.
    #[default]
    Uniform,
    /// No explicit weight; sample frequency encodes probability.
    Frequency,
}

/// Realization resolution algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RealizationMode {
    Enumerate,
    Sample {
        seed: u64,
        count: usize,
        #[serde(default)]
        weighting: SampleWeighting,
    },
}

/// Whether statistics use realization weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    #[default]
    Weighted,
    Unweighted,
}

/// Which statistic to compute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    Mean,
    Quantile(f64),
}

impl StatisticKind {
    pub fn label(self) -> String {
        match self {
            StatisticKind::Mean => "mean".to_string(),
            StatisticKind::Quantile(q) => format!("quantile-{q}"),
        }
    }
}

/// Median ground motion `ln Y = c0 + c1·M − c2·ln(R + c3)` with lognormal scatter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttenuationModel {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    pub sigma: f64,
}

/// Statistics requested by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_true")]
    pub mean: bool,
    #[serde(default)]
    pub quantiles: Vec<f64>,
    #[serde(default)]
    pub weighting: Weighting,
    /// Export every realization's curves as well.
    #[serde(default)]
    pub individual_curves: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            mean: true,
            quantiles: Vec::new(),
            weighting: Weighting::Weighted,
            individual_curves: false,
        }
    }
}

/// Parameters of the synthetic source catalogue used when a job has no sources file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSources {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_sources_per_model")]
    pub sources_per_model: usize,
    pub tectonic_region_types: Vec<String>,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: [f64; 4],
}

/// A full job as understood by the pipeline.
///
/// Loaded from a JSON job file; paths are resolved relative to that file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub description: String,
    pub source_model_logic_tree: PathBuf,
    #[serde(default)]
    pub gsim_logic_tree: Option<PathBuf>,
    /// Sources per source model (`{model: [SourceItem]}`).
    #[serde(default)]
    pub sources: Option<PathBuf>,
    #[serde(default)]
    pub synthetic_sources: Option<SyntheticSources>,
    pub grid: HazardGrid,
    pub realizations: RealizationMode,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum number of work units in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Worker threads (0 = one per core).
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_investigation_time")]
    pub investigation_time: f64,
    /// Ground-motion models by name; defaults are used when empty.
    #[serde(default)]
    pub gsim_models: BTreeMap<String, AttenuationModel>,
    /// GSIM used for every region when the job has no GSIM tree.
    #[serde(default)]
    pub default_gsim: Option<String>,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    /// Probabilities of exceedance for hazard maps.
    #[serde(default)]
    pub poes: Vec<f64>,
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_sources_per_model() -> usize {
    20
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    8
}

fn default_investigation_time() -> f64 {
    50.0
}
