//! Validating logic tree parser.
//!
//! Levels are parsed top-down. For every branch set the checks run in a fixed
//! order so the first reported problem is stable:
//!
//! 1. weights (each in `(0, 1]`, sum within [`WEIGHT_TOLERANCE`] of 1)
//! 2. branch-id uniqueness across the whole tree (first duplicate wins)
//! 3. uncertainty type, filter legality and placement, then typed branch values
//! 4. filter values and source-model names against the [`SourceCatalog`]
//!
//! Attaching the set to its parent branches (`applyToBranches`) comes last.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::domain::{Filter, SourceType, TreeKind, UncertaintyType, UncertaintyValue};
use crate::error::{HazardError, Result};
use crate::tree::catalog::{ModelInventory, SourceCatalog};
use crate::tree::document::{BranchSetDocument, LevelDocument, TreeDocument};
use crate::tree::{Branch, BranchRef, BranchSet, BranchSetId, LogicTree};

/// Allowed deviation of a branch set's weight sum from 1.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Parse and validate a tree document.
pub fn parse(doc: &TreeDocument, catalog: &SourceCatalog) -> Result<LogicTree> {
    let mut builder = TreeBuilder::new(doc, catalog);
    if doc.branching_levels.is_empty() {
        return Err(builder.error("tree", "logic tree has no branching levels"));
    }
    for (idx, level) in doc.branching_levels.iter().enumerate() {
        builder.parse_level(idx, level)?;
    }

    let tree = builder.finish();
    debug!(
        tree = tree.name(),
        levels = tree.n_levels(),
        branches = tree.n_branches(),
        "Parsed logic tree"
    );
    Ok(tree)
}

struct TreeBuilder<'a> {
    doc: &'a TreeDocument,
    catalog: &'a SourceCatalog,
    branch_sets: Vec<BranchSet>,
    levels: Vec<Vec<BranchSetId>>,
    index: HashMap<String, BranchRef>,
    /// Source models named on the first level (filters are checked against these).
    models: Vec<String>,
    /// GSIM trees: tectonic region type -> owning branch set id.
    claimed_trts: HashMap<String, String>,
}

impl<'a> TreeBuilder<'a> {
    fn new(doc: &'a TreeDocument, catalog: &'a SourceCatalog) -> Self {
        Self {
            doc,
            catalog,
            branch_sets: Vec::new(),
            levels: Vec::new(),
            index: HashMap::new(),
            models: Vec::new(),
            claimed_trts: HashMap::new(),
        }
    }

    fn error(&self, context: impl Into<String>, message: impl Into<String>) -> HazardError {
        HazardError::validation(self.doc.name.clone(), context, message)
    }

    fn parse_level(&mut self, idx: usize, level: &LevelDocument) -> Result<()> {
        let ctx = format!("branchingLevel '{}'", level.id);
        if level.branch_sets.is_empty() {
            return Err(self.error(ctx, "branching level has no branch sets"));
        }
        if idx == 0 && level.branch_sets.len() != 1 {
            return Err(self.error(
                ctx,
                format!(
                    "first branching level must contain exactly one branch set, found {}",
                    level.branch_sets.len()
                ),
            ));
        }

        self.levels.push(Vec::new());
        for set_doc in &level.branch_sets {
            let set = self.parse_branch_set(idx, set_doc)?;
            self.attach(idx, set)?;
        }
        Ok(())
    }

    fn parse_branch_set(&mut self, level: usize, doc: &BranchSetDocument) -> Result<BranchSet> {
        let ctx = format!("branchSet '{}'", doc.id);
        if doc.branches.is_empty() {
            return Err(self.error(ctx, "branch set has no branches"));
        }
        // (a) weights
        for b in &doc.branches {
            let w = b.uncertainty_weight;
            if !(w.is_finite() && w > 0.0 && w <= 1.0) {
                return Err(self.error(
                    format!("branch '{}'", b.id),
                    format!("weight {w} must lie in (0, 1]"),
                ));
            }
        }
        let sum: f64 = doc.branches.iter().map(|b| b.uncertainty_weight).sum();
        if (sum - 1.0).abs() >= WEIGHT_TOLERANCE {
            return Err(self.error(ctx, format!("branch weights sum to {sum}, expected 1.0")));
        }

        // (b) ids
        let mut seen = HashSet::new();
        for b in &doc.branches {
            if self.index.contains_key(&b.id) || !seen.insert(b.id.as_str()) {
                return Err(self.error(
                    format!("branch '{}'", b.id),
                    format!("duplicate branch id '{}'", b.id),
                ));
            }
        }

        // (c) uncertainty type, filters and placement
        let uncertainty = UncertaintyType::from_name(&doc.uncertainty_type).ok_or_else(|| {
            self.error(
                ctx.clone(),
                format!("unknown uncertainty type '{}'", doc.uncertainty_type),
            )
        })?;
        let filter = self.parse_filter(&ctx, doc)?;
        self.check_placement(&ctx, level, uncertainty, filter.as_ref(), doc)?;

        let mut branches = Vec::with_capacity(doc.branches.len());
        for b in &doc.branches {
            let value = parse_value(uncertainty, &b.uncertainty_model).map_err(|message| {
                self.error(format!("branch '{}'", b.id), message)
            })?;
            branches.push(Branch {
                id: b.id.clone(),
                weight: b.uncertainty_weight,
                value,
                child: None,
            });
        }

        // (d) catalog
        self.check_catalog(&ctx, uncertainty, filter.as_ref(), &branches)?;

        Ok(BranchSet {
            id: doc.id.clone(),
            level,
            uncertainty,
            filter,
            apply_to_branches: doc.apply_to_branches.clone(),
            branches,
        })
    }

    fn parse_filter(&self, ctx: &str, doc: &BranchSetDocument) -> Result<Option<Filter>> {
        if doc.filters.len() > 1 {
            let names: Vec<&str> = doc.filters.keys().map(|k| k.as_str()).collect();
            return Err(self.error(
                ctx,
                format!("at most one filter per branch set, found {}", names.join(", ")),
            ));
        }
        let Some((name, value)) = doc.filters.iter().next() else {
            return Ok(None);
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(self.error(ctx, format!("filter {name} has an empty value")));
        }
        let filter = match name.as_str() {
            "applyToTectonicRegionType" => Filter::TectonicRegionType(value.to_string()),
            "applyToSources" => {
                Filter::Sources(value.split_whitespace().map(str::to_string).collect())
            }
            "applyToSourceType" => {
                let kind = SourceType::from_name(value).ok_or_else(|| {
                    self.error(ctx, format!("unknown source type '{value}'"))
                })?;
                Filter::SourceType(kind)
            }
            other => return Err(self.error(ctx, format!("unknown filter '{other}'"))),
        };
        Ok(Some(filter))
    }

    fn check_placement(
        &mut self,
        ctx: &str,
        level: usize,
        uncertainty: UncertaintyType,
        filter: Option<&Filter>,
        doc: &BranchSetDocument,
    ) -> Result<()> {
        if level == 0 && doc.apply_to_branches.is_some() {
            return Err(self.error(ctx, "applyToBranches is not allowed on the first branching level"));
        }

        match self.doc.kind {
            TreeKind::SourceModel => {
                if uncertainty == UncertaintyType::GsimModel {
                    return Err(self.error(
                        ctx,
                        "gmpeModel uncertainty is not allowed in a source model logic tree",
                    ));
                }
                if level == 0 && uncertainty != UncertaintyType::SourceModel {
                    return Err(self.error(ctx, "first branching level must be of type sourceModel"));
                }
                if level > 0 && uncertainty == UncertaintyType::SourceModel {
                    return Err(self.error(
                        ctx,
                        "sourceModel uncertainty is only allowed on the first branching level",
                    ));
                }
                if uncertainty == UncertaintyType::SourceModel && filter.is_some() {
                    return Err(self.error(ctx, "sourceModel branch sets cannot be filtered"));
                }
            }
            TreeKind::Gsim => {
                if uncertainty != UncertaintyType::GsimModel {
                    return Err(self.error(
                        ctx,
                        format!(
                            "{} uncertainty is not allowed in a GSIM logic tree",
                            uncertainty.name()
                        ),
                    ));
                }
                if doc.apply_to_branches.is_some() {
                    return Err(self.error(ctx, "applyToBranches is not allowed in a GSIM logic tree"));
                }
                let Some(Filter::TectonicRegionType(trt)) = filter else {
                    return Err(self.error(
                        ctx,
                        "gmpeModel branch sets require an applyToTectonicRegionType filter",
                    ));
                };
                if let Some(owner) = self.claimed_trts.get(trt) {
                    return Err(self.error(
                        ctx,
                        format!("tectonic region type '{trt}' is already covered by branch set '{owner}'"),
                    ));
                }
                self.claimed_trts.insert(trt.clone(), doc.id.clone());
            }
        }
        Ok(())
    }

    fn check_catalog(
        &mut self,
        ctx: &str,
        uncertainty: UncertaintyType,
        filter: Option<&Filter>,
        branches: &[Branch],
    ) -> Result<()> {
        if uncertainty == UncertaintyType::SourceModel {
            for b in branches {
                if let UncertaintyValue::SourceModel(name) = &b.value {
                    if !self.catalog.has_model(name) {
                        return Err(self.error(
                            format!("branch '{}'", b.id),
                            format!("source model '{name}' is not in the source catalog"),
                        ));
                    }
                    self.models.push(name.clone());
                }
            }
        }

        let Some(filter) = filter else {
            return Ok(());
        };
        let inventory = match self.doc.kind {
            TreeKind::SourceModel => self.catalog.union_of(self.models.iter().map(|m| m.as_str())),
            TreeKind::Gsim => self.catalog.all(),
        };
        if let Some(message) = missing_filter_value(filter, &inventory) {
            return Err(self.error(ctx, message));
        }
        Ok(())
    }

    fn attach(&mut self, level: usize, set: BranchSet) -> Result<()> {
        let ctx = format!("branchSet '{}'", set.id);
        let id = BranchSetId(self.branch_sets.len());

        if level > 0 {
            let siblings = &self.levels[level];
            let has_unrestricted = siblings
                .iter()
                .any(|s| self.branch_sets[s.0].apply_to_branches.is_none());
            let targets = match &set.apply_to_branches {
                None => {
                    if !siblings.is_empty() {
                        return Err(self.error(
                            ctx,
                            "only a level's single branch set may omit applyToBranches",
                        ));
                    }
                    self.levels[level - 1]
                        .iter()
                        .flat_map(|s| {
                            self.branch_sets[s.0]
                                .branches
                                .iter()
                                .map(|b| b.id.clone())
                        })
                        .collect::<Vec<_>>()
                }
                Some(targets) => {
                    if has_unrestricted {
                        return Err(self.error(
                            ctx,
                            "level already has a branch set without applyToBranches",
                        ));
                    }
                    if targets.is_empty() {
                        return Err(self.error(ctx, "applyToBranches is empty"));
                    }
                    targets.clone()
                }
            };

            for target in &targets {
                let Some(r) = self.index.get(target).copied() else {
                    return Err(self.error(
                        ctx,
                        format!("applyToBranches references unknown branch '{target}'"),
                    ));
                };
                let owner_level = self.branch_sets[r.set.0].level;
                if owner_level + 1 != level {
                    return Err(self.error(
                        ctx,
                        format!(
                            "applyToBranches must reference branches of the previous level ('{target}' is on level {})",
                            owner_level + 1
                        ),
                    ));
                }
                if self.branch_sets[r.set.0].branches[r.pos].child.is_some() {
                    return Err(self.error(
                        ctx,
                        format!("branch '{target}' is targeted by more than one branch set"),
                    ));
                }
                self.branch_sets[r.set.0].branches[r.pos].child = Some(id);
            }
        }

        for (pos, b) in set.branches.iter().enumerate() {
            self.index.insert(b.id.clone(), BranchRef { set: id, pos });
        }
        self.levels[level].push(id);
        self.branch_sets.push(set);
        Ok(())
    }

    fn finish(self) -> LogicTree {
        LogicTree {
            name: self.doc.name.clone(),
            kind: self.doc.kind,
            branch_sets: self.branch_sets,
            levels: self.levels,
            index: self.index,
        }
    }
}

fn missing_filter_value(filter: &Filter, inventory: &ModelInventory) -> Option<String> {
    match filter {
        Filter::TectonicRegionType(trt) if !inventory.tectonic_region_types.contains(trt) => Some(
            format!("tectonic region type '{trt}' is not declared by the referenced source models"),
        ),
        Filter::Sources(ids) => ids
            .iter()
            .find(|id| !inventory.source_ids.contains(*id))
            .map(|id| format!("source '{id}' is not declared by the referenced source models")),
        Filter::SourceType(kind) if !inventory.source_types.contains(kind) => Some(format!(
            "source type '{}' is not used by the referenced source models",
            kind.name()
        )),
        _ => None,
    }
}

fn parse_value(uncertainty: UncertaintyType, raw: &str) -> std::result::Result<UncertaintyValue, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty uncertaintyModel".to_string());
    }
    let float = |s: &str| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("'{s}' is not a number"))
    };

    match uncertainty {
        UncertaintyType::SourceModel => Ok(UncertaintyValue::SourceModel(raw.to_string())),
        UncertaintyType::GsimModel => Ok(UncertaintyValue::Gsim(raw.to_string())),
        UncertaintyType::MaxMagGrRelative | UncertaintyType::BGrRelative => {
            Ok(UncertaintyValue::Relative(float(raw)?))
        }
        UncertaintyType::MaxMagGrAbsolute => Ok(UncertaintyValue::Absolute(float(raw)?)),
        UncertaintyType::AbGrAbsolute => {
            let parts: Vec<&str> = raw.split_whitespace().collect();
            let [a, b] = parts.as_slice() else {
                return Err(format!("abGRAbsolute expects two numbers 'a b', got '{raw}'"));
            };
            Ok(UncertaintyValue::AbsolutePair(float(a)?, float(b)?))
        }
    }
}
