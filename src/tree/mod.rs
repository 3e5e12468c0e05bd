//! Logic tree model.
//!
//! A [`LogicTree`] is a leveled structure: every level holds one or more
//! [`BranchSet`]s, every branch set an ordered list of weighted [`Branch`]es.
//! A branch's child is the branch set of the next level that applies to it
//! (through `applyToBranches`, or the level's single unrestricted set).
//!
//! Branch sets live in an arena owned by the tree and are referenced by
//! [`BranchSetId`]; an unrestricted set is the child of every branch of the
//! previous level, which is exactly the cartesian product enumerated by the
//! resolver.
//!
//! - document format: [`document`]
//! - side-input inventory of declared sources: [`catalog`]
//! - validating parser: [`parse`]

use std::collections::HashMap;

use crate::domain::{Filter, TreeKind, UncertaintyType, UncertaintyValue};

pub mod catalog;
pub mod document;
pub mod parse;

pub use catalog::{ModelInventory, SourceCatalog};
pub use document::{BranchDocument, BranchSetDocument, LevelDocument, TreeDocument};
pub use parse::{WEIGHT_TOLERANCE, parse};

/// Index of a branch set inside its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchSetId(pub(crate) usize);

/// A weighted alternative at one decision point.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub id: String,
    pub weight: f64,
    pub value: UncertaintyValue,
    pub child: Option<BranchSetId>,
}

/// A set of mutually exclusive weighted alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchSet {
    pub id: String,
    pub level: usize,
    pub uncertainty: UncertaintyType,
    pub filter: Option<Filter>,
    pub apply_to_branches: Option<Vec<String>>,
    pub branches: Vec<Branch>,
}

impl BranchSet {
    pub fn weight_sum(&self) -> f64 {
        self.branches.iter().map(|b| b.weight).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BranchRef {
    set: BranchSetId,
    pos: usize,
}

/// A parsed, validated, immutable logic tree.
#[derive(Debug, Clone)]
pub struct LogicTree {
    name: String,
    kind: TreeKind,
    branch_sets: Vec<BranchSet>,
    levels: Vec<Vec<BranchSetId>>,
    index: HashMap<String, BranchRef>,
}

impl LogicTree {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Branch sets of a level, in document order.
    pub fn level(&self, level: usize) -> impl Iterator<Item = &BranchSet> {
        self.levels
            .get(level)
            .into_iter()
            .flat_map(|ids| ids.iter().map(|id| &self.branch_sets[id.0]))
    }

    /// The branch set on the first level.
    ///
    /// A parsed tree always has one (the parser rejects empty trees), and the
    /// first level never carries `applyToBranches`.
    pub fn root(&self) -> &BranchSet {
        &self.branch_sets[self.levels[0][0].0]
    }

    pub fn branch_set(&self, id: BranchSetId) -> &BranchSet {
        &self.branch_sets[id.0]
    }

    pub fn branch_sets(&self) -> impl Iterator<Item = &BranchSet> {
        self.branch_sets.iter()
    }

    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.index
            .get(id)
            .map(|r| &self.branch_sets[r.set.0].branches[r.pos])
    }

    /// The branch set owning a branch.
    pub fn owner(&self, branch_id: &str) -> Option<&BranchSet> {
        self.index.get(branch_id).map(|r| &self.branch_sets[r.set.0])
    }

    pub fn n_branches(&self) -> usize {
        self.index.len()
    }

    /// Tree-wide branch ids (unordered).
    pub fn branch_ids(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(|k| k.as_str())
    }

    /// Number of complete paths when every branch set applies to every parent.
    pub fn max_paths(&self) -> usize {
        self.levels
            .iter()
            .map(|ids| {
                ids.iter()
                    .map(|id| self.branch_sets[id.0].branches.len())
                    .max()
                    .unwrap_or(0)
            })
            .product()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;

    #[test]
    fn tree_indexes_every_branch() {
        let tree = two_level_tree();
        assert_eq!(tree.n_levels(), 2);
        assert_eq!(tree.n_branches(), 4);
        assert_eq!(tree.owner("b3").map(|s| s.id.as_str()), Some("bs2"));
        assert!(tree.branch("missing").is_none());
        assert_eq!(tree.max_paths(), 4);
    }

    #[test]
    fn unrestricted_set_is_child_of_every_previous_branch() {
        let tree = two_level_tree();
        let child_b1 = tree.branch("b1").and_then(|b| b.child);
        let child_b2 = tree.branch("b2").and_then(|b| b.child);
        assert!(child_b1.is_some());
        assert_eq!(child_b1, child_b2);
        assert!(tree.branch("b3").and_then(|b| b.child).is_none());
    }
}
