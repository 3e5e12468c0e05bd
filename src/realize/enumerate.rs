//! Full enumeration of logic tree paths.
//!
//! Depth-first over the branch/child-set structure, so the output order is the
//! document order of branches level by level. Path weight is the product of
//! the chosen branch weights.

use crate::error::{HazardError, Result};
use crate::tree::{Branch, BranchSet, LogicTree};

/// One complete path through a single tree.
#[derive(Debug, Clone)]
pub struct TreePath<'a> {
    pub steps: Vec<(&'a BranchSet, &'a Branch)>,
    pub weight: f64,
}

impl<'a> TreePath<'a> {
    pub(crate) fn empty() -> Self {
        Self {
            steps: Vec::new(),
            weight: 1.0,
        }
    }

    pub fn branch_ids(&self) -> Vec<String> {
        self.steps.iter().map(|(_, b)| b.id.clone()).collect()
    }
}

/// Every path of `tree`, in deterministic traversal order.
pub fn enumerate_paths(tree: &LogicTree) -> Result<Vec<TreePath<'_>>> {
    let mut out = Vec::new();
    let mut prefix = Vec::with_capacity(tree.n_levels());
    walk(tree, tree.root(), 1.0, &mut prefix, &mut out)?;
    Ok(out)
}

fn walk<'a>(
    tree: &'a LogicTree,
    set: &'a BranchSet,
    weight: f64,
    prefix: &mut Vec<(&'a BranchSet, &'a Branch)>,
    out: &mut Vec<TreePath<'a>>,
) -> Result<()> {
    for branch in &set.branches {
        prefix.push((set, branch));
        let w = weight * branch.weight;
        match branch.child {
            Some(child) => walk(tree, tree.branch_set(child), w, prefix, out)?,
            None if set.level + 1 < tree.n_levels() => {
                return Err(HazardError::EmptyTree {
                    level: set.level + 2,
                    parent: branch.id.clone(),
                });
            }
            None => out.push(TreePath {
                steps: prefix.clone(),
                weight: w,
            }),
        }
        prefix.pop();
    }
    Ok(())
}
