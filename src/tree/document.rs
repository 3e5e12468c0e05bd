//! Serialized logic tree documents.
//!
//! The on-disk form mirrors NRML naming so existing models translate
//! one-to-one:
//!
//! ```json
//! {
//!   "name": "sm-lt",
//!   "kind": "source_model",
//!   "branchingLevels": [
//!     {"id": "bl1", "branchSets": [
//!       {"id": "bs1", "uncertaintyType": "sourceModel", "branches": [
//!         {"id": "b1", "uncertaintyModel": "sm_a.xml", "uncertaintyWeight": 0.6},
//!         {"id": "b2", "uncertaintyModel": "sm_b.xml", "uncertaintyWeight": 0.4}
//!       ]}
//!     ]}
//!   ]
//! }
//! ```
//!
//! Nothing here is validated; see [`crate::tree::parse`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::TreeKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeDocument {
    #[serde(default)]
    pub name: String,
    pub kind: TreeKind,
    pub branching_levels: Vec<LevelDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDocument {
    pub id: String,
    pub branch_sets: Vec<BranchSetDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSetDocument {
    pub id: String,
    pub uncertainty_type: String,
    /// Filter name to value (`applyToTectonicRegionType`, `applyToSources`, `applyToSourceType`).
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub apply_to_branches: Option<Vec<String>>,
    pub branches: Vec<BranchDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDocument {
    pub id: String,
    pub uncertainty_model: String,
    pub uncertainty_weight: f64,
}

impl TreeDocument {
    /// Model names offered by `sourceModel` branch sets, in document order.
    ///
    /// Needed before parsing: the catalog the parser checks against is built
    /// from the sources of these models.
    pub fn source_model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for set in self.branching_levels.iter().flat_map(|l| &l.branch_sets) {
            if set.uncertainty_type != "sourceModel" {
                continue;
            }
            for branch in &set.branches {
                let name = branch.uncertainty_model.trim();
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_source_model_names_once() {
        let json = r#"{
            "kind": "source_model",
            "branchingLevels": [{"id": "bl1", "branchSets": [{
                "id": "bs1",
                "uncertaintyType": "sourceModel",
                "branches": [
                    {"id": "b1", "uncertaintyModel": "sm_a.xml", "uncertaintyWeight": 0.5},
                    {"id": "b2", "uncertaintyModel": " sm_b.xml ", "uncertaintyWeight": 0.3},
                    {"id": "b3", "uncertaintyModel": "sm_a.xml", "uncertaintyWeight": 0.2}
                ]
            }]}]
        }"#;
        let doc: TreeDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.source_model_names(), vec!["sm_a.xml", "sm_b.xml"]);
    }

    #[test]
    fn reads_nrml_style_names() {
        let json = r#"{
            "kind": "gsim",
            "branchingLevels": [{"id": "gl1", "branchSets": [{
                "id": "gs1",
                "uncertaintyType": "gmpeModel",
                "filters": {"applyToTectonicRegionType": "Active Shallow Crust"},
                "branches": [{"id": "g1", "uncertaintyModel": "ActiveCrustA", "uncertaintyWeight": 1.0}]
            }]}]
        }"#;
        let doc: TreeDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.kind, TreeKind::Gsim);
        assert!(doc.name.is_empty());
        let set = &doc.branching_levels[0].branch_sets[0];
        assert_eq!(set.filters.len(), 1);
        assert!(set.apply_to_branches.is_none());
        assert_eq!(set.branches[0].uncertainty_weight, 1.0);
    }
}
