//! Inventory of what each source model declares.
//!
//! Filter values in a logic tree must name tectonic region types, source ids
//! or source types that the referenced source models actually contain. The
//! catalog is built from the source items (the output of source-model
//! parsing) and handed to the parser.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{SourceItem, SourceType};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInventory {
    pub tectonic_region_types: BTreeSet<String>,
    pub source_ids: BTreeSet<String>,
    pub source_types: BTreeSet<SourceType>,
}

impl ModelInventory {
    fn record(&mut self, item: &SourceItem) {
        self.tectonic_region_types
            .insert(item.tectonic_region_type.clone());
        self.source_ids.insert(item.id.clone());
        self.source_types.insert(item.source_type);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCatalog {
    models: BTreeMap<String, ModelInventory>,
}

impl SourceCatalog {
    pub fn from_sources(sources: &BTreeMap<String, Vec<SourceItem>>) -> Self {
        let models = sources
            .iter()
            .map(|(name, items)| {
                let mut inventory = ModelInventory::default();
                for item in items {
                    inventory.record(item);
                }
                (name.clone(), inventory)
            })
            .collect();
        Self { models }
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn model(&self, name: &str) -> Option<&ModelInventory> {
        self.models.get(name)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(|k| k.as_str())
    }

    /// Union of the inventories of `names` (unknown names are skipped).
    pub fn union_of<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> ModelInventory {
        let mut out = ModelInventory::default();
        for name in names {
            if let Some(inv) = self.models.get(name) {
                out.tectonic_region_types
                    .extend(inv.tectonic_region_types.iter().cloned());
                out.source_ids.extend(inv.source_ids.iter().cloned());
                out.source_types.extend(inv.source_types.iter().copied());
            }
        }
        out
    }

    /// Union of every model's inventory.
    pub fn all(&self) -> ModelInventory {
        self.union_of(self.models.keys().map(|k| k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::{catalog, source};

    #[test]
    fn union_merges_model_inventories() {
        let mut sources = BTreeMap::new();
        sources.insert(
            "a".to_string(),
            vec![source("s1", "Active Shallow Crust", SourceType::Point)],
        );
        sources.insert(
            "b".to_string(),
            vec![source("s2", "Subduction Interface", SourceType::ComplexFault)],
        );
        let catalog = SourceCatalog::from_sources(&sources);

        let only_a = catalog.union_of(["a"]);
        assert!(only_a.source_ids.contains("s1"));
        assert!(!only_a.source_ids.contains("s2"));

        let all = catalog.all();
        assert_eq!(all.tectonic_region_types.len(), 2);
        assert!(all.source_types.contains(&SourceType::ComplexFault));
    }

    #[test]
    fn fixture_catalog_declares_both_models() {
        let catalog = catalog();
        assert!(catalog.has_model("sm_a.xml"));
        assert!(catalog.has_model("sm_b.xml"));
        assert_eq!(catalog.model_names().count(), 2);
    }
}
