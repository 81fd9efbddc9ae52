use std::collections::HashMap;
use std::sync::Arc;

use once_cell::race::OnceBox;
use tracing::trace;

use crate::catalog::CatalogExport;
use crate::configuration::Configuration;
use crate::definition::{ImportDefinition, PartDefinition};
use crate::type_ref::TypeRef;

/// The capability a compiled (generated) provider implements: the raw
/// export stream for an import, by exact contract name.
///
/// The provider core composes the full resolution protocol around this
/// seam: self-export interception, open-generic closing, constraint
/// filtering, and cardinality enforcement all live in the core, never in
/// the implementation.
pub trait ExportResolver: Send + Sync {
    /// Raw export candidates whose contract name equals the import's.
    fn exports_core(&self, import: &ImportDefinition) -> Vec<CatalogExport>;

    /// The boundary whose singleton table holds a shared part's instances;
    /// `None` for non-shared parts.
    fn sharing_boundary(&self, part: &PartDefinition) -> Option<String>;
}

/// Catalog-driven [`ExportResolver`]: resolves through a validated
/// [`Configuration`], playing the role a generated provider plays when no
/// code generation is involved.
///
/// Carries two flat slot arrays resolved lazily on first access. Races
/// between threads are benign: every contender computes the same value and
/// the first store wins.
pub struct CatalogResolver {
    configuration: Arc<Configuration>,
    /// contract name -> (part index, export index) in catalog order.
    contract_index: HashMap<String, Vec<(usize, usize)>>,
    type_slots: Box<[OnceBox<TypeRef>]>,
    manifest_slots: Box<[OnceBox<String>]>,
}

impl CatalogResolver {
    pub fn new(configuration: Arc<Configuration>) -> Self {
        let part_count = configuration.catalog().parts().len();
        let mut contract_index: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (part_index, part) in configuration.catalog().parts().iter().enumerate() {
            for (export_index, export) in part.exports.iter().enumerate() {
                contract_index
                    .entry(export.definition.contract_name.clone())
                    .or_default()
                    .push((part_index, export_index));
            }
        }
        Self {
            configuration,
            contract_index,
            type_slots: (0..part_count).map(|_| OnceBox::new()).collect(),
            manifest_slots: (0..part_count).map(|_| OnceBox::new()).collect(),
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    /// Part type for slot `index`, resolved on first access.
    fn part_type(&self, index: usize) -> &TypeRef {
        self.type_slots[index].get_or_init(|| {
            Box::new(self.configuration.catalog().parts()[index].type_ref.clone())
        })
    }

    /// Manifest (module prefix) for slot `index`, resolved on first access.
    fn part_manifest(&self, index: usize) -> &str {
        self.manifest_slots[index].get_or_init(|| {
            Box::new(
                self.configuration.catalog().parts()[index]
                    .type_ref
                    .manifest()
                    .to_string(),
            )
        })
    }
}

impl ExportResolver for CatalogResolver {
    fn exports_core(&self, import: &ImportDefinition) -> Vec<CatalogExport> {
        let Some(entries) = self.contract_index.get(&import.contract_name) else {
            return Vec::new();
        };
        entries
            .iter()
            .map(|&(part_index, export_index)| {
                trace!(
                    part = %self.part_type(part_index),
                    manifest = self.part_manifest(part_index),
                    contract = %import.contract_name,
                    "export candidate"
                );
                let part = &self.configuration.catalog().parts()[part_index];
                let export = &part.exports[export_index];
                CatalogExport {
                    part: part.clone(),
                    definition: export.definition.clone(),
                    member: export.member.clone(),
                    type_args: Vec::new(),
                }
            })
            .collect()
    }

    fn sharing_boundary(&self, part: &PartDefinition) -> Option<String> {
        if part.is_shared {
            Some(self.configuration.effective_sharing_boundary(part))
        } else {
            None
        }
    }
}
