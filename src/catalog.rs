use std::sync::Arc;

use crate::definition::{ExportDefinition, ExportingMember, ImportDefinition, PartDefinition};
use crate::metadata::{MetadataValue, GENERIC_PARAMETERS};
use crate::type_ref::TypeRef;

/// An export candidate yielded by catalog matching: the producing part, the
/// (possibly closed) export definition, and the exporting member if any.
#[derive(Clone)]
pub struct CatalogExport {
    pub part: Arc<PartDefinition>,
    pub definition: ExportDefinition,
    pub member: Option<ExportingMember>,
    /// Generic arguments this export was closed against; empty for
    /// non-generic exports.
    pub type_args: Vec<TypeRef>,
}

impl CatalogExport {
    /// The singleton-table key for the producing part: its type, closed
    /// against this export's generic arguments.
    pub fn part_type(&self) -> TypeRef {
        if self.type_args.is_empty() {
            self.part.type_ref.clone()
        } else {
            self.part.type_ref.close(&self.type_args)
        }
    }

    /// Close an open-generic export against concrete type arguments.
    pub fn close(&self, args: &[TypeRef]) -> CatalogExport {
        let base = self.definition.contract_name.trim_end_matches("<>");
        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut definition = self.definition.clone();
        definition.contract_name = format!("{}<{}>", base, rendered.join(", "));
        definition
            .metadata
            .insert(GENERIC_PARAMETERS.to_string(), MetadataValue::TypeList(args.to_vec()));
        CatalogExport {
            part: self.part.clone(),
            definition,
            member: self.member.clone(),
            type_args: args.to_vec(),
        }
    }

    pub fn satisfies_constraints_of(&self, import: &ImportDefinition) -> bool {
        import
            .constraints
            .iter()
            .all(|c| c.is_satisfied_by(&self.definition, &self.part.type_ref))
    }
}

/// An ordered collection of part definitions.
///
/// Iteration order is insertion order; every catalog walk in the
/// configuration builder relies on that for determinism.
#[derive(Clone, Default)]
pub struct ComposableCatalog {
    parts: Vec<Arc<PartDefinition>>,
}

impl ComposableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a part definition.
    pub fn add_part(&mut self, part: Arc<PartDefinition>) -> &mut Self {
        self.parts.push(part);
        self
    }

    /// Add several part definitions at once.
    pub fn add_parts(&mut self, parts: impl IntoIterator<Item = Arc<PartDefinition>>) -> &mut Self {
        self.parts.extend(parts);
        self
    }

    pub fn parts(&self) -> &[Arc<PartDefinition>] {
        &self.parts
    }

    /// Raw candidates whose export contract name equals `contract_name`.
    ///
    /// No constraint filtering and no generic specialization; this is the
    /// lookup the resolver seam exposes to the provider, which layers both
    /// on top.
    pub fn exports_matching_contract(&self, contract_name: &str) -> Vec<CatalogExport> {
        let mut matches = Vec::new();
        for part in &self.parts {
            for export in &part.exports {
                if export.definition.contract_name == contract_name {
                    matches.push(CatalogExport {
                        part: part.clone(),
                        definition: export.definition.clone(),
                        member: export.member.clone(),
                        type_args: Vec::new(),
                    });
                }
            }
        }
        matches
    }

    /// Full matching protocol for one import: exact contract matches, plus
    /// open-generic candidates closed against the import's generic
    /// arguments, filtered by the import's constraints.
    ///
    /// This is what the configuration builder records as each part's
    /// satisfying exports; the provider reproduces the same protocol at
    /// runtime through the resolver seam.
    pub fn exports_for(&self, import: &ImportDefinition) -> Vec<CatalogExport> {
        let mut candidates = self.exports_matching_contract(&import.contract_name);

        if let (Some(open_contract), Some(args)) =
            (import.open_generic_contract_name(), import.generic_parameters())
        {
            for open in self.exports_matching_contract(&open_contract) {
                candidates.push(open.close(args));
            }
        }

        candidates.retain(|c| c.satisfies_constraints_of(import));
        candidates
    }
}
