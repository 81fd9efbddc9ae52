use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::catalog::{CatalogExport, ComposableCatalog};
use crate::definition::{
    ExportDefinition, ImportCardinality, ImportDefinitionBinding, PartDefinition,
};
use crate::error::CompositionError;
use crate::provider::ExportProvider;
use crate::type_ref::TypeRef;

/// An immutable, validated part: its definition, the exports satisfying
/// each of its imports, and the sharing boundaries it requires.
pub struct ComposablePart {
    pub definition: Arc<PartDefinition>,
    /// Import bindings in definition order, each with its satisfying
    /// exports in catalog order. Every key originates from the owning
    /// part's definition.
    pub satisfying_exports: Vec<(ImportDefinitionBinding, Vec<CatalogExport>)>,
    pub required_sharing_boundaries: BTreeSet<String>,
}

/// Per-part scratch state while the graph is being resolved.
struct PartBuilder {
    definition: Arc<PartDefinition>,
    satisfying_exports: Vec<(ImportDefinitionBinding, Vec<CatalogExport>)>,
    required_boundaries: BTreeSet<String>,
}

/// The validated product of composition: the working catalog (including the
/// synthesized provider part), the resolved parts, and the inferred
/// boundary overrides.
pub struct Configuration {
    catalog: ComposableCatalog,
    parts: Vec<ComposablePart>,
    inferred_boundary_overrides: HashMap<TypeRef, String>,
    reference_assemblies: BTreeSet<String>,
}

impl Configuration {
    /// Resolve and validate a catalog into a configuration.
    ///
    /// Deterministic in catalog iteration order: the same catalog always
    /// produces the same parts, the same satisfying-export lists, and the
    /// same inferred boundary names.
    pub fn create(catalog: ComposableCatalog) -> Result<Configuration, CompositionError> {
        // 1. Pre-validation: the provider contract is reserved, and part
        //    types must be unique.
        let mut reasons = Vec::new();
        {
            let mut seen_types: BTreeSet<&TypeRef> = BTreeSet::new();
            for part in catalog.parts() {
                if !seen_types.insert(&part.type_ref) {
                    reasons.push(format!("duplicate part type '{}' in catalog", part.type_ref));
                }
                for export in &part.exports {
                    if export.definition.contract_name == ExportProvider::CONTRACT_NAME {
                        reasons.push(format!(
                            "part '{}' exports the reserved export provider contract",
                            part.type_ref
                        ));
                    }
                }
            }
        }
        if !reasons.is_empty() {
            return Err(CompositionError::aggregate(reasons));
        }

        // 2. Synthesize the provider's own part so parts can import it like
        //    any other export.
        let mut catalog = catalog;
        catalog.add_part(provider_part_definition());

        // 3. Construct part builders: collect each part's import bindings
        //    and resolve their satisfying exports.
        let mut builders: Vec<PartBuilder> = Vec::with_capacity(catalog.parts().len());
        let mut index_of: HashMap<TypeRef, usize> = HashMap::new();
        for (index, part) in catalog.parts().iter().enumerate() {
            index_of.insert(part.type_ref.clone(), index);
            let satisfying_exports = part
                .import_bindings()
                .into_iter()
                .map(|binding| {
                    let exports = catalog.exports_for(&binding.import);
                    (binding, exports)
                })
                .collect();
            builders.push(PartBuilder {
                definition: part.clone(),
                satisfying_exports,
                required_boundaries: BTreeSet::new(),
            });
        }

        // 4. Wire importer back-edges. Factory imports defer instantiation
        //    across boundaries, so they contribute no back-edge.
        let mut importers: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); builders.len()];
        for (importer_index, builder) in builders.iter().enumerate() {
            for (binding, exports) in &builder.satisfying_exports {
                if binding.import.is_export_factory {
                    continue;
                }
                for export in exports {
                    if let Some(&producer_index) = index_of.get(&export.part.type_ref) {
                        importers[producer_index].insert(importer_index);
                    }
                }
            }
        }

        // 5. Propagate each part's declared boundary to its transitive
        //    importers.
        for index in 0..builders.len() {
            let boundary = builders[index].definition.sharing_boundary.clone();
            propagate_boundary(&mut builders, &importers, index, &boundary);
        }

        // 6. Synthesize inferred boundary names: required boundaries joined
        //    with '-' in sorted order, so identical dependency sets yield
        //    identical names.
        let mut inferred_boundary_overrides: HashMap<TypeRef, String> = HashMap::new();
        for builder in &builders {
            if builder.definition.sharing_boundary_inferred {
                let joined: Vec<&str> =
                    builder.required_boundaries.iter().map(String::as_str).collect();
                let name = joined.join("-");
                trace!(part = %builder.definition.type_ref, boundary = %name, "inferred sharing boundary");
                inferred_boundary_overrides.insert(builder.definition.type_ref.clone(), name);
            }
        }

        // 7. Materialize the immutable parts.
        let parts: Vec<ComposablePart> = builders
            .into_iter()
            .map(|b| ComposablePart {
                definition: b.definition,
                satisfying_exports: b.satisfying_exports,
                required_sharing_boundaries: b.required_boundaries,
            })
            .collect();

        // 8. Validate each part against its import cardinalities.
        let mut reasons = Vec::new();
        for part in &parts {
            validate_part(part, &mut reasons);
        }
        if !reasons.is_empty() {
            return Err(CompositionError::aggregate(reasons));
        }

        // 9. Non-shared cycles cannot be instantiated; shared parts break
        //    construction recursion at runtime and are allowed to cycle.
        if let Some(part) = find_non_shared_cycle(&parts, &index_of) {
            return Err(CompositionError::CycleDetected {
                part: part.to_string(),
            });
        }

        debug!(parts = parts.len(), "composition configuration created");
        Ok(Configuration {
            catalog,
            parts,
            inferred_boundary_overrides,
            reference_assemblies: BTreeSet::new(),
        })
    }

    /// The working catalog, including the synthesized provider part.
    pub fn catalog(&self) -> &ComposableCatalog {
        &self.catalog
    }

    pub fn parts(&self) -> &[ComposablePart] {
        &self.parts
    }

    pub fn part(&self, type_ref: &TypeRef) -> Option<&ComposablePart> {
        self.parts.iter().find(|p| &p.definition.type_ref == type_ref)
    }

    /// The boundary whose singleton table holds instances of a shared part.
    ///
    /// For parts with an inferred boundary this is the name synthesized at
    /// configuration time; otherwise the declared boundary.
    pub fn effective_sharing_boundary(&self, part: &PartDefinition) -> String {
        debug_assert!(part.is_shared, "effective sharing boundary of a non-shared part");
        if part.sharing_boundary_inferred {
            if let Some(inferred) = self.inferred_boundary_overrides.get(&part.type_ref) {
                return inferred.clone();
            }
        }
        part.sharing_boundary.clone()
    }

    /// Assemblies the external code generator should reference when
    /// emitting a compiled provider for this configuration.
    pub fn reference_assemblies(&self) -> &BTreeSet<String> {
        &self.reference_assemblies
    }

    /// A copy of this configuration with an extended reference set.
    pub fn with_reference_assemblies(
        mut self,
        assemblies: impl IntoIterator<Item = String>,
    ) -> Configuration {
        self.reference_assemblies.extend(assemblies);
        self
    }
}

/// The part definition standing in for the provider itself: a shared
/// export of the reserved contract. It is never constructed; the provider
/// intercepts the contract and answers with its own facade.
fn provider_part_definition() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::named(ExportProvider::CONTRACT_NAME))
        .with_export(ExportDefinition::new(ExportProvider::CONTRACT_NAME))
        .shared()
        .into_arc()
}

/// Monotone fixpoint: add `boundary` to the part and every transitive
/// importer reachable over non-factory back-edges.
fn propagate_boundary(
    builders: &mut [PartBuilder],
    importers: &[BTreeSet<usize>],
    start: usize,
    boundary: &str,
) {
    if boundary.is_empty() {
        return;
    }
    let mut stack = vec![start];
    while let Some(index) = stack.pop() {
        // Already present: every importer of this part has it too.
        if !builders[index].required_boundaries.insert(boundary.to_string()) {
            continue;
        }
        stack.extend(importers[index].iter().copied());
    }
}

fn validate_part(part: &ComposablePart, reasons: &mut Vec<String>) {
    for (binding, exports) in &part.satisfying_exports {
        let found = exports.len();
        let ok = match binding.import.cardinality {
            ImportCardinality::ExactlyOne => found == 1,
            ImportCardinality::ZeroOrOne => found <= 1,
            ImportCardinality::ZeroOrMore => true,
        };
        if !ok {
            reasons.push(format!(
                "part '{}': import '{}' at {} expected {:?}, found {} matching export(s)",
                part.definition.type_ref,
                binding.import.contract_name,
                binding.site,
                binding.import.cardinality,
                found
            ));
        }
    }
}

/// Breadth-first cycle search over the non-shared subgraph.
///
/// Edges follow every import, factory imports included. A cycle is
/// reported only when a walk returns to its own root; revisiting any other
/// node is a legal multi-path diamond, not a cycle.
fn find_non_shared_cycle<'a>(
    parts: &'a [ComposablePart],
    index_of: &HashMap<TypeRef, usize>,
) -> Option<&'a TypeRef> {
    let non_shared = |index: usize| !parts[index].definition.is_shared;

    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); parts.len()];
    for (importer_index, part) in parts.iter().enumerate() {
        if !non_shared(importer_index) {
            continue;
        }
        for (_, exports) in &part.satisfying_exports {
            for export in exports {
                if let Some(&producer_index) = index_of.get(&export.part.type_ref) {
                    if non_shared(producer_index) {
                        edges[importer_index].insert(producer_index);
                    }
                }
            }
        }
    }

    for root in (0..parts.len()).filter(|&i| non_shared(i)) {
        let mut visited: BTreeSet<usize> = BTreeSet::new();
        let mut queue: VecDeque<usize> = edges[root].iter().copied().collect();
        while let Some(index) = queue.pop_front() {
            if index == root {
                return Some(&parts[root].definition.type_ref);
            }
            if !visited.insert(index) {
                continue;
            }
            queue.extend(edges[index].iter().copied());
        }
    }
    None
}
