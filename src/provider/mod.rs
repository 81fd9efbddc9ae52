pub mod lazy;
pub mod resolver;

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::catalog::CatalogExport;
use crate::configuration::Configuration;
use crate::definition::{
    Disposer, ExportDefinition, ExportFactory, ImportCardinality, ImportDefinition, ImportValue,
    PartDefinition, PartValue,
};
use crate::error::CompositionError;
use crate::metadata::Metadata;
use crate::type_ref::TypeRef;

use self::lazy::{Lazy, LazyExport};
use self::resolver::{CatalogResolver, ExportResolver};

/// Singleton table of one sharing boundary, shared across a provider
/// family (a child provider reuses its parent's tables by reference).
type SharedTable = Arc<Mutex<HashMap<TypeRef, LazyExport>>>;

/// Half-built shared parts of one resolution tree, letting mutual imports
/// resolve to the placeholder instead of recursing.
type Provisional = Arc<Mutex<HashMap<TypeRef, PartValue>>>;

fn new_provisional() -> Provisional {
    Arc::new(Mutex::new(HashMap::new()))
}

struct TrackedDisposable {
    value: PartValue,
    dispose: Disposer,
}

struct ProviderState {
    disposables: Vec<TrackedDisposable>,
    disposed: bool,
}

struct ProviderInner {
    /// Self-reference handed to value factories, so a cached lazy never
    /// keeps its provider alive.
    weak_self: Weak<ProviderInner>,
    resolver: Arc<dyn ExportResolver>,
    /// Boundary name -> singleton table. Keys are fixed at construction;
    /// only [`ExportProvider::with_fresh_boundaries`] mints new ones.
    boundaries: HashMap<String, SharedTable>,
    state: Mutex<ProviderState>,
}

/// A single resolved export: its definition plus the lazily-constructed
/// value.
pub struct ResolvedExport {
    pub definition: ExportDefinition,
    lazy: LazyExport,
}

impl ResolvedExport {
    pub fn value(&self) -> Result<PartValue, CompositionError> {
        self.lazy.value()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.definition.metadata
    }
}

/// The runtime half of the engine: resolves imports against the catalog,
/// instantiates parts on demand, and deduplicates shared instances per
/// sharing boundary.
///
/// Thread-safe for concurrent resolution. Cheap to clone through its inner
/// `Arc`; disposal affects every handle.
#[derive(Clone)]
pub struct ExportProvider {
    inner: Arc<ProviderInner>,
}

/// The non-disposable self-export handed to parts that import the
/// provider. Disposing it is an error: the importer does not own the
/// provider's resources.
#[derive(Clone)]
pub struct ProviderFacade {
    inner: Weak<ProviderInner>,
}

impl ProviderFacade {
    /// A live handle to the owning provider.
    pub fn provider(&self) -> Result<ExportProvider, CompositionError> {
        self.inner
            .upgrade()
            .map(|inner| ExportProvider { inner })
            .ok_or(CompositionError::ProviderDisposed)
    }

    /// Always fails: the facade is an import, not the owner.
    pub fn dispose(&self) -> Result<(), CompositionError> {
        Err(CompositionError::SelfDispose)
    }
}

impl ExportProvider {
    /// Contract name under which every provider re-exports itself.
    /// Reserved: no user part may export it.
    pub const CONTRACT_NAME: &'static str = "part_composer::ExportProvider";

    /// A provider resolving through the given seam, with only the default
    /// (empty-named) sharing boundary active.
    pub fn new(resolver: Arc<dyn ExportResolver>) -> ExportProvider {
        let mut boundaries = HashMap::new();
        boundaries.insert(String::new(), new_table());
        ExportProvider {
            inner: Arc::new_cyclic(|weak_self| ProviderInner {
                weak_self: weak_self.clone(),
                resolver,
                boundaries,
                state: Mutex::new(ProviderState {
                    disposables: Vec::new(),
                    disposed: false,
                }),
            }),
        }
    }

    /// A provider resolving through a validated configuration.
    pub fn for_configuration(configuration: Arc<Configuration>) -> ExportProvider {
        Self::new(Arc::new(CatalogResolver::new(configuration)))
    }

    /// A child provider sharing this provider's singleton tables, plus a
    /// fresh table per named boundary. Parts created by the child are
    /// owned (and disposed) by the child.
    pub fn with_fresh_boundaries(
        &self,
        boundaries: impl IntoIterator<Item = String>,
    ) -> ExportProvider {
        let mut tables = self.inner.boundaries.clone();
        for name in boundaries {
            tables.insert(name, new_table());
        }
        ExportProvider {
            inner: Arc::new_cyclic(|weak_self| ProviderInner {
                weak_self: weak_self.clone(),
                resolver: self.inner.resolver.clone(),
                boundaries: tables,
                state: Mutex::new(ProviderState {
                    disposables: Vec::new(),
                    disposed: false,
                }),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Typed API
    // -----------------------------------------------------------------------

    /// Resolve the single export of `T` under its default contract name
    /// (`std::any::type_name::<T>()`).
    pub fn get_export<T: Any + Send + Sync>(&self) -> Result<Lazy<T>, CompositionError> {
        self.get_export_named(std::any::type_name::<T>())
    }

    /// Resolve the single export of `T` under an explicit contract name.
    /// Fails unless exactly one export matches.
    pub fn get_export_named<T: Any + Send + Sync>(
        &self,
        contract_name: &str,
    ) -> Result<Lazy<T>, CompositionError> {
        let import = ImportDefinition::new(contract_name, ImportCardinality::ExactlyOne);
        let resolved = self.exports_for(&import)?;
        let export = resolved
            .into_iter()
            .next()
            .ok_or_else(|| CompositionError::ImportCardinalityMismatch {
                contract: contract_name.to_string(),
                found: 0,
            })?;
        Ok(typed(export))
    }

    /// Resolve every export of `T` under its default contract name.
    pub fn get_exports<T: Any + Send + Sync>(&self) -> Result<Vec<Lazy<T>>, CompositionError> {
        self.get_exports_named(std::any::type_name::<T>())
    }

    /// Resolve every export of `T` under an explicit contract name.
    pub fn get_exports_named<T: Any + Send + Sync>(
        &self,
        contract_name: &str,
    ) -> Result<Vec<Lazy<T>>, CompositionError> {
        let import = ImportDefinition::new(contract_name, ImportCardinality::ZeroOrMore);
        let resolved = self.exports_for(&import)?;
        Ok(resolved.into_iter().map(typed).collect())
    }

    /// Eager value of [`ExportProvider::get_export`].
    pub fn get_exported_value<T: Any + Send + Sync>(&self) -> Result<Arc<T>, CompositionError> {
        self.get_export::<T>()?.value()
    }

    /// Eager values of [`ExportProvider::get_exports`].
    pub fn get_exported_values<T: Any + Send + Sync>(
        &self,
    ) -> Result<Vec<Arc<T>>, CompositionError> {
        self.get_exports::<T>()?.iter().map(Lazy::value).collect()
    }

    // -----------------------------------------------------------------------
    // Protocol-level resolution
    // -----------------------------------------------------------------------

    /// Resolve an import definition to its exports, each with a lazy value.
    ///
    /// One call is one resolution tree: every shared part constructed under
    /// it shares a provisional map, so mutually-importing parts observe each
    /// other's placeholder instead of recursing.
    pub fn exports_for(
        &self,
        import: &ImportDefinition,
    ) -> Result<Vec<ResolvedExport>, CompositionError> {
        if self.inner.state.lock().disposed {
            return Err(CompositionError::ProviderDisposed);
        }
        self.inner.resolve_imports(import, &new_provisional())
    }

    /// Dispose every part this provider created and tracked, exactly once.
    ///
    /// The tracked set is snapshotted under the lock; disposers run outside
    /// it so user code never executes under the provider lock. Subsequent
    /// calls are no-ops.
    pub fn dispose(&self) {
        let tracked = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.disposables)
        };
        debug!(count = tracked.len(), "disposing tracked parts");
        for item in &tracked {
            (item.dispose)(&item.value);
        }
    }
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.disposed {
            return;
        }
        state.disposed = true;
        for tracked in state.disposables.drain(..) {
            (tracked.dispose)(&tracked.value);
        }
    }
}

fn new_table() -> SharedTable {
    Arc::new(Mutex::new(HashMap::new()))
}

fn typed<T: Any + Send + Sync>(export: ResolvedExport) -> Lazy<T> {
    Lazy::new(
        export.lazy,
        export.definition.contract_name,
        export.definition.metadata,
    )
}

fn check_cardinality(
    import: &ImportDefinition,
    resolved: Vec<ResolvedExport>,
) -> Result<Vec<ResolvedExport>, CompositionError> {
    let found = resolved.len();
    let ok = match import.cardinality {
        ImportCardinality::ExactlyOne => found == 1,
        ImportCardinality::ZeroOrOne => found <= 1,
        ImportCardinality::ZeroOrMore => true,
    };
    if ok {
        Ok(resolved)
    } else {
        Err(CompositionError::ImportCardinalityMismatch {
            contract: import.contract_name.clone(),
            found,
        })
    }
}

impl ProviderInner {
    /// The resolution protocol: self-export interception, the raw resolver
    /// stream, open-generic closing, constraint filtering, a snapshot, and
    /// cardinality enforcement.
    fn resolve_imports(
        &self,
        import: &ImportDefinition,
        provisional: &Provisional,
    ) -> Result<Vec<ResolvedExport>, CompositionError> {
        // 1. The provider answers for its own contract directly.
        if import.contract_name == ExportProvider::CONTRACT_NAME {
            let facade: PartValue = Arc::new(ProviderFacade {
                inner: self.weak_self.clone(),
            });
            let resolved = vec![ResolvedExport {
                definition: ExportDefinition::new(ExportProvider::CONTRACT_NAME),
                lazy: LazyExport::completed(ExportProvider::CONTRACT_NAME, facade),
            }];
            return check_cardinality(import, resolved);
        }

        // 2. Raw stream from the resolver seam.
        let mut candidates = self.resolver.exports_core(import);

        // 3. Close open-generic candidates against the import's arguments.
        if let (Some(open_contract), Some(args)) =
            (import.open_generic_contract_name(), import.generic_parameters())
        {
            let mut derived = import.clone();
            derived.contract_name = open_contract;
            for open_export in self.resolver.exports_core(&derived) {
                candidates.push(open_export.close(args));
            }
        }

        // 4. Keep candidates satisfying every constraint.
        candidates.retain(|c| c.satisfies_constraints_of(import));
        trace!(contract = %import.contract_name, candidates = candidates.len(), "resolved import");

        // 5. Snapshot into concrete resolved exports.
        let resolved = candidates
            .into_iter()
            .map(|c| self.resolved_export(c, provisional))
            .collect::<Result<Vec<_>, _>>()?;

        // 6. Enforce the import's cardinality.
        check_cardinality(import, resolved)
    }

    /// Bind one catalog export to a lazy value, deduplicating the producing
    /// part through its sharing boundary's singleton table.
    fn resolved_export(
        &self,
        export: CatalogExport,
        provisional: &Provisional,
    ) -> Result<ResolvedExport, CompositionError> {
        let part = export.part.clone();
        let part_type = export.part_type();
        let boundary = self.resolver.sharing_boundary(&part);
        let non_shared_instance_required = boundary.is_none();

        let weak = self.weak_self.clone();
        let type_args = export.type_args.clone();
        let factory_part = part.clone();
        let factory_provisional = provisional.clone();
        let factory = move || {
            let inner = weak.upgrade().ok_or(CompositionError::ProviderDisposed)?;
            inner.instantiate_part(&factory_part, &type_args, &factory_provisional)
        };

        let part_lazy = self.get_or_create_shareable_value(
            part_type.clone(),
            factory,
            provisional,
            &boundary.unwrap_or_default(),
            non_shared_instance_required,
        )?;

        let lazy = match export.member {
            None => part_lazy,
            Some(member) => {
                let label = format!("{}::{}", part_type, member.member.name);
                LazyExport::from_factory(label, move || {
                    let instance = part_lazy.value()?;
                    member.extract_from(&instance)
                })
            }
        };

        Ok(ResolvedExport {
            definition: export.definition,
            lazy,
        })
    }

    /// At-most-one instantiation per (boundary, part type) pair.
    ///
    /// The table lock is held only for the lookup and insert; construction
    /// happens later, inside the lazy. The get-then-insert under one lock
    /// gives compare-and-get semantics: callers may receive another
    /// caller's winning lazy.
    fn get_or_create_shareable_value(
        &self,
        part_type: TypeRef,
        factory: impl Fn() -> Result<PartValue, CompositionError> + Send + Sync + 'static,
        provisional: &Provisional,
        boundary: &str,
        non_shared_instance_required: bool,
    ) -> Result<LazyExport, CompositionError> {
        let label = part_type.to_string();
        if non_shared_instance_required {
            return Ok(LazyExport::from_factory(label, factory));
        }

        // A half-built instance from this resolution tree breaks
        // construction recursion.
        if let Some(existing) = provisional.lock().get(&part_type) {
            return Ok(LazyExport::completed(label, existing.clone()));
        }

        let table = self.boundaries.get(boundary).ok_or_else(|| {
            CompositionError::BoundaryNotActive {
                boundary: boundary.to_string(),
            }
        })?;
        let mut table = table.lock();
        if let Some(existing) = table.get(&part_type) {
            return Ok(existing.clone());
        }
        let lazy = LazyExport::from_factory(label, factory);
        table.insert(part_type, lazy.clone());
        Ok(lazy)
    }

    /// Construct a part: resolve constructor imports, place the instance in
    /// the provisional map, satisfy importing members, track disposal.
    fn instantiate_part(
        &self,
        part: &Arc<PartDefinition>,
        type_args: &[TypeRef],
        provisional: &Provisional,
    ) -> Result<PartValue, CompositionError> {
        let ctor = part.importing_constructor.as_ref().ok_or_else(|| {
            CompositionError::MissingImportingConstructor {
                part: part.type_ref.to_string(),
            }
        })?;
        debug!(part = %part.type_ref, "instantiating part");

        let mut args = Vec::with_capacity(ctor.parameters.len());
        for binding in &ctor.parameters {
            args.push(self.resolve_import_value(&binding.import, provisional)?);
        }
        let instance = ctor.invoke(args, type_args)?;

        // The placeholder must be visible before member imports resolve, so
        // a mutual import of this part lands on the half-built instance.
        if part.is_shared {
            provisional
                .lock()
                .insert(part.type_ref.close(type_args), instance.clone());
        }

        for member in &part.importing_members {
            let value = self.resolve_import_value(&member.binding.import, provisional)?;
            member.set_on(&instance, value)?;
        }

        if let Some(dispose) = &part.disposer {
            self.track_disposable(instance.clone(), dispose.clone())?;
        }

        Ok(instance)
    }

    /// Shape one resolved import for injection, per its cardinality and
    /// factory flag.
    fn resolve_import_value(
        &self,
        import: &ImportDefinition,
        provisional: &Provisional,
    ) -> Result<ImportValue, CompositionError> {
        if import.is_export_factory {
            // Factories defer instantiation: each call re-resolves with a
            // fresh provisional map, so non-shared targets yield a fresh
            // instance per call.
            let mut inner_import = import.clone();
            inner_import.is_export_factory = false;
            let resolved = self.resolve_imports(&inner_import, &new_provisional())?;
            let factories = (0..resolved.len())
                .map(|index| {
                    let weak = self.weak_self.clone();
                    let factory_import = inner_import.clone();
                    ExportFactory::new(move || {
                        let inner =
                            weak.upgrade().ok_or(CompositionError::ProviderDisposed)?;
                        let resolved =
                            inner.resolve_imports(&factory_import, &new_provisional())?;
                        let found = resolved.len();
                        resolved
                            .into_iter()
                            .nth(index)
                            .ok_or_else(|| CompositionError::ImportCardinalityMismatch {
                                contract: factory_import.contract_name.clone(),
                                found,
                            })?
                            .value()
                    })
                })
                .collect();
            return Ok(ImportValue::Factories(factories));
        }

        let resolved = self.resolve_imports(import, provisional)?;
        match import.cardinality {
            ImportCardinality::ExactlyOne => {
                let export = resolved.into_iter().next().ok_or_else(|| {
                    CompositionError::ImportCardinalityMismatch {
                        contract: import.contract_name.clone(),
                        found: 0,
                    }
                })?;
                Ok(ImportValue::Single(export.value()?))
            }
            ImportCardinality::ZeroOrOne => {
                let value = match resolved.into_iter().next() {
                    Some(export) => Some(export.value()?),
                    None => None,
                };
                Ok(ImportValue::Optional(value))
            }
            ImportCardinality::ZeroOrMore => {
                let values = resolved
                    .iter()
                    .map(ResolvedExport::value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ImportValue::Multiple(values))
            }
        }
    }

    fn track_disposable(&self, value: PartValue, dispose: Disposer) -> Result<(), CompositionError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(CompositionError::ProviderDisposed);
        }
        state.disposables.push(TrackedDisposable { value, dispose });
        Ok(())
    }
}
