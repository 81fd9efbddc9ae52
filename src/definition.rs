use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::CompositionError;
use crate::metadata::{Metadata, MetadataValue, GENERIC_PARAMETERS};
use crate::type_ref::TypeRef;

/// A type-erased part instance (or member-exported value).
pub type PartValue = Arc<dyn Any + Send + Sync>;

/// Constructs a part from its resolved constructor imports.
///
/// The second argument carries the generic arguments when the part is an
/// open generic specialized at resolution time; it is empty otherwise.
pub type PartConstructor =
    Arc<dyn Fn(Vec<ImportValue>, &[TypeRef]) -> Result<PartValue, CompositionError> + Send + Sync>;

/// Injects a resolved import into an already-constructed part instance.
pub type MemberSetter =
    Arc<dyn Fn(&PartValue, ImportValue) -> Result<(), CompositionError> + Send + Sync>;

/// Derives an exported value from a part instance (field read, property
/// get, getter invoke, or delegate binding).
pub type MemberExtractor =
    Arc<dyn Fn(&PartValue) -> Result<PartValue, CompositionError> + Send + Sync>;

/// Releases a part instance's resources on provider disposal.
pub type Disposer = Arc<dyn Fn(&PartValue) + Send + Sync>;

/// Required multiplicity of an import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportCardinality {
    ZeroOrOne,
    ExactlyOne,
    ZeroOrMore,
}

// ---------------------------------------------------------------------------
// Resolved import values
// ---------------------------------------------------------------------------

/// A deferred constructor for an export, handed to export-factory imports
/// instead of an immediate value.
#[derive(Clone)]
pub struct ExportFactory {
    create: Arc<dyn Fn() -> Result<PartValue, CompositionError> + Send + Sync>,
}

impl ExportFactory {
    pub(crate) fn new(
        create: impl Fn() -> Result<PartValue, CompositionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            create: Arc::new(create),
        }
    }

    /// Create a value from the underlying export. Non-shared targets yield
    /// a fresh instance per call; shared targets yield their singleton.
    pub fn create_export(&self) -> Result<PartValue, CompositionError> {
        (self.create)()
    }
}

/// What a constructor parameter or importing member receives, shaped by the
/// import's cardinality and factory flag.
pub enum ImportValue {
    /// `ExactlyOne`.
    Single(PartValue),
    /// `ZeroOrOne`.
    Optional(Option<PartValue>),
    /// `ZeroOrMore`, in resolution order.
    Multiple(Vec<PartValue>),
    /// Export-factory import: one deferred constructor per matching export.
    Factories(Vec<ExportFactory>),
}

impl ImportValue {
    pub fn into_single(self) -> Option<PartValue> {
        match self {
            ImportValue::Single(v) => Some(v),
            ImportValue::Optional(v) => v,
            _ => None,
        }
    }

    pub fn into_multiple(self) -> Option<Vec<PartValue>> {
        match self {
            ImportValue::Multiple(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_factories(self) -> Option<Vec<ExportFactory>> {
        match self {
            ImportValue::Factories(v) => Some(v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Export side
// ---------------------------------------------------------------------------

/// Contract name plus metadata; the unit an import is matched against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportDefinition {
    pub contract_name: String,
    pub metadata: Metadata,
}

impl ExportDefinition {
    pub fn new(contract_name: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Identity of an exporting or importing member on a part type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef {
    pub kind: MemberKind,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Property,
    /// A method that is a property accessor; invoked with no arguments.
    Getter,
    /// Any other method; exported as a delegate bound to the instance.
    Method,
}

impl MemberRef {
    pub fn field(name: impl Into<String>) -> Self {
        Self { kind: MemberKind::Field, name: name.into() }
    }

    pub fn property(name: impl Into<String>) -> Self {
        Self { kind: MemberKind::Property, name: name.into() }
    }

    pub fn getter(name: impl Into<String>) -> Self {
        Self { kind: MemberKind::Getter, name: name.into() }
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self { kind: MemberKind::Method, name: name.into() }
    }
}

/// A member-attached export: the member identity plus the extractor that
/// derives the exported value from the part instance.
#[derive(Clone)]
pub struct ExportingMember {
    pub member: MemberRef,
    extract: MemberExtractor,
}

impl ExportingMember {
    pub fn new(
        member: MemberRef,
        extract: impl Fn(&PartValue) -> Result<PartValue, CompositionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            member,
            extract: Arc::new(extract),
        }
    }

    pub(crate) fn extract_from(&self, instance: &PartValue) -> Result<PartValue, CompositionError> {
        (self.extract)(instance)
    }
}

/// One export declared by a part: part-level when `member` is `None`,
/// member-level otherwise.
#[derive(Clone)]
pub struct PartExport {
    pub definition: ExportDefinition,
    pub member: Option<ExportingMember>,
}

// ---------------------------------------------------------------------------
// Import side
// ---------------------------------------------------------------------------

/// A satisfiability constraint an export candidate must pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportConstraint {
    /// Metadata under `key` must equal `value`.
    MetadataEquals { key: String, value: MetadataValue },
    /// Metadata under `key` must be present.
    HasMetadata { key: String },
    /// The export must originate from a part of exactly this type.
    PartTypeIs(TypeRef),
}

impl ExportConstraint {
    pub fn is_satisfied_by(&self, export: &ExportDefinition, part_type: &TypeRef) -> bool {
        match self {
            ExportConstraint::MetadataEquals { key, value } => {
                export.metadata.get(key) == Some(value)
            }
            ExportConstraint::HasMetadata { key } => export.metadata.contains_key(key),
            ExportConstraint::PartTypeIs(ty) => part_type == ty,
        }
    }
}

/// A dependency a part declares, resolved from matching exports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportDefinition {
    pub contract_name: String,
    pub cardinality: ImportCardinality,
    pub metadata: Metadata,
    pub constraints: Vec<ExportConstraint>,
    pub is_export_factory: bool,
}

impl ImportDefinition {
    pub fn new(contract_name: impl Into<String>, cardinality: ImportCardinality) -> Self {
        Self {
            contract_name: contract_name.into(),
            cardinality,
            metadata: Metadata::new(),
            constraints: Vec::new(),
            is_export_factory: false,
        }
    }

    /// Import of a closed generic contract: the contract name is the closed
    /// rendering of `open` and the arguments ride in metadata under
    /// [`GENERIC_PARAMETERS`].
    pub fn closed_generic(open: &TypeRef, args: &[TypeRef], cardinality: ImportCardinality) -> Self {
        let mut import = Self::new(open.close(args).to_string(), cardinality);
        import
            .metadata
            .insert(GENERIC_PARAMETERS.to_string(), MetadataValue::TypeList(args.to_vec()));
        import
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_constraint(mut self, constraint: ExportConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn as_export_factory(mut self) -> Self {
        self.is_export_factory = true;
        self
    }

    /// The open-generic contract name this import specializes, if it is a
    /// closed generic import.
    pub fn open_generic_contract_name(&self) -> Option<String> {
        crate::metadata::generic_parameters(&self.metadata)?;
        let base = self.contract_name.split('<').next().unwrap_or(&self.contract_name);
        Some(format!("{base}<>"))
    }

    pub fn generic_parameters(&self) -> Option<&[TypeRef]> {
        crate::metadata::generic_parameters(&self.metadata)
    }
}

/// Where on the part an import lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportSite {
    Member(MemberRef),
    /// Importing-constructor parameter, by position.
    Parameter(usize),
}

impl fmt::Display for ImportSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportSite::Member(m) => write!(f, "member '{}'", m.name),
            ImportSite::Parameter(i) => write!(f, "constructor parameter {i}"),
        }
    }
}

/// An import definition bound to its site on the owning part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportDefinitionBinding {
    pub import: ImportDefinition,
    pub site: ImportSite,
}

/// An importing member: binding plus the setter that injects the resolved
/// value into the instance.
#[derive(Clone)]
pub struct ImportingMember {
    pub binding: ImportDefinitionBinding,
    set: MemberSetter,
}

impl ImportingMember {
    pub fn new(
        member: MemberRef,
        import: ImportDefinition,
        set: impl Fn(&PartValue, ImportValue) -> Result<(), CompositionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            binding: ImportDefinitionBinding {
                import,
                site: ImportSite::Member(member),
            },
            set: Arc::new(set),
        }
    }

    pub(crate) fn set_on(&self, instance: &PartValue, value: ImportValue) -> Result<(), CompositionError> {
        (self.set)(instance, value)
    }
}

/// Ordered constructor-parameter bindings plus the constructor itself.
#[derive(Clone)]
pub struct ImportingConstructor {
    pub parameters: Vec<ImportDefinitionBinding>,
    construct: PartConstructor,
}

impl ImportingConstructor {
    pub fn new(
        imports: Vec<ImportDefinition>,
        construct: impl Fn(Vec<ImportValue>, &[TypeRef]) -> Result<PartValue, CompositionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        let parameters = imports
            .into_iter()
            .enumerate()
            .map(|(i, import)| ImportDefinitionBinding {
                import,
                site: ImportSite::Parameter(i),
            })
            .collect();
        Self {
            parameters,
            construct: Arc::new(construct),
        }
    }

    pub(crate) fn invoke(
        &self,
        imports: Vec<ImportValue>,
        type_args: &[TypeRef],
    ) -> Result<PartValue, CompositionError> {
        (self.construct)(imports, type_args)
    }
}

// ---------------------------------------------------------------------------
// Part definition
// ---------------------------------------------------------------------------

/// Everything the engine knows about one composable part type.
///
/// Definitions are immutable inputs, assembled by a discovery layer (or by
/// hand in tests) and handed to the catalog.
#[derive(Clone)]
pub struct PartDefinition {
    pub type_ref: TypeRef,
    pub exports: Vec<PartExport>,
    pub importing_members: Vec<ImportingMember>,
    pub importing_constructor: Option<ImportingConstructor>,
    pub is_shared: bool,
    pub sharing_boundary: String,
    pub sharing_boundary_inferred: bool,
    pub disposer: Option<Disposer>,
}

impl PartDefinition {
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            exports: Vec::new(),
            importing_members: Vec::new(),
            importing_constructor: None,
            is_shared: false,
            sharing_boundary: String::new(),
            sharing_boundary_inferred: false,
            disposer: None,
        }
    }

    /// Add a part-level export.
    pub fn with_export(mut self, definition: ExportDefinition) -> Self {
        self.exports.push(PartExport {
            definition,
            member: None,
        });
        self
    }

    /// Add an export derived from a member of the part instance.
    pub fn with_member_export(mut self, definition: ExportDefinition, member: ExportingMember) -> Self {
        self.exports.push(PartExport {
            definition,
            member: Some(member),
        });
        self
    }

    pub fn with_importing_member(mut self, member: ImportingMember) -> Self {
        self.importing_members.push(member);
        self
    }

    pub fn with_constructor(
        mut self,
        imports: Vec<ImportDefinition>,
        construct: impl Fn(Vec<ImportValue>, &[TypeRef]) -> Result<PartValue, CompositionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.importing_constructor = Some(ImportingConstructor::new(imports, construct));
        self
    }

    /// Shared in the default (empty-named) boundary.
    pub fn shared(mut self) -> Self {
        self.is_shared = true;
        self
    }

    /// Shared within a named boundary.
    pub fn shared_in(mut self, boundary: impl Into<String>) -> Self {
        self.is_shared = true;
        self.sharing_boundary = boundary.into();
        self
    }

    /// Shared, with the boundary inferred from the part's transitive
    /// dependencies at configuration time.
    pub fn with_inferred_boundary(mut self) -> Self {
        self.is_shared = true;
        self.sharing_boundary_inferred = true;
        self
    }

    pub fn with_disposer(mut self, dispose: impl Fn(&PartValue) + Send + Sync + 'static) -> Self {
        self.disposer = Some(Arc::new(dispose));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// All import bindings of this part: importing members first, then
    /// constructor parameters in declaration order.
    pub fn import_bindings(&self) -> Vec<ImportDefinitionBinding> {
        let mut bindings: Vec<ImportDefinitionBinding> = self
            .importing_members
            .iter()
            .map(|m| m.binding.clone())
            .collect();
        if let Some(ctor) = &self.importing_constructor {
            bindings.extend(ctor.parameters.iter().cloned());
        }
        bindings
    }
}

impl fmt::Debug for PartDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartDefinition")
            .field("type_ref", &self.type_ref)
            .field("exports", &self.exports.len())
            .field("imports", &self.import_bindings().len())
            .field("is_shared", &self.is_shared)
            .field("sharing_boundary", &self.sharing_boundary)
            .field("sharing_boundary_inferred", &self.sharing_boundary_inferred)
            .finish()
    }
}
