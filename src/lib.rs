mod catalog;
mod configuration;
mod definition;
mod dgml;
mod error;
mod loader;
mod metadata;
mod provider;
mod type_ref;

pub use catalog::{CatalogExport, ComposableCatalog};
pub use configuration::{ComposablePart, Configuration};
pub use definition::{
    Disposer, ExportConstraint, ExportDefinition, ExportFactory, ExportingMember,
    ImportCardinality, ImportDefinition, ImportDefinitionBinding, ImportSite, ImportValue,
    ImportingConstructor, ImportingMember, MemberExtractor, MemberKind, MemberRef, MemberSetter,
    PartConstructor, PartDefinition, PartExport, PartValue,
};
pub use error::CompositionError;
pub use loader::{load_factory, register_provider_factory, ExportProviderFactory};
pub use metadata::{Metadata, MetadataValue, GENERIC_PARAMETERS};
pub use provider::lazy::{Lazy, LazyExport};
pub use provider::resolver::{CatalogResolver, ExportResolver};
pub use provider::{ExportProvider, ProviderFacade, ResolvedExport};
pub use type_ref::TypeRef;
