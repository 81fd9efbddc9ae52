//! Process-wide registry of compiled export provider factories.
//!
//! A build step that generates a provider for a configuration registers its
//! factory here under a well-known name; application code loads it back by
//! that name without referencing the generating crate.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::CompositionError;
use crate::provider::ExportProvider;

/// Instantiates a compiled export provider.
pub type ExportProviderFactory = Arc<dyn Fn() -> ExportProvider + Send + Sync>;

static PROVIDER_FACTORIES: Lazy<Mutex<HashMap<String, ExportProviderFactory>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Register a provider factory under `name`, replacing any previous
/// registration.
pub fn register_provider_factory(
    name: impl Into<String>,
    factory: impl Fn() -> ExportProvider + Send + Sync + 'static,
) {
    PROVIDER_FACTORIES
        .lock()
        .insert(name.into(), Arc::new(factory));
}

/// Look up a previously registered provider factory.
pub fn load_factory(name: &str) -> Result<ExportProviderFactory, CompositionError> {
    PROVIDER_FACTORIES
        .lock()
        .get(name)
        .cloned()
        .ok_or_else(|| CompositionError::UnknownProviderFactory {
            name: name.to_string(),
        })
}
