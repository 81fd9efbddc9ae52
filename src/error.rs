use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("composition failed:\n{}", .reasons.join("\n"))]
    CompositionFailed { reasons: Vec<String> },

    #[error("cycle detected among non-shared parts starting at '{part}'")]
    CycleDetected { part: String },

    #[error("import '{contract}' cardinality violated: {found} matching export(s)")]
    ImportCardinalityMismatch { contract: String, found: usize },

    #[error("sharing boundary '{boundary}' has not been activated in this provider")]
    BoundaryNotActive { boundary: String },

    #[error("part '{part}' declares no importing constructor")]
    MissingImportingConstructor { part: String },

    #[error("recursive construction of '{part}': a constructor import cycled back into the part being built")]
    RecursiveConstruction { part: String },

    #[error("exported value for '{contract}' is not of the requested type")]
    TypeMismatch { contract: String },

    #[error("the export provider import cannot be disposed by the importing part")]
    SelfDispose,

    #[error("export provider has been disposed")]
    ProviderDisposed,

    #[error("no export provider factory registered under '{name}'")]
    UnknownProviderFactory { name: String },
}

impl CompositionError {
    /// Aggregate per-part failures into a single configure-time error.
    pub(crate) fn aggregate(reasons: Vec<String>) -> Self {
        CompositionError::CompositionFailed { reasons }
    }
}
