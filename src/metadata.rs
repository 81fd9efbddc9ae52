use std::collections::BTreeMap;

use crate::type_ref::TypeRef;

/// Export/import metadata map.
///
/// `BTreeMap` keeps iteration deterministic so rendered names and DGML
/// output are stable across runs.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Reserved metadata key carrying the closed generic arguments of an import.
pub const GENERIC_PARAMETERS: &str = "GenericParameters";

/// A single metadata value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataValue {
    String(String),
    Bool(bool),
    Int(i64),
    Type(TypeRef),
    TypeList(Vec<TypeRef>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_type_list(&self) -> Option<&[TypeRef]> {
        match self {
            MetadataValue::TypeList(list) => Some(list),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

/// Generic arguments recorded on an import, if any.
pub(crate) fn generic_parameters(metadata: &Metadata) -> Option<&[TypeRef]> {
    metadata.get(GENERIC_PARAMETERS).and_then(|v| v.as_type_list())
}
