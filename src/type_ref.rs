use std::fmt;
use std::sync::Arc;

/// Catalog-level identity of a part or exported value type.
///
/// Open generics carry an arity but no arguments; [`TypeRef::close`]
/// produces the specialized form. Equality and hashing are structural, so a
/// closed generic built twice from the same arguments is the same key in
/// the singleton tables.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef {
    name: Arc<str>,
    generic_arity: usize,
    generic_args: Vec<TypeRef>,
}

impl TypeRef {
    /// A non-generic type.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into().into(),
            generic_arity: 0,
            generic_args: Vec::new(),
        }
    }

    /// The `TypeRef` of a concrete Rust type, named after
    /// `std::any::type_name`.
    pub fn of<T: 'static>() -> Self {
        Self::named(std::any::type_name::<T>())
    }

    /// An open generic with `arity` unbound parameters.
    pub fn open(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into().into(),
            generic_arity: arity,
            generic_args: Vec::new(),
        }
    }

    /// Close an open generic against concrete arguments.
    ///
    /// Closing a non-generic or already-closed type returns a clone.
    pub fn close(&self, args: &[TypeRef]) -> TypeRef {
        if !self.is_open_generic() {
            return self.clone();
        }
        Self {
            name: self.name.clone(),
            generic_arity: self.generic_arity,
            generic_args: args.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generic_args(&self) -> &[TypeRef] {
        &self.generic_args
    }

    pub fn is_open_generic(&self) -> bool {
        self.generic_arity > 0 && self.generic_args.is_empty()
    }

    pub fn is_closed_generic(&self) -> bool {
        !self.generic_args.is_empty()
    }

    /// Crate/module prefix of the type name, used as its manifest identity.
    pub fn manifest(&self) -> &str {
        match self.name.rfind("::") {
            Some(split) => &self.name[..split],
            None => &self.name,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_generic() {
            return write!(f, "{}<>", self.name);
        }
        if self.generic_args.is_empty() {
            return write!(f, "{}", self.name);
        }
        write!(f, "{}<", self.name)?;
        for (i, arg) in self.generic_args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_specializes_and_renders() {
        let open = TypeRef::open("repo::Repository", 1);
        assert!(open.is_open_generic());
        assert_eq!(open.to_string(), "repo::Repository<>");

        let closed = open.close(&[TypeRef::named("Alpha")]);
        assert!(closed.is_closed_generic());
        assert_eq!(closed.to_string(), "repo::Repository<Alpha>");

        // Structural equality: closing twice yields the same key.
        assert_eq!(closed, open.close(&[TypeRef::named("Alpha")]));
        assert_ne!(closed, open.close(&[TypeRef::named("Beta")]));
    }

    #[test]
    fn manifest_is_module_prefix() {
        assert_eq!(TypeRef::named("a::b::Gamma").manifest(), "a::b");
        assert_eq!(TypeRef::named("Bare").manifest(), "Bare");
    }
}
