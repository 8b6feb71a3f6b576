//! Normalized type descriptors.
//!
//! Parameter and property types are carried as tagged variants internally and
//! collapse to a string form only at cache and serialization boundaries:
//! union parts joined by `|`, intersection parts by `&`, nullable prefixed
//! with `?`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Type names the resolver treats as scalars.
///
/// Scalars are never resolved from the container; they come from overrides,
/// defaults, or the null sentinel.
const SCALAR_NAMES: &[&str] = &[
    "int", "integer", "long", "float", "double", "number", "string", "str", "bool", "boolean",
    "bytes", "array", "list", "map", "mixed", "scalar", "callable", "iterable", "null", "void",
    "any",
];

/// A normalized type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A single named class, interface, enum, or scalar.
    Named(String),
    /// A union of alternatives.
    Union(Vec<TypeDescriptor>),
    /// An intersection of requirements.
    Intersection(Vec<TypeDescriptor>),
    /// A nullable wrapper around a single inner type.
    Nullable(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    #[inline]
    pub fn named(name: impl Into<String>) -> Self {
        TypeDescriptor::Named(name.into())
    }

    #[inline]
    pub fn nullable(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Nullable(Box::new(inner))
    }

    /// Render the string form.
    pub fn format(&self) -> String {
        match self {
            TypeDescriptor::Named(name) => name.clone(),
            TypeDescriptor::Union(parts) => parts
                .iter()
                .map(TypeDescriptor::format)
                .collect::<Vec<_>>()
                .join("|"),
            TypeDescriptor::Intersection(parts) => parts
                .iter()
                .map(TypeDescriptor::format)
                .collect::<Vec<_>>()
                .join("&"),
            TypeDescriptor::Nullable(inner) => format!("?{}", inner.format()),
        }
    }

    /// Parse the string form back into a descriptor.
    ///
    /// Never fails: anything that is not a composite is a `Named`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix('?') {
            return TypeDescriptor::nullable(TypeDescriptor::parse(inner));
        }
        if s.contains('|') {
            return TypeDescriptor::Union(s.split('|').map(TypeDescriptor::parse).collect());
        }
        if s.contains('&') {
            return TypeDescriptor::Intersection(s.split('&').map(TypeDescriptor::parse).collect());
        }
        TypeDescriptor::Named(s.to_string())
    }

    /// True when a null value satisfies this type.
    pub fn allows_null(&self) -> bool {
        match self {
            TypeDescriptor::Nullable(_) => true,
            TypeDescriptor::Named(name) => name == "null" || name == "mixed",
            TypeDescriptor::Union(parts) => parts.iter().any(TypeDescriptor::allows_null),
            TypeDescriptor::Intersection(_) => false,
        }
    }

    /// True when every base name is a scalar.
    pub fn is_scalar(&self) -> bool {
        let names = self.base_names();
        !names.is_empty()
            && names
                .iter()
                .all(|name| SCALAR_NAMES.contains(&name.as_str()))
    }

    /// Candidate base names, in declaration order.
    ///
    /// For a union this is each alternative; the resolver tries them in order.
    pub fn base_names(&self) -> Vec<String> {
        match self {
            TypeDescriptor::Named(name) => vec![name.clone()],
            TypeDescriptor::Nullable(inner) => inner.base_names(),
            TypeDescriptor::Union(parts) | TypeDescriptor::Intersection(parts) => {
                parts.iter().flat_map(TypeDescriptor::base_names).collect()
            }
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

// String form at the serialization boundary.
impl Serialize for TypeDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for TypeDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TypeDescriptor::parse(&s))
    }
}

/// Check a bare name against the scalar set.
#[inline]
pub fn is_scalar_name(name: &str) -> bool {
    SCALAR_NAMES.contains(&name)
}
