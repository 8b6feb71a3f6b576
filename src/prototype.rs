//! Immutable service blueprints and the factory that builds them.
//!
//! A prototype is the cached, serializable summary of a class: its
//! constructor signature, inject-marked properties, and inject-marked
//! methods. Prototypes are pure data; the closures that act on instances
//! stay in the analyzer's class metadata.

use crate::analyzer::{ClassMetadata, TypeAnalyzer};
use crate::cache::PrototypeCache;
use crate::error::Result;
use crate::types::TypeDescriptor;
use crate::verify::{VerificationReport, Verifier, VerifyHints};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Member visibility, recorded for diagnostics.
///
/// Injection writes through regardless of visibility; the field exists so
/// reports can say what the source declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// One constructor or method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPrototype {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<TypeDescriptor>,
    pub has_default: bool,
    pub default_value: Option<serde_json::Value>,
    pub is_variadic: bool,
    pub allows_null: bool,
    pub required: bool,
    pub position: usize,
}

impl ParameterPrototype {
    /// A required parameter with no declared type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            has_default: false,
            default_value: None,
            is_variadic: false,
            allows_null: false,
            required: true,
            position: 0,
        }
    }

    /// Attach a type in string form (`?T`, `A|B`, `A&B` composites allowed).
    pub fn of_type(mut self, form: &str) -> Self {
        let descriptor = TypeDescriptor::parse(form);
        self.allows_null = self.allows_null || descriptor.allows_null();
        self.type_name = Some(descriptor);
        self
    }

    /// Attach a declared default; the parameter becomes optional.
    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.has_default = true;
        self.default_value = Some(value.into());
        self.required = false;
        self
    }

    /// Mark variadic; the parameter becomes optional.
    pub fn variadic(mut self) -> Self {
        self.is_variadic = true;
        self.required = false;
        self
    }

    /// Allow the null sentinel even without a `?` type form.
    pub fn nullable(mut self) -> Self {
        self.allows_null = true;
        self
    }
}

/// A named, ordered parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodPrototype {
    pub name: String,
    pub params: Vec<ParameterPrototype>,
}

impl MethodPrototype {
    pub fn new(name: impl Into<String>, mut params: Vec<ParameterPrototype>) -> Self {
        for (position, param) in params.iter_mut().enumerate() {
            param.position = position;
        }
        Self {
            name: name.into(),
            params,
        }
    }
}

/// An inject-marked property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyPrototype {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<TypeDescriptor>,
    /// Explicit identifier override from the inject marker; wins over the type.
    pub override_id: Option<String>,
    pub visibility: Visibility,
}

impl PropertyPrototype {
    /// The identifier this property resolves against.
    pub fn resolve_id(&self) -> Option<String> {
        if let Some(id) = &self.override_id {
            return Some(id.clone());
        }
        self.type_name
            .as_ref()
            .and_then(|t| t.base_names().into_iter().next())
    }
}

/// The immutable blueprint of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePrototype {
    pub class_name: String,
    pub constructor: Option<MethodPrototype>,
    pub properties: Vec<PropertyPrototype>,
    pub methods: Vec<MethodPrototype>,
    pub instantiable: bool,
}

impl ServicePrototype {
    /// Build the blueprint from registered class metadata.
    pub fn from_metadata(meta: &ClassMetadata) -> Self {
        let constructor = meta
            .constructor()
            .map(|c| MethodPrototype::new("constructor", c.params.clone()));

        let properties = meta
            .injectable_properties()
            .into_iter()
            .map(|p| PropertyPrototype {
                name: p.name.clone(),
                type_name: p.type_desc.clone(),
                override_id: p.inject.as_ref().and_then(|m| m.abstract_id.clone()),
                visibility: p.visibility,
            })
            .collect();

        let methods = meta
            .injectable_methods()
            .into_iter()
            .map(|m| MethodPrototype::new(m.name.clone(), m.params.clone()))
            .collect();

        Self {
            class_name: meta.name().to_string(),
            constructor,
            properties,
            methods,
            instantiable: meta.is_instantiable(),
        }
    }

    /// True when the class has any injection point.
    pub fn has_injection_points(&self) -> bool {
        !self.properties.is_empty() || !self.methods.is_empty()
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds prototypes, verifying before every cache write.
pub struct PrototypeFactory {
    analyzer: Arc<TypeAnalyzer>,
    cache: PrototypeCache,
    verifier: Verifier,
    /// Dev mode re-verifies on every build, even on cache hits.
    verify_on_hit: bool,
}

impl PrototypeFactory {
    pub fn new(analyzer: Arc<TypeAnalyzer>, cache: PrototypeCache) -> Self {
        let verifier = Verifier::new(Arc::clone(&analyzer));
        Self {
            analyzer,
            cache,
            verifier,
            verify_on_hit: false,
        }
    }

    /// Re-run the verifier on every `create_for`, including cache hits.
    pub fn with_verify_on_hit(mut self, enabled: bool) -> Self {
        self.verify_on_hit = enabled;
        self
    }

    /// Return the cached prototype or build, verify, and cache it.
    pub fn create_for(&self, class: &str) -> Result<Arc<ServicePrototype>> {
        self.create_with_hints(class, &VerifyHints::default())
    }

    /// As [`create_for`](Self::create_for), with definition-derived verifier hints.
    pub fn create_with_hints(
        &self,
        class: &str,
        hints: &VerifyHints,
    ) -> Result<Arc<ServicePrototype>> {
        if let Some(prototype) = self.cache.get(class) {
            #[cfg(feature = "logging")]
            trace!(
                target: "keystone_di",
                class = class,
                "Prototype served from cache"
            );

            if self.verify_on_hit {
                self.verifier.verify(&prototype, hints)?;
            }
            return Ok(prototype);
        }

        let meta = self.analyzer.reflect_class(class)?;
        let prototype = Arc::new(ServicePrototype::from_metadata(&meta));
        self.verifier.verify(&prototype, hints)?;
        self.cache.set(class, Arc::clone(&prototype));

        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            class = class,
            instantiable = prototype.instantiable,
            "Prototype built and cached"
        );

        Ok(prototype)
    }

    /// Verify a batch of classes, collecting per-class errors into a report.
    pub fn verify_batch<'a, I, F>(&self, classes: I, hints_for: F) -> VerificationReport
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&str) -> VerifyHints,
    {
        let mut report = VerificationReport::new();
        for class in classes {
            match self.analyzer.reflect_class(class) {
                Ok(meta) => {
                    let prototype = ServicePrototype::from_metadata(&meta);
                    if let Err(err) = self.verifier.verify(&prototype, &hints_for(class)) {
                        report.add(class, err);
                    }
                }
                Err(err) => report.add(class, err),
            }
        }
        report
    }

    /// Drop one class from both cache tiers.
    #[inline]
    pub fn invalidate(&self, class: &str) {
        self.cache.remove(class);
    }

    /// Drop everything from both cache tiers.
    #[inline]
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[inline]
    pub fn cache(&self) -> &PrototypeCache {
        &self.cache
    }
}
