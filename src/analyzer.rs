//! The type analyzer: a class-metadata registry standing in for reflection.
//!
//! Rust has no runtime reflection, so every class the kernel can construct or
//! inject into registers a [`ClassMetadata`] record up front: the constructor
//! signature plus a construct closure, inject-marked properties with setter
//! closures, and inject-marked methods with apply/invoke closures. The
//! analyzer answers the same questions a reflection API would, from that
//! registry.

use crate::error::{ResolutionError, Result};
use crate::prototype::{ParameterPrototype, Visibility};
use crate::types::TypeDescriptor;
use crate::value::{ArgumentList, ArgumentValue, BoxedInstance, Instance};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// The injection marker attached to properties and methods.
///
/// Pure metadata: an optional explicit identifier override. Absent an
/// override, the member's declared type is the identifier to resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectMarker {
    pub abstract_id: Option<String>,
}

impl InjectMarker {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_abstract(identifier: impl Into<String>) -> Self {
        Self {
            abstract_id: Some(identifier.into()),
        }
    }
}

// =============================================================================
// Accessor closures
// =============================================================================

/// Builds an instance from resolved constructor arguments.
pub type ConstructFn = Arc<dyn Fn(&ArgumentList) -> Result<BoxedInstance> + Send + Sync>;

/// Writes a resolved value into a property of an instance under construction.
pub type PropertySetFn = Arc<dyn Fn(&mut (dyn Any + Send + Sync), Instance) -> Result<()> + Send + Sync>;

/// Calls an inject-marked method on an instance under construction.
pub type MethodApplyFn = Arc<dyn Fn(&mut (dyn Any + Send + Sync), &ArgumentList) -> Result<()> + Send + Sync>;

/// Calls a method on a shared receiver (or none, for statics) and returns the result.
pub type MethodInvokeFn =
    Arc<dyn Fn(Option<&Instance>, &ArgumentList) -> Result<ArgumentValue> + Send + Sync>;

/// Constructor signature plus the closure that runs it.
#[derive(Clone)]
pub struct ConstructorMeta {
    pub params: Vec<ParameterPrototype>,
    pub construct: ConstructFn,
}

/// One declared property.
#[derive(Clone)]
pub struct PropertyMeta {
    pub name: String,
    pub type_desc: Option<TypeDescriptor>,
    pub inject: Option<InjectMarker>,
    pub visibility: Visibility,
    pub set: PropertySetFn,
}

/// One declared method.
///
/// `apply` serves injection (mutable receiver, declaration order); `invoke`
/// serves the invocation executor (shared receiver, returns a value). A
/// method registers whichever of the two it supports.
#[derive(Clone)]
pub struct MethodMeta {
    pub name: String,
    pub params: Vec<ParameterPrototype>,
    pub inject: Option<InjectMarker>,
    pub is_static: bool,
    pub apply: Option<MethodApplyFn>,
    pub invoke: Option<MethodInvokeFn>,
}

/// Registered metadata for one class, interface, or enum.
pub struct ClassMetadata {
    name: String,
    instantiable: bool,
    constructor: Option<ConstructorMeta>,
    properties: Vec<PropertyMeta>,
    methods: Vec<MethodMeta>,
}

impl ClassMetadata {
    /// Start building metadata for an instantiable class.
    #[inline]
    pub fn builder(name: impl Into<String>) -> ClassMetadataBuilder {
        ClassMetadataBuilder::new(name)
    }

    /// Metadata for an interface: known to the analyzer, never instantiable.
    pub fn interface(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instantiable: false,
            constructor: None,
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_instantiable(&self) -> bool {
        self.instantiable
    }

    #[inline]
    pub fn constructor(&self) -> Option<&ConstructorMeta> {
        self.constructor.as_ref()
    }

    #[inline]
    pub fn properties(&self) -> &[PropertyMeta] {
        &self.properties
    }

    #[inline]
    pub fn methods(&self) -> &[MethodMeta] {
        &self.methods
    }

    /// Properties carrying the inject marker, in declaration order.
    pub fn injectable_properties(&self) -> Vec<&PropertyMeta> {
        self.properties
            .iter()
            .filter(|p| p.inject.is_some())
            .collect()
    }

    /// Methods carrying the inject marker, in declaration order.
    pub fn injectable_methods(&self) -> Vec<&MethodMeta> {
        self.methods.iter().filter(|m| m.inject.is_some()).collect()
    }

    pub fn method(&self, name: &str) -> Option<&MethodMeta> {
        self.methods.iter().find(|m| m.name == name)
    }
}

impl fmt::Debug for ClassMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMetadata")
            .field("name", &self.name)
            .field("instantiable", &self.instantiable)
            .field("has_constructor", &self.constructor.is_some())
            .field("properties", &self.properties.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Fluent builder for [`ClassMetadata`].
pub struct ClassMetadataBuilder {
    name: String,
    instantiable: bool,
    constructor: Option<ConstructorMeta>,
    properties: Vec<PropertyMeta>,
    methods: Vec<MethodMeta>,
}

impl ClassMetadataBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instantiable: true,
            constructor: None,
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Mark the class abstract or otherwise non-constructible.
    pub fn not_instantiable(mut self) -> Self {
        self.instantiable = false;
        self
    }

    /// Declare the constructor signature and the closure that runs it.
    ///
    /// Parameter positions are assigned from declaration order.
    pub fn constructor<F>(mut self, params: Vec<ParameterPrototype>, construct: F) -> Self
    where
        F: Fn(&ArgumentList) -> Result<BoxedInstance> + Send + Sync + 'static,
    {
        self.constructor = Some(ConstructorMeta {
            params: position_params(params),
            construct: Arc::new(construct),
        });
        self
    }

    /// Declare an inject-marked property resolved by its declared type.
    pub fn inject_property<F>(self, name: impl Into<String>, type_form: &str, set: F) -> Self
    where
        F: Fn(&mut (dyn Any + Send + Sync), Instance) -> Result<()> + Send + Sync + 'static,
    {
        self.inject_property_with(
            name,
            Some(type_form),
            InjectMarker::new(),
            Visibility::Public,
            set,
        )
    }

    /// Declare an inject-marked property with full control over marker and visibility.
    pub fn inject_property_with<F>(
        mut self,
        name: impl Into<String>,
        type_form: Option<&str>,
        marker: InjectMarker,
        visibility: Visibility,
        set: F,
    ) -> Self
    where
        F: Fn(&mut (dyn Any + Send + Sync), Instance) -> Result<()> + Send + Sync + 'static,
    {
        self.properties.push(PropertyMeta {
            name: name.into(),
            type_desc: type_form.map(TypeDescriptor::parse),
            inject: Some(marker),
            visibility,
            set: Arc::new(set),
        });
        self
    }

    /// Declare an inject-marked method called with resolved arguments after construction.
    pub fn inject_method<F>(
        mut self,
        name: impl Into<String>,
        params: Vec<ParameterPrototype>,
        apply: F,
    ) -> Self
    where
        F: Fn(&mut (dyn Any + Send + Sync), &ArgumentList) -> Result<()> + Send + Sync + 'static,
    {
        self.methods.push(MethodMeta {
            name: name.into(),
            params: position_params(params),
            inject: Some(InjectMarker::new()),
            is_static: false,
            apply: Some(Arc::new(apply)),
            invoke: None,
        });
        self
    }

    /// Declare a callable method on a shared receiver.
    pub fn method<F>(mut self, name: impl Into<String>, params: Vec<ParameterPrototype>, invoke: F) -> Self
    where
        F: Fn(Option<&Instance>, &ArgumentList) -> Result<ArgumentValue> + Send + Sync + 'static,
    {
        self.methods.push(MethodMeta {
            name: name.into(),
            params: position_params(params),
            inject: None,
            is_static: false,
            apply: None,
            invoke: Some(Arc::new(invoke)),
        });
        self
    }

    /// Declare a static method, invoked without a receiver.
    pub fn static_method<F>(
        mut self,
        name: impl Into<String>,
        params: Vec<ParameterPrototype>,
        invoke: F,
    ) -> Self
    where
        F: Fn(Option<&Instance>, &ArgumentList) -> Result<ArgumentValue> + Send + Sync + 'static,
    {
        self.methods.push(MethodMeta {
            name: name.into(),
            params: position_params(params),
            inject: None,
            is_static: true,
            apply: None,
            invoke: Some(Arc::new(invoke)),
        });
        self
    }

    pub fn build(self) -> ClassMetadata {
        ClassMetadata {
            name: self.name,
            instantiable: self.instantiable,
            constructor: self.constructor,
            properties: self.properties,
            methods: self.methods,
        }
    }
}

fn position_params(mut params: Vec<ParameterPrototype>) -> Vec<ParameterPrototype> {
    for (position, param) in params.iter_mut().enumerate() {
        param.position = position;
    }
    params
}

// =============================================================================
// Analyzer
// =============================================================================

/// Concurrent registry of class metadata.
pub struct TypeAnalyzer {
    classes: DashMap<String, Arc<ClassMetadata>, RandomState>,
}

impl TypeAnalyzer {
    #[inline]
    pub fn new() -> Self {
        Self {
            classes: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Register (or replace) metadata for a class.
    pub fn register(&self, meta: ClassMetadata) {
        #[cfg(feature = "logging")]
        debug!(
            target: "keystone_di",
            class = meta.name(),
            instantiable = meta.is_instantiable(),
            "Registering class metadata"
        );

        self.classes.insert(meta.name().to_string(), Arc::new(meta));
    }

    /// Look up class metadata; absence is a `NotFound` error.
    pub fn reflect_class(&self, name: &str) -> Result<Arc<ClassMetadata>> {
        self.classes
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ResolutionError::not_found(name))
    }

    /// True iff the class, interface, or enum is known to the registry.
    #[inline]
    pub fn can_resolve_type(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// False for interfaces, abstract classes, and unknown names.
    pub fn is_instantiable(&self, name: &str) -> bool {
        self.classes
            .get(name)
            .map(|entry| entry.is_instantiable())
            .unwrap_or(false)
    }

    /// Inject-marked properties of a class, in declaration order.
    pub fn injectable_properties_of(&self, name: &str) -> Result<Vec<PropertyMeta>> {
        let meta = self.reflect_class(name)?;
        Ok(meta.injectable_properties().into_iter().cloned().collect())
    }

    /// Inject-marked methods of a class, in declaration order.
    pub fn injectable_methods_of(&self, name: &str) -> Result<Vec<MethodMeta>> {
        let meta = self.reflect_class(name)?;
        Ok(meta.injectable_methods().into_iter().cloned().collect())
    }

    /// Normalize a descriptor into its string form.
    #[inline]
    pub fn format_type(&self, descriptor: &TypeDescriptor) -> String {
        descriptor.format()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for TypeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeAnalyzer")
            .field("classes", &self.classes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::prototype::ParameterPrototype;

    struct Clock;
    struct Logger {
        clock: Option<Arc<Clock>>,
    }

    fn logger_metadata() -> ClassMetadata {
        ClassMetadata::builder("pkg.Logger")
            .constructor(vec![], |_args| {
                Ok(Box::new(Logger { clock: None }) as BoxedInstance)
            })
            .inject_property("clock", "pkg.Clock", |target, value| {
                let logger = target
                    .downcast_mut::<Logger>()
                    .ok_or_else(|| ResolutionError::container_state("bad target"))?;
                logger.clock = Arc::clone(&value).downcast::<Clock>().ok();
                Ok(())
            })
            .build()
    }

    #[test]
    fn test_register_and_reflect() {
        let analyzer = TypeAnalyzer::new();
        analyzer.register(logger_metadata());

        assert!(analyzer.can_resolve_type("pkg.Logger"));
        assert!(analyzer.is_instantiable("pkg.Logger"));
        let meta = analyzer.reflect_class("pkg.Logger").unwrap();
        assert_eq!(meta.name(), "pkg.Logger");
    }

    #[test]
    fn test_reflect_missing_is_not_found() {
        let analyzer = TypeAnalyzer::new();
        let err = analyzer.reflect_class("pkg.Ghost").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_interface_not_instantiable() {
        let analyzer = TypeAnalyzer::new();
        analyzer.register(ClassMetadata::interface("pkg.WriterInterface"));

        assert!(analyzer.can_resolve_type("pkg.WriterInterface"));
        assert!(!analyzer.is_instantiable("pkg.WriterInterface"));
    }

    #[test]
    fn test_injectable_members_filtered() {
        let analyzer = TypeAnalyzer::new();
        analyzer.register(logger_metadata());

        let props = analyzer.injectable_properties_of("pkg.Logger").unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name, "clock");
        assert!(analyzer
            .injectable_methods_of("pkg.Logger")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_positions_assigned_in_declaration_order() {
        let meta = ClassMetadata::builder("pkg.Svc")
            .constructor(
                vec![
                    ParameterPrototype::new("a").of_type("pkg.A"),
                    ParameterPrototype::new("b").of_type("pkg.B"),
                ],
                |_args| Ok(Box::new(Clock) as BoxedInstance),
            )
            .build();

        let ctor = meta.constructor().unwrap();
        assert_eq!(ctor.params[0].position, 0);
        assert_eq!(ctor.params[1].position, 1);
    }
}
