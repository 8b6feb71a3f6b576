//! Service definitions and the definition store.
//!
//! A definition binds an identifier to a concrete (class, factory, pre-built
//! instance, or alias) under a lifetime, with tags, constructor overrides,
//! contextual rules, and decorators. The store is the single registry the
//! pipeline consults; readers run concurrently, writers take the exclusive
//! lock, and `freeze()` turns every later write into an error.

use crate::error::{ResolutionError, Result};
use crate::value::{ArgumentValue, Instance};
use ahash::RandomState;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[cfg(feature = "logging")]
use tracing::debug;

/// Instance sharing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// New instance on every resolution.
    #[default]
    Transient,
    /// Shared within the current resolution scope.
    Scoped,
    /// Shared process-wide, stored in the root scope.
    Singleton,
    /// Pre-constructed; the bound instance is substituted directly.
    Instance,
}

impl Lifetime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::Transient => "transient",
            Lifetime::Scoped => "scoped",
            Lifetime::Singleton => "singleton",
            Lifetime::Instance => "instance",
        }
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Lifetime::Singleton)
    }

    #[inline]
    pub fn is_scoped(&self) -> bool {
        matches!(self, Lifetime::Scoped)
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Lifetime::Transient)
    }

    /// Whether resolved instances are stored in a scope at all.
    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self, Lifetime::Singleton | Lifetime::Scoped)
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Lifetime {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "transient" => Ok(Lifetime::Transient),
            "scoped" => Ok(Lifetime::Scoped),
            "singleton" => Ok(Lifetime::Singleton),
            "instance" => Ok(Lifetime::Instance),
            other => Err(ResolutionError::definition_conflict(format!(
                "unknown lifetime `{other}`"
            ))),
        }
    }
}

/// A user factory; receives a resolution-aware handle so nested `get` calls
/// keep the parent context (and with it, cycle detection).
pub type ServiceFactory =
    Arc<dyn Fn(&crate::kernel::FactoryContext) -> Result<Instance> + Send + Sync>;

/// What a definition binds its identifier to.
#[derive(Clone)]
pub enum Concrete {
    /// Construct the named class through its prototype.
    ClassName(String),
    /// Delegate construction to a user factory.
    Factory(ServiceFactory),
    /// Substitute a pre-built instance.
    PreBuilt(Instance),
    /// Redirect to another identifier.
    Alias(String),
}

impl Concrete {
    #[inline]
    pub fn class(name: impl Into<String>) -> Self {
        Concrete::ClassName(name.into())
    }

    #[inline]
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&crate::kernel::FactoryContext) -> Result<Instance> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(f))
    }

    #[inline]
    pub fn prebuilt<T: Send + Sync + 'static>(value: T) -> Self {
        Concrete::PreBuilt(Arc::new(value))
    }

    #[inline]
    pub fn prebuilt_instance(instance: Instance) -> Self {
        Concrete::PreBuilt(instance)
    }

    #[inline]
    pub fn alias(target: impl Into<String>) -> Self {
        Concrete::Alias(target.into())
    }

    /// True for concretes that bring their own construction.
    #[inline]
    pub fn is_factory_like(&self) -> bool {
        matches!(self, Concrete::Factory(_) | Concrete::PreBuilt(_))
    }
}

impl fmt::Debug for Concrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concrete::ClassName(name) => write!(f, "ClassName({name})"),
            Concrete::Factory(_) => write!(f, "Factory(<fn>)"),
            Concrete::PreBuilt(_) => write!(f, "PreBuilt(<instance>)"),
            Concrete::Alias(target) => write!(f, "Alias({target})"),
        }
    }
}

/// A decorator registration: the wrapping service and the parameter that
/// receives the wrapped instance.
#[derive(Debug, Clone)]
pub struct DecoratorSpec {
    pub service: String,
    pub parameter: String,
    /// Marks the decorator whose result is handed to callers.
    pub is_root: bool,
}

impl DecoratorSpec {
    pub fn new(service: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            parameter: parameter.into(),
            is_root: false,
        }
    }

    pub fn root(mut self) -> Self {
        self.is_root = true;
        self
    }
}

/// One service binding.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub identifier: String,
    pub concrete: Concrete,
    pub lifetime: Lifetime,
    pub tags: BTreeSet<String>,
    pub constructor_overrides: HashMap<String, ArgumentValue>,
    /// consumer identifier -> (needed identifier -> concrete override)
    pub contextual: HashMap<String, HashMap<String, Concrete>>,
    pub decorators: Vec<DecoratorSpec>,
}

impl ServiceDefinition {
    pub fn new(identifier: impl Into<String>, concrete: Concrete) -> Self {
        Self {
            identifier: identifier.into(),
            concrete,
            lifetime: Lifetime::default(),
            tags: BTreeSet::new(),
            constructor_overrides: HashMap::new(),
            contextual: HashMap::new(),
            decorators: Vec::new(),
        }
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn singleton(self) -> Self {
        self.lifetime(Lifetime::Singleton)
    }

    pub fn scoped(self) -> Self {
        self.lifetime(Lifetime::Scoped)
    }

    pub fn transient(self) -> Self {
        self.lifetime(Lifetime::Transient)
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Fix a constructor parameter to a literal or instance.
    pub fn override_arg(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.constructor_overrides.insert(name.into(), value);
        self
    }

    /// When `consumer` asks for `needed`, give `concrete` instead.
    pub fn when(
        mut self,
        consumer: impl Into<String>,
        needed: impl Into<String>,
        concrete: Concrete,
    ) -> Self {
        self.contextual
            .entry(consumer.into())
            .or_default()
            .insert(needed.into(), concrete);
        self
    }

    pub fn decorate_with(mut self, spec: DecoratorSpec) -> Self {
        self.decorators.push(spec);
        self
    }
}

// =============================================================================
// Store
// =============================================================================

/// Registry of service definitions.
pub struct DefinitionStore {
    defs: RwLock<HashMap<String, Arc<ServiceDefinition>, RandomState>>,
    contextual: RwLock<HashMap<String, HashMap<String, Concrete>, RandomState>>,
    tags: RwLock<HashMap<String, Vec<String>, RandomState>>,
    frozen: AtomicBool,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self {
            defs: RwLock::new(HashMap::with_hasher(RandomState::new())),
            contextual: RwLock::new(HashMap::with_hasher(RandomState::new())),
            tags: RwLock::new(HashMap::with_hasher(RandomState::new())),
            frozen: AtomicBool::new(false),
        }
    }

    /// Register a definition. Later definitions replace earlier ones until
    /// the store is frozen.
    pub fn define(&self, definition: ServiceDefinition) -> Result<()> {
        self.check_writable()?;

        if definition.identifier.is_empty() {
            return Err(ResolutionError::definition_conflict(
                "definition identifier must not be empty",
            ));
        }
        if definition.decorators.iter().filter(|d| d.is_root).count() > 1 {
            return Err(ResolutionError::definition_conflict(format!(
                "`{}` registers more than one root decorator",
                definition.identifier
            )));
        }

        let identifier = definition.identifier.clone();

        #[cfg(feature = "logging")]
        debug!(
            target: "keystone_di",
            service = identifier.as_str(),
            lifetime = definition.lifetime.as_str(),
            concrete = ?definition.concrete,
            tags = definition.tags.len(),
            "Registering service definition"
        );

        // Tag index: drop the old definition's entries, append the new ones.
        {
            let mut tags = self.tags.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            for ids in tags.values_mut() {
                ids.retain(|id| *id != identifier);
            }
            for tag in &definition.tags {
                tags.entry(tag.clone()).or_default().push(identifier.clone());
            }
        }

        // Contextual rules declared on the definition land in the store index.
        if !definition.contextual.is_empty() {
            let mut contextual = self.contextual.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (consumer, rules) in &definition.contextual {
                let slot = contextual.entry(consumer.clone()).or_default();
                for (needed, concrete) in rules {
                    slot.insert(needed.clone(), concrete.clone());
                }
            }
        }

        self.defs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(identifier, Arc::new(definition));
        Ok(())
    }

    /// Register `id` as an alias of `target`.
    pub fn alias(&self, id: impl Into<String>, target: impl Into<String>) -> Result<()> {
        let id = id.into();
        let target = target.into();

        // Walking from the target must not come back to the new alias.
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = target.clone();
        loop {
            if cursor == id {
                return Err(ResolutionError::definition_conflict(format!(
                    "alias cycle: `{id}` -> `{target}` closes a loop"
                )));
            }
            if !seen.insert(cursor.clone()) {
                break;
            }
            let next = {
                let defs = self.defs.read().unwrap_or_else(std::sync::PoisonError::into_inner);
                match defs.get(&cursor).map(|d| &d.concrete) {
                    Some(Concrete::Alias(next)) => next.clone(),
                    _ => break,
                }
            };
            cursor = next;
        }

        self.define(ServiceDefinition::new(id, Concrete::Alias(target)))
    }

    /// Follow alias links to the terminal identifier.
    pub fn resolve_alias(&self, id: &str) -> Result<String> {
        let defs = self.defs.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = id.to_string();
        while let Some(Concrete::Alias(next)) = defs.get(&cursor).map(|d| &d.concrete) {
            if !seen.insert(cursor.clone()) {
                return Err(ResolutionError::definition_conflict(format!(
                    "alias cycle detected at `{cursor}`"
                ))
                .with_identifier(id.to_string()));
            }
            cursor = next.clone();
        }
        Ok(cursor)
    }

    /// Register a contextual override used only when `consumer` is the
    /// immediate parent in the resolution chain.
    pub fn contextual(
        &self,
        consumer: impl Into<String>,
        needed: impl Into<String>,
        concrete: Concrete,
    ) -> Result<()> {
        self.check_writable()?;
        self.contextual
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(consumer.into())
            .or_default()
            .insert(needed.into(), concrete);
        Ok(())
    }

    pub fn contextual_for(&self, consumer: &str, needed: &str) -> Option<Concrete> {
        self.contextual
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(consumer)
            .and_then(|rules| rules.get(needed))
            .cloned()
    }

    /// Identifiers carrying `tag`, in registration order.
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        self.tags
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    #[inline]
    pub fn has(&self, id: &str) -> bool {
        self.defs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServiceDefinition>> {
        self.defs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<ServiceDefinition>> {
        self.defs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.defs.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disallow every further write.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: "keystone_di",
            definitions = self.len(),
            "Definition store frozen"
        );
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    #[inline]
    fn check_writable(&self) -> Result<()> {
        if self.is_frozen() {
            return Err(ResolutionError::container_state(
                "definition store is frozen; no further writes allowed",
            ));
        }
        Ok(())
    }
}

impl Default for DefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DefinitionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionStore")
            .field("definitions", &self.len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_define_and_replace() {
        let store = DefinitionStore::new();
        store
            .define(ServiceDefinition::new("svc", Concrete::class("pkg.A")).singleton())
            .unwrap();
        store
            .define(ServiceDefinition::new("svc", Concrete::class("pkg.B")))
            .unwrap();

        let def = store.get("svc").unwrap();
        assert!(matches!(&def.concrete, Concrete::ClassName(n) if n == "pkg.B"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_freeze_blocks_writes() {
        let store = DefinitionStore::new();
        store.freeze();

        let err = store
            .define(ServiceDefinition::new("svc", Concrete::class("pkg.A")))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContainerState);
    }

    #[test]
    fn test_alias_chain_resolution() {
        let store = DefinitionStore::new();
        store
            .define(ServiceDefinition::new("impl", Concrete::class("pkg.Impl")))
            .unwrap();
        store.alias("iface", "impl").unwrap();
        store.alias("shortcut", "iface").unwrap();

        assert_eq!(store.resolve_alias("shortcut").unwrap(), "impl");
        assert_eq!(store.resolve_alias("impl").unwrap(), "impl");
    }

    #[test]
    fn test_alias_cycle_rejected() {
        let store = DefinitionStore::new();
        store.alias("a", "b").unwrap();
        let err = store.alias("b", "a").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DefinitionConflict);
    }

    #[test]
    fn test_contextual_lookup() {
        let store = DefinitionStore::new();
        store
            .contextual("pkg.AuditService", "pkg.Writer", Concrete::class("pkg.AuditWriter"))
            .unwrap();

        assert!(store.contextual_for("pkg.AuditService", "pkg.Writer").is_some());
        assert!(store.contextual_for("pkg.Other", "pkg.Writer").is_none());
    }

    #[test]
    fn test_tagged_order_and_replacement() {
        let store = DefinitionStore::new();
        store
            .define(ServiceDefinition::new("a", Concrete::class("pkg.A")).tag("handlers"))
            .unwrap();
        store
            .define(ServiceDefinition::new("b", Concrete::class("pkg.B")).tag("handlers"))
            .unwrap();
        assert_eq!(store.tagged("handlers"), vec!["a", "b"]);

        // Redefining without the tag drops the entry.
        store
            .define(ServiceDefinition::new("a", Concrete::class("pkg.A2")))
            .unwrap();
        assert_eq!(store.tagged("handlers"), vec!["b"]);
    }

    #[test]
    fn test_two_root_decorators_rejected() {
        let store = DefinitionStore::new();
        let err = store
            .define(
                ServiceDefinition::new("svc", Concrete::class("pkg.A"))
                    .decorate_with(DecoratorSpec::new("d1", "inner").root())
                    .decorate_with(DecoratorSpec::new("d2", "inner").root()),
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DefinitionConflict);
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let store = DefinitionStore::new();
        let err = store
            .define(ServiceDefinition::new("", Concrete::class("pkg.A")))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DefinitionConflict);
    }
}
