//! The kernel facade: public API over the resolution machinery.
//!
//! Built once through [`KernelBuilder`], immutable after boot, safe to share
//! across threads. The fast path consults scope storage directly; everything
//! else constructs a resolution context and hands it to the engine.

use crate::analyzer::{ClassMetadata, TypeAnalyzer};
use crate::cache::PrototypeCache;
use crate::context::{KernelContext, ResolutionFlags};
use crate::definition::{Concrete, DefinitionStore, Lifetime, ServiceDefinition};
use crate::engine::{EngineServices, ResolutionEngine};
use crate::error::{ResolutionError, Result};
use crate::inject::{InjectionExecutor, InjectionInspection, InjectionReport};
use crate::instantiate::Instantiator;
use crate::invoke::{Callable, InvocationExecutor};
use crate::observe::{Metrics, Observer, Timeline};
use crate::prototype::{PrototypeFactory, ServicePrototype};
use crate::resolver::DependencyResolver;
use crate::scope::{ScopeGuard, ScopeId, ScopeManager};
use crate::trace::ResolutionTrace;
use crate::value::{seal, ArgumentValue, Instance};
use crate::verify::{VerificationReport, VerifyHints};
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "logging")]
use tracing::debug;

/// Runtime options, fixed at boot.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Autowire unregistered concrete classes.
    pub auto_define: bool,
    /// Require explicit registration; implies no autowiring.
    pub strict_mode: bool,
    /// Extra tracing; the verifier runs on every prototype build.
    pub dev_mode: bool,
    /// Resolution recursion limit.
    pub max_depth: u32,
    /// L1 prototype cache entries.
    pub prototype_cache_memory_size: usize,
    /// L2 prototype cache location; `None` disables the persistent tier.
    pub prototype_cache_dir: Option<PathBuf>,
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    /// Disallow definition writes once booted.
    pub freeze: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            auto_define: true,
            strict_mode: false,
            dev_mode: false,
            max_depth: 64,
            prototype_cache_memory_size: 256,
            prototype_cache_dir: None,
            metrics_enabled: true,
            tracing_enabled: true,
            freeze: false,
        }
    }
}

impl KernelConfig {
    #[inline]
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// The flags a resolution context runs under.
    pub(crate) fn flags(&self) -> ResolutionFlags {
        ResolutionFlags {
            strict: self.strict_mode,
            auto_define: self.auto_define && !self.strict_mode,
            dev_mode: self.dev_mode,
        }
    }
}

/// Fluent builder for [`KernelConfig`].
#[derive(Debug, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn auto_define(mut self, enabled: bool) -> Self {
        self.config.auto_define = enabled;
        self
    }

    pub fn strict_mode(mut self, enabled: bool) -> Self {
        self.config.strict_mode = enabled;
        self
    }

    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.config.dev_mode = enabled;
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn prototype_cache_memory_size(mut self, entries: usize) -> Self {
        self.config.prototype_cache_memory_size = entries;
        self
    }

    pub fn prototype_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.prototype_cache_dir = Some(dir.into());
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    pub fn tracing_enabled(mut self, enabled: bool) -> Self {
        self.config.tracing_enabled = enabled;
        self
    }

    pub fn freeze(mut self, enabled: bool) -> Self {
        self.config.freeze = enabled;
        self
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }
}

pub(crate) struct KernelInner {
    config: KernelConfig,
    analyzer: Arc<TypeAnalyzer>,
    store: Arc<DefinitionStore>,
    scopes: Arc<ScopeManager>,
    prototypes: Arc<PrototypeFactory>,
    engine: ResolutionEngine,
    invoker: InvocationExecutor,
    observer: Arc<Observer>,
}

/// The public container facade.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    #[inline]
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<KernelInner>) -> Self {
        Self { inner }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a service by identifier.
    pub fn get(&self, id: &str) -> Result<Instance> {
        if let Some(existing) = self.shared_fast_path(id)? {
            return Ok(existing);
        }
        let ctx = KernelContext::root(id, self.inner.config.flags(), HashMap::new());
        self.inner.engine.resolve(ctx)
    }

    /// Resolve and downcast to a concrete type.
    pub fn get_as<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>> {
        self.get(id)?.downcast::<T>().map_err(|_| {
            ResolutionError::container_state(format!(
                "`{id}` resolved to a different concrete type than requested"
            ))
        })
    }

    /// Resolve, returning the collected stage trace alongside the instance.
    pub fn get_traced(&self, id: &str) -> Result<(Instance, ResolutionTrace)> {
        let ctx = KernelContext::root(id, self.inner.config.flags(), HashMap::new());
        self.inner.engine.resolve_traced(ctx, false)
    }

    /// Resolve under a deadline. In-flight constructors are not interrupted;
    /// expiry surfaces as a `Timeout` error at the next stage boundary.
    pub fn get_within(&self, id: &str, timeout: Duration) -> Result<Instance> {
        if let Some(existing) = self.shared_fast_path(id)? {
            return Ok(existing);
        }
        let ctx = KernelContext::root_with_deadline(
            id,
            self.inner.config.flags(),
            HashMap::new(),
            Instant::now() + timeout,
        );
        self.inner.engine.resolve(ctx)
    }

    /// Resolve or `None`, without surfacing the error.
    #[inline]
    pub fn try_get(&self, id: &str) -> Option<Instance> {
        self.get(id).ok()
    }

    /// Whether the container can supply `id`.
    pub fn has(&self, id: &str) -> bool {
        let canonical = match self.inner.store.resolve_alias(id) {
            Ok(canonical) => canonical,
            Err(_) => return false,
        };
        self.inner.scopes.has(&canonical)
            || self.inner.store.has(&canonical)
            || self.inner.analyzer.can_resolve_type(&canonical)
    }

    /// Build a fresh instance with explicit overrides.
    ///
    /// Honors the lifetime except for the singleton short-circuit: with
    /// `strict_mode` off, an already-materialized singleton is returned as-is.
    /// Fresh instances are never stored in a scope.
    pub fn make(
        &self,
        id: &str,
        overrides: HashMap<String, ArgumentValue>,
    ) -> Result<Instance> {
        if !self.inner.config.strict_mode {
            let canonical = self.inner.store.resolve_alias(id)?;
            if let Some(def) = self.inner.store.get(&canonical) {
                if def.lifetime.is_singleton() {
                    if let Some(existing) =
                        self.inner.scopes.lookup_for(&canonical, def.lifetime)?
                    {
                        return Ok(existing);
                    }
                }
            }
        }
        let ctx = KernelContext::root(id, self.inner.config.flags(), overrides);
        self.inner.engine.resolve_fresh(ctx)
    }

    /// Call a callable with auto-resolved arguments.
    pub fn call(
        &self,
        callable: &Callable,
        overrides: HashMap<String, ArgumentValue>,
    ) -> Result<ArgumentValue> {
        let label = match callable {
            Callable::Function { name, .. } => name.clone(),
            Callable::Method { class, method, .. } => format!("{class}@{method}"),
            Callable::Expression(expr) => expr.clone(),
        };
        let ctx = KernelContext::root(label, self.inner.config.flags(), overrides.clone());
        self.inner
            .invoker
            .invoke(callable, &overrides, &ctx, &self.inner.engine)
    }

    // =========================================================================
    // Injection
    // =========================================================================

    /// Fill inject-marked properties and call inject-marked methods on an
    /// existing object of the named class. Returns the per-member report;
    /// in strict mode the first failure aborts.
    pub fn inject_into(
        &self,
        class: &str,
        target: &mut (dyn Any + Send + Sync),
    ) -> Result<InjectionReport> {
        let prototype = self
            .inner
            .prototypes
            .create_with_hints(class, &VerifyHints::new().with_factory(true))?;
        let ctx = KernelContext::root(class, self.inner.config.flags(), HashMap::new());
        let services = self.inner.engine.services()?;
        services.injector.inject(
            target,
            &prototype,
            &ctx,
            &self.inner.engine,
            self.inner.config.strict_mode,
        )
    }

    /// Whether the named class declares any injection point.
    pub fn can_inject(&self, class: &str) -> bool {
        self.inner
            .analyzer
            .reflect_class(class)
            .map(|meta| {
                !meta.injectable_properties().is_empty() || !meta.injectable_methods().is_empty()
            })
            .unwrap_or(false)
    }

    /// Enumerate injection points without resolving or calling anything.
    pub fn inspect_injection(&self, class: &str) -> Result<InjectionInspection> {
        let prototype = self
            .inner
            .prototypes
            .create_with_hints(class, &VerifyHints::new().with_factory(true))?;
        let services = self.inner.engine.services()?;
        Ok(services.injector.inspect(&prototype))
    }

    /// Build an instance straight from a prototype: resolve constructor
    /// arguments, construct, inject.
    pub fn resolve_prototype(&self, prototype: &ServicePrototype) -> Result<Instance> {
        let services = self.inner.engine.services()?;
        let ctx = KernelContext::root(
            prototype.class_name.clone(),
            self.inner.config.flags(),
            HashMap::new(),
        );

        let args = match &prototype.constructor {
            Some(constructor) => DependencyResolver::resolve_params(
                &constructor.params,
                &ctx,
                &HashMap::new(),
                &self.inner.engine,
            )?,
            None => crate::value::ArgumentList::new(),
        };
        let mut built = services
            .instantiator
            .construct(&prototype.class_name, &args)?;
        if prototype.has_injection_points() {
            services
                .injector
                .inject(built.as_mut(), prototype, &ctx, &self.inner.engine, true)?;
        }
        Ok(seal(built))
    }

    // =========================================================================
    // Definitions and scopes
    // =========================================================================

    /// Bind a pre-constructed instance under `id`.
    pub fn instance<T: Send + Sync + 'static>(&self, id: &str, value: T) -> Result<()> {
        self.inner.store.define(
            ServiceDefinition::new(id, Concrete::prebuilt(value)).lifetime(Lifetime::Instance),
        )
    }

    /// Open a resolution scope.
    pub fn begin_scope(&self) -> ScopeId {
        self.inner.scopes.begin_scope()
    }

    /// Close the current scope; popping the root is a `ScopeViolation`.
    pub fn end_scope(&self) -> Result<()> {
        self.inner.scopes.end_scope()
    }

    /// RAII scope handle that guarantees `end_scope` on every exit path.
    pub fn scope_guard(&self) -> ScopeGuard {
        ScopeGuard::open(Arc::clone(&self.inner.scopes))
    }

    /// Register a terminator called per scoped instance when a scope ends.
    pub fn with_terminator<F>(&self, terminator: F)
    where
        F: Fn(&str, &Instance) + Send + Sync + 'static,
    {
        self.inner.scopes.with_terminator(terminator);
    }

    /// Identifiers registered under `tag`, in registration order.
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        self.inner.store.tagged(tag)
    }

    /// Resolve every identifier registered under `tag`, in order.
    pub fn resolve_tagged(&self, tag: &str) -> Result<Vec<Instance>> {
        self.inner
            .store
            .tagged(tag)
            .iter()
            .map(|id| self.get(id))
            .collect()
    }

    /// Drop every stored singleton; the next `get` rebuilds.
    pub fn clear_singletons(&self) {
        self.inner.scopes.clear_root();

        #[cfg(feature = "logging")]
        debug!(target: "keystone_di", "Singleton scope cleared");
    }

    /// Build and cache prototypes ahead of first resolution.
    pub fn prewarm<'a, I: IntoIterator<Item = &'a str>>(&self, classes: I) -> VerificationReport {
        let mut report = VerificationReport::new();
        for class in classes {
            if let Err(err) = self.inner.prototypes.create_for(class) {
                report.add(class, err);
            }
        }
        report
    }

    /// Disallow further definition writes.
    pub fn freeze(&self) {
        self.inner.store.freeze();
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    #[inline]
    pub fn definition_count(&self) -> usize {
        self.inner.store.len()
    }

    /// The cached (or freshly built) prototype for a class.
    pub fn prototype(&self, class: &str) -> Result<Arc<ServicePrototype>> {
        self.inner
            .prototypes
            .create_with_hints(class, &VerifyHints::new().with_factory(true))
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<Metrics> {
        self.inner.observer.metrics()
    }

    #[inline]
    pub fn timeline(&self) -> &Arc<Timeline> {
        self.inner.observer.timeline()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Scope lookup for already-materialized shared instances.
    fn shared_fast_path(&self, id: &str) -> Result<Option<Instance>> {
        let canonical = self.inner.store.resolve_alias(id)?;
        if let Some(def) = self.inner.store.get(&canonical) {
            if def.lifetime.is_shared() {
                return self.inner.scopes.lookup_for(&canonical, def.lifetime);
            }
        }
        Ok(None)
    }

    /// Resolution entry point for factories: keeps the parent context so
    /// cycle detection spans reentrant `get` calls.
    pub(crate) fn resolve_with_parent(
        &self,
        id: &str,
        parent: &Arc<KernelContext>,
    ) -> Result<Instance> {
        if parent.contains(id) {
            let mut path = parent.path();
            path.push(id.to_string());
            return Err(ResolutionError::cycle(path));
        }
        self.inner.engine.resolve(parent.child(id))
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("definitions", &self.inner.store.len())
            .field("classes", &self.inner.analyzer.len())
            .field("scope_depth", &self.inner.scopes.depth())
            .field("frozen", &self.inner.store.is_frozen())
            .finish()
    }
}

/// Resolution-aware handle passed to user factories.
///
/// `get` goes through the calling resolution's context chain, so a factory
/// that resolves its own dependencies keeps cycle detection and depth
/// accounting intact.
pub struct FactoryContext {
    kernel: Kernel,
    parent: Arc<KernelContext>,
}

impl FactoryContext {
    pub(crate) fn new(kernel: Kernel, parent: Arc<KernelContext>) -> Self {
        Self { kernel, parent }
    }

    /// Resolve a dependency of the service under construction.
    pub fn get(&self, id: &str) -> Result<Instance> {
        self.kernel.resolve_with_parent(id, &self.parent)
    }

    /// Resolve and downcast.
    pub fn get_as<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>> {
        self.get(id)?.downcast::<T>().map_err(|_| {
            ResolutionError::container_state(format!(
                "`{id}` resolved to a different concrete type than requested"
            ))
        })
    }

    #[inline]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    #[inline]
    pub fn parent(&self) -> &Arc<KernelContext> {
        &self.parent
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects registrations during boot.
pub struct DefinitionBatch {
    pending: Vec<ServiceDefinition>,
}

impl DefinitionBatch {
    fn new() -> Self {
        Self {
            pending: Vec::with_capacity(8),
        }
    }

    pub fn define(&mut self, definition: ServiceDefinition) {
        self.pending.push(definition);
    }
}

/// Boot-time construction of a [`Kernel`].
pub struct KernelBuilder {
    config: KernelConfig,
    analyzer: Arc<TypeAnalyzer>,
    store: Arc<DefinitionStore>,
    scopes: Arc<ScopeManager>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            analyzer: Arc::new(TypeAnalyzer::new()),
            store: Arc::new(DefinitionStore::new()),
            scopes: Arc::new(ScopeManager::new()),
        }
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn configure<F: FnOnce(&mut KernelConfig)>(mut self, f: F) -> Self {
        f(&mut self.config);
        self
    }

    /// Register class metadata with the analyzer.
    pub fn register_class(self, meta: ClassMetadata) -> Self {
        self.analyzer.register(meta);
        self
    }

    /// Register an interface known to the analyzer but never instantiable.
    pub fn register_interface(self, name: impl Into<String>) -> Self {
        self.analyzer.register(ClassMetadata::interface(name));
        self
    }

    pub fn define(self, definition: ServiceDefinition) -> Result<Self> {
        self.store.define(definition)?;
        Ok(self)
    }

    /// Batch registration: one writable pass over the store.
    pub fn define_many<F: FnOnce(&mut DefinitionBatch)>(self, f: F) -> Result<Self> {
        let mut batch = DefinitionBatch::new();
        f(&mut batch);
        for definition in batch.pending {
            self.store.define(definition)?;
        }
        Ok(self)
    }

    pub fn alias(self, id: impl Into<String>, target: impl Into<String>) -> Result<Self> {
        self.store.alias(id, target)?;
        Ok(self)
    }

    pub fn contextual(
        self,
        consumer: impl Into<String>,
        needed: impl Into<String>,
        concrete: Concrete,
    ) -> Result<Self> {
        self.store.contextual(consumer, needed, concrete)?;
        Ok(self)
    }

    /// Bind a pre-constructed instance.
    pub fn instance<T: Send + Sync + 'static>(self, id: &str, value: T) -> Result<Self> {
        self.store.define(
            ServiceDefinition::new(id, Concrete::prebuilt(value)).lifetime(Lifetime::Instance),
        )?;
        Ok(self)
    }

    /// Register a terminator for scoped instances.
    pub fn with_terminator<F>(self, terminator: F) -> Self
    where
        F: Fn(&str, &Instance) + Send + Sync + 'static,
    {
        self.scopes.with_terminator(terminator);
        self
    }

    /// Assemble and wire the kernel.
    pub fn build(self) -> Result<Kernel> {
        let observer = Arc::new(Observer::new(
            self.config.metrics_enabled,
            self.config.tracing_enabled,
        ));

        let cache = match &self.config.prototype_cache_dir {
            Some(dir) => PrototypeCache::with_dir(self.config.prototype_cache_memory_size, dir),
            None => PrototypeCache::memory_only(self.config.prototype_cache_memory_size),
        };
        let prototypes = Arc::new(
            PrototypeFactory::new(Arc::clone(&self.analyzer), cache)
                .with_verify_on_hit(self.config.dev_mode),
        );

        let engine = ResolutionEngine::new();
        let services = Arc::new(EngineServices::new(
            Arc::clone(&self.analyzer),
            Arc::clone(&self.store),
            Arc::clone(&self.scopes),
            Arc::clone(&prototypes),
            Instantiator::new(Arc::clone(&self.analyzer)),
            InjectionExecutor::new(Arc::clone(&self.analyzer)),
            Arc::clone(&observer),
            self.config.max_depth,
        ));
        engine.wire(Arc::clone(&services))?;

        let inner = Arc::new(KernelInner {
            invoker: InvocationExecutor::new(Arc::clone(&self.analyzer)),
            config: self.config,
            analyzer: self.analyzer,
            store: self.store,
            scopes: self.scopes,
            prototypes,
            engine,
            observer,
        });
        services.attach_kernel(&inner);

        if inner.config.freeze {
            inner.store.freeze();
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "keystone_di",
            definitions = inner.store.len(),
            classes = inner.analyzer.len(),
            frozen = inner.store.is_frozen(),
            "Kernel booted"
        );

        Ok(Kernel { inner })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
