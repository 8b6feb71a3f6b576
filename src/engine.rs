//! The resolution engine: drives the pipeline for one context.
//!
//! The engine is wired to its collaborators exactly once at boot; wiring it
//! twice is fatal. Every run enforces the depth limit and the optional
//! per-resolution deadline between stages, collects the stage trace, and
//! reports step events to the observer.

use crate::context::KernelContext;
use crate::definition::{DefinitionStore, Lifetime};
use crate::error::{ResolutionError, Result};
use crate::instantiate::Instantiator;
use crate::inject::InjectionExecutor;
use crate::observe::Observer;
use crate::pipeline::{
    finish_success, run_autowire, run_contextual, run_definition, run_inject, run_instantiate,
    PipelineState,
};
use crate::prototype::PrototypeFactory;
use crate::resolver::DependencySource;
use crate::scope::ScopeManager;
use crate::trace::{Outcome, ResolutionTrace, Stage};
use crate::analyzer::TypeAnalyzer;
use crate::value::Instance;
use once_cell::sync::OnceCell;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Instant;

#[cfg(feature = "logging")]
use tracing::debug;

/// Everything the pipeline stages need, assembled at boot.
pub(crate) struct EngineServices {
    pub analyzer: Arc<TypeAnalyzer>,
    pub store: Arc<DefinitionStore>,
    pub scopes: Arc<ScopeManager>,
    pub prototypes: Arc<PrototypeFactory>,
    pub instantiator: Instantiator,
    pub injector: InjectionExecutor,
    pub observer: Arc<Observer>,
    pub max_depth: u32,
    kernel: RwLock<Weak<crate::kernel::KernelInner>>,
}

impl EngineServices {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        analyzer: Arc<TypeAnalyzer>,
        store: Arc<DefinitionStore>,
        scopes: Arc<ScopeManager>,
        prototypes: Arc<PrototypeFactory>,
        instantiator: Instantiator,
        injector: InjectionExecutor,
        observer: Arc<Observer>,
        max_depth: u32,
    ) -> Self {
        Self {
            analyzer,
            store,
            scopes,
            prototypes,
            instantiator,
            injector,
            observer,
            max_depth,
            kernel: RwLock::new(Weak::new()),
        }
    }

    /// Attach the owning kernel after it is constructed.
    pub(crate) fn attach_kernel(&self, kernel: &Arc<crate::kernel::KernelInner>) {
        *self.kernel.write().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(kernel);
    }

    /// Handle to the owning kernel, for user factories.
    pub(crate) fn kernel(&self) -> Result<crate::kernel::Kernel> {
        self.kernel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
            .map(crate::kernel::Kernel::from_inner)
            .ok_or_else(|| {
                ResolutionError::container_state("kernel handle requested before boot completed")
            })
    }
}

/// Executes the pipeline for one [`KernelContext`].
pub struct ResolutionEngine {
    services: OnceCell<Arc<EngineServices>>,
}

impl ResolutionEngine {
    #[inline]
    pub fn new() -> Self {
        Self {
            services: OnceCell::new(),
        }
    }

    /// Wire the engine to its collaborators. Exactly once.
    pub(crate) fn wire(&self, services: Arc<EngineServices>) -> Result<()> {
        self.services.set(services).map_err(|_| {
            ResolutionError::container_state("resolution engine is already wired")
        })?;

        #[cfg(feature = "logging")]
        debug!(target: "keystone_di", "Resolution engine wired");

        Ok(())
    }

    pub(crate) fn services(&self) -> Result<&Arc<EngineServices>> {
        self.services.get().ok_or_else(|| {
            ResolutionError::container_state("resolution engine is not wired yet")
        })
    }

    /// Resolve a context, honoring lifetimes and scope storage.
    pub fn resolve(&self, ctx: Arc<KernelContext>) -> Result<Instance> {
        self.run(ctx, false).map(|(instance, _)| instance)
    }

    /// Resolve without scope short-circuit or storage (`make`, decorators).
    pub(crate) fn resolve_fresh(&self, ctx: Arc<KernelContext>) -> Result<Instance> {
        self.run(ctx, true).map(|(instance, _)| instance)
    }

    /// Resolve and return the collected stage trace alongside the instance.
    pub(crate) fn resolve_traced(
        &self,
        ctx: Arc<KernelContext>,
        fresh: bool,
    ) -> Result<(Instance, ResolutionTrace)> {
        self.run(ctx, fresh)
    }

    fn run(&self, ctx: Arc<KernelContext>, fresh: bool) -> Result<(Instance, ResolutionTrace)> {
        let services = self.services()?;

        if ctx.depth() >= services.max_depth {
            return Err(ResolutionError::depth_exceeded(
                ctx.service_id(),
                ctx.depth(),
                services.max_depth,
            )
            .with_path(ctx.path()));
        }

        // Shared lifetimes gate first construction behind a per-identifier
        // lock with a double-checked scope lookup, so concurrent resolutions
        // run the factory at most once.
        let canonical = services.store.resolve_alias(ctx.service_id())?;
        let lifetime = services
            .store
            .get(&canonical)
            .map(|d| d.lifetime)
            .unwrap_or(Lifetime::Transient);

        let gate = (!fresh && lifetime.is_shared())
            .then(|| services.scopes.build_lock(&canonical));
        let _guard = match &gate {
            Some(lock) => {
                if let Some(existing) = services.scopes.lookup_for(&canonical, lifetime)? {
                    return Ok((existing, scope_hit_trace()));
                }
                let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(existing) = services.scopes.lookup_for(&canonical, lifetime)? {
                    return Ok((existing, scope_hit_trace()));
                }
                Some(guard)
            }
            None => None,
        };

        let mut state = PipelineState::new(ctx.service_id(), fresh);
        state.transition(Stage::ContextualLookup)?;
        let run_start = Instant::now();

        loop {
            let stage = state.stage;

            if ctx.deadline_exceeded() {
                state.trace = state.trace.record(stage, Outcome::Failure, "deadline");
                services
                    .observer
                    .step_failed(stage, ctx.service_id(), 0.0, ctx.trace_id());
                return Err(ResolutionError::timeout(ctx.service_id())
                    .with_path(ctx.path())
                    .with_stage(stage)
                    .with_trace(state.trace.clone()));
            }

            services
                .observer
                .step_started(stage, ctx.service_id(), ctx.trace_id());
            let stage_start = Instant::now();

            let step = match stage {
                Stage::ContextualLookup => run_contextual(services, &ctx, &mut state),
                Stage::DefinitionLookup => run_definition(services, &ctx, &mut state),
                Stage::Autowire => run_autowire(services, &ctx, &mut state),
                Stage::Instantiate => run_instantiate(self, services, &ctx, &mut state),
                Stage::Inject => run_inject(self, services, &ctx, &mut state),
                other => Err(ResolutionError::container_state(format!(
                    "stage `{other}` has no handler"
                ))),
            };
            let elapsed = elapsed_ms(stage_start);

            match step {
                Ok(next) => {
                    let outcome = state
                        .trace
                        .last()
                        .map(|entry| entry.outcome)
                        .unwrap_or(Outcome::Applied);
                    services.observer.step_succeeded(
                        stage,
                        outcome,
                        ctx.service_id(),
                        elapsed,
                        ctx.trace_id(),
                    );
                    state.transition(next).map_err(|err| {
                        err.with_path(ctx.path()).with_trace(state.trace.clone())
                    })?;

                    if next == Stage::Success {
                        let instance = match finish_success(self, services, &ctx, &mut state) {
                            Ok(instance) => instance,
                            Err(err) => {
                                state.trace = state.trace.record(
                                    Stage::Success,
                                    Outcome::Failure,
                                    ctx.service_id(),
                                );
                                services.observer.step_failed(
                                    Stage::Success,
                                    ctx.service_id(),
                                    elapsed_ms(run_start),
                                    ctx.trace_id(),
                                );
                                let mut err = if err.stage == Some(Stage::Success) {
                                    err
                                } else {
                                    err.wrap(ctx.service_id(), Stage::Success)
                                };
                                if err.path.is_empty() {
                                    err.path = ctx.path();
                                }
                                return Err(err.with_trace(state.trace.clone()));
                            }
                        };
                        ctx.set_resolved(Arc::clone(&instance))?;
                        let total = elapsed_ms(run_start);
                        services.observer.resolution_finished(
                            &state.target_id,
                            state.lifetime,
                            total,
                        );
                        services.observer.step_succeeded(
                            Stage::Success,
                            Outcome::Applied,
                            &state.target_id,
                            total,
                            ctx.trace_id(),
                        );
                        return Ok((instance, state.trace.clone()));
                    }
                }
                Err(err) => {
                    state.trace = state.trace.record(stage, Outcome::Failure, ctx.service_id());
                    services
                        .observer
                        .step_failed(stage, ctx.service_id(), elapsed, ctx.trace_id());

                    let mut err = if err.stage == Some(stage) {
                        err
                    } else {
                        err.wrap(ctx.service_id(), stage)
                    };
                    if err.path.is_empty() {
                        err.path = ctx.path();
                    }
                    return Err(err.with_trace(state.trace.clone()));
                }
            }
        }
    }
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencySource for ResolutionEngine {
    fn resolve_child(&self, ctx: Arc<KernelContext>) -> Result<Instance> {
        self.resolve(ctx)
    }

    fn can_supply(&self, identifier: &str) -> bool {
        let Ok(services) = self.services() else {
            return false;
        };
        let canonical = services
            .store
            .resolve_alias(identifier)
            .unwrap_or_else(|_| identifier.to_string());
        services.store.has(&canonical) || services.analyzer.can_resolve_type(&canonical)
    }
}

impl std::fmt::Debug for ResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("wired", &self.services.get().is_some())
            .finish()
    }
}

fn scope_hit_trace() -> ResolutionTrace {
    ResolutionTrace::new().record(Stage::DefinitionLookup, Outcome::Hit, "scope")
}

#[inline]
fn elapsed_ms(from: Instant) -> f64 {
    from.elapsed().as_secs_f64() * 1000.0
}
