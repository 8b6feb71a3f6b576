//! The staged resolution state machine.
//!
//! `Start -> ContextualLookup -> DefinitionLookup -> [Autowire] ->
//! Instantiate -> Inject -> Success`, with `Fail` reachable from anywhere.
//! Transitions outside the whitelist are container-state bugs, as is a
//! terminal transition without a recorded hit. Contextual and definition
//! misses are the only locally recoverable outcomes; every other error
//! propagates.

use crate::context::KernelContext;
use crate::definition::{Concrete, Lifetime, ServiceDefinition};
use crate::engine::{EngineServices, ResolutionEngine};
use crate::error::{ResolutionError, Result};
use crate::prototype::ServicePrototype;
use crate::resolver::DependencyResolver;
use crate::trace::{Outcome, ResolutionTrace, Stage};
use crate::value::{seal, ArgumentValue, BoxedInstance, Instance};
use crate::verify::VerifyHints;
use std::collections::HashMap;
use std::sync::Arc;

/// Whitelisted stage transitions.
pub fn can_transition(from: Stage, to: Stage) -> bool {
    if to == Stage::Fail {
        return true;
    }
    matches!(
        (from, to),
        (Stage::Start, Stage::ContextualLookup)
            | (Stage::ContextualLookup, Stage::DefinitionLookup)
            | (Stage::ContextualLookup, Stage::Success)
            | (Stage::DefinitionLookup, Stage::Autowire)
            | (Stage::DefinitionLookup, Stage::Instantiate)
            | (Stage::DefinitionLookup, Stage::Success)
            | (Stage::Autowire, Stage::Instantiate)
            | (Stage::Instantiate, Stage::Inject)
            | (Stage::Inject, Stage::Success)
    )
}

/// Mutable state threaded through one pipeline run.
pub(crate) struct PipelineState {
    pub stage: Stage,
    /// Identifier under construction, after alias and contextual redirects.
    pub target_id: String,
    /// Some stage produced a usable result.
    pub hit: bool,
    /// A shared instance that short-circuits construction.
    pub bound: Option<Instance>,
    /// An owned instance between Instantiate and Success.
    pub built: Option<BoxedInstance>,
    pub definition: Option<Arc<ServiceDefinition>>,
    pub prototype: Option<Arc<ServicePrototype>>,
    pub lifetime: Lifetime,
    /// `make`-style run: skip scope short-circuit and skip storing.
    pub fresh: bool,
    pub trace: ResolutionTrace,
}

impl PipelineState {
    pub fn new(target_id: impl Into<String>, fresh: bool) -> Self {
        Self {
            stage: Stage::Start,
            target_id: target_id.into(),
            hit: false,
            bound: None,
            built: None,
            definition: None,
            prototype: None,
            lifetime: Lifetime::default(),
            fresh,
            trace: ResolutionTrace::new(),
        }
    }

    /// Move to `to`, enforcing the whitelist and the terminal-hit rule.
    pub fn transition(&mut self, to: Stage) -> Result<()> {
        if !can_transition(self.stage, to) {
            return Err(ResolutionError::container_state(format!(
                "illegal pipeline transition {} -> {}",
                self.stage, to
            )));
        }
        if to == Stage::Success {
            if !self.hit {
                return Err(ResolutionError::container_state(
                    "terminal transition without a recorded hit",
                ));
            }
            if self.bound.is_none() && self.built.is_none() {
                return Err(ResolutionError::container_state(
                    "terminal transition without an instance",
                ));
            }
        }
        self.stage = to;
        Ok(())
    }

    fn record(&mut self, stage: Stage, outcome: Outcome, state: impl Into<String>) {
        self.trace = self.trace.record(stage, outcome, state);
    }
}

// =============================================================================
// Stages
// =============================================================================

/// ContextualLookup: apply a consumer override for this identifier, if any.
///
/// The immediate parent is checked first; farther ancestors follow, so a rule
/// declared on a root consumer reaches dependencies resolved below an
/// intermediate service.
pub(crate) fn run_contextual(
    services: &EngineServices,
    ctx: &Arc<KernelContext>,
    state: &mut PipelineState,
) -> Result<Stage> {
    let mut rule = None;
    let mut ancestor = ctx.parent();
    while let Some(consumer) = ancestor {
        rule = services
            .store
            .contextual_for(consumer.service_id(), ctx.service_id());
        if rule.is_some() {
            break;
        }
        ancestor = consumer.parent();
    }

    match rule {
        Some(Concrete::PreBuilt(instance)) => {
            state.hit = true;
            state.bound = Some(instance);
            state.record(Stage::ContextualLookup, Outcome::Hit, "pre-bound");
            Ok(Stage::Success)
        }
        Some(Concrete::Factory(factory)) => {
            let kernel = services.kernel()?;
            let fctx = crate::kernel::FactoryContext::new(kernel, Arc::clone(ctx));
            let instance =
                factory(&fctx).map_err(|cause| factory_error(ctx.service_id(), cause))?;
            state.hit = true;
            state.bound = Some(instance);
            state.record(Stage::ContextualLookup, Outcome::Hit, "factory");
            Ok(Stage::Success)
        }
        Some(Concrete::ClassName(target)) | Some(Concrete::Alias(target)) => {
            state.hit = true;
            state.target_id = target.clone();
            state.record(Stage::ContextualLookup, Outcome::Hit, target);
            Ok(Stage::DefinitionLookup)
        }
        None => {
            state.record(Stage::ContextualLookup, Outcome::Miss, ctx.service_id());
            Ok(Stage::DefinitionLookup)
        }
    }
}

/// DefinitionLookup: find the descriptor, follow aliases, and short-circuit
/// against the scope that owns the lifetime.
pub(crate) fn run_definition(
    services: &EngineServices,
    ctx: &Arc<KernelContext>,
    state: &mut PipelineState,
) -> Result<Stage> {
    let canonical = services.store.resolve_alias(&state.target_id)?;
    state.target_id = canonical.clone();

    let Some(definition) = services.store.get(&canonical) else {
        state.record(Stage::DefinitionLookup, Outcome::Miss, canonical);
        let flags = ctx.flags();
        if flags.auto_define && !flags.strict {
            return Ok(Stage::Autowire);
        }
        return Err(ResolutionError::not_found(state.target_id.clone())
            .with_path(ctx.path())
            .with_stage(Stage::DefinitionLookup));
    };

    state.hit = true;
    state.lifetime = definition.lifetime;
    state.definition = Some(Arc::clone(&definition));

    if !state.fresh {
        if let Some(existing) = services.scopes.lookup_for(&canonical, definition.lifetime)? {
            state.bound = Some(existing);
            state.record(Stage::DefinitionLookup, Outcome::Hit, "scope");
            return Ok(Stage::Success);
        }
    } else if definition.lifetime.is_scoped() {
        // A fresh build of a scoped service still requires an open scope.
        services.scopes.lookup_for(&canonical, definition.lifetime)?;
    }

    match &definition.concrete {
        Concrete::PreBuilt(instance) => {
            state.bound = Some(Arc::clone(instance));
            state.record(Stage::DefinitionLookup, Outcome::Hit, "pre-built");
            Ok(Stage::Success)
        }
        Concrete::ClassName(_) | Concrete::Factory(_) => {
            state.record(Stage::DefinitionLookup, Outcome::Hit, canonical);
            Ok(Stage::Instantiate)
        }
        Concrete::Alias(_) => Err(ResolutionError::definition_conflict(format!(
            "alias for `{canonical}` survived alias resolution"
        ))),
    }
}

/// Autowire: no definition; the identifier itself must be an instantiable class.
pub(crate) fn run_autowire(
    services: &EngineServices,
    ctx: &Arc<KernelContext>,
    state: &mut PipelineState,
) -> Result<Stage> {
    let class = state.target_id.clone();
    if !services.analyzer.is_instantiable(&class) {
        return Err(ResolutionError::not_found(class)
            .with_path(ctx.path())
            .with_stage(Stage::Autowire));
    }

    let hints = VerifyHints::new().with_overrides(ctx.overrides().keys().cloned());
    let prototype = services.prototypes.create_with_hints(&class, &hints)?;
    state.prototype = Some(prototype);
    state.hit = true;
    state.record(Stage::Autowire, Outcome::Hit, class);
    Ok(Stage::Instantiate)
}

/// Instantiate: run the factory, or resolve constructor arguments and build.
pub(crate) fn run_instantiate(
    engine: &ResolutionEngine,
    services: &EngineServices,
    ctx: &Arc<KernelContext>,
    state: &mut PipelineState,
) -> Result<Stage> {
    if let Some(definition) = state.definition.clone() {
        match &definition.concrete {
            Concrete::Factory(factory) => {
                let kernel = services.kernel()?;
                let fctx = crate::kernel::FactoryContext::new(kernel, Arc::clone(ctx));
                let instance =
                    factory(&fctx).map_err(|cause| factory_error(&state.target_id, cause))?;
                state.hit = true;
                state.bound = Some(instance);
                state.record(Stage::Instantiate, Outcome::Hit, "factory");
                return Ok(Stage::Inject);
            }
            Concrete::ClassName(class) => {
                let mut overrides: HashMap<String, ArgumentValue> =
                    definition.constructor_overrides.clone();
                for (name, value) in ctx.overrides() {
                    overrides.insert(name.clone(), value.clone());
                }
                let hints = VerifyHints::new().with_overrides(overrides.keys().cloned());
                let prototype = services.prototypes.create_with_hints(class, &hints)?;

                let built = construct(engine, services, ctx, class, &prototype, &overrides)?;
                state.prototype = Some(prototype);
                state.built = Some(built);
                state.hit = true;
                state.record(Stage::Instantiate, Outcome::Hit, class.clone());
                return Ok(Stage::Inject);
            }
            Concrete::PreBuilt(_) | Concrete::Alias(_) => {
                return Err(ResolutionError::container_state(
                    "instantiate reached with a non-constructible concrete",
                ));
            }
        }
    }

    // Autowire path: the prototype is already in place.
    let prototype = state.prototype.clone().ok_or_else(|| {
        ResolutionError::container_state("instantiate reached without a prototype")
    })?;
    let class = prototype.class_name.clone();
    let built = construct(engine, services, ctx, &class, &prototype, ctx.overrides())?;
    state.built = Some(built);
    state.hit = true;
    state.record(Stage::Instantiate, Outcome::Hit, class);
    Ok(Stage::Inject)
}

/// Resolution-flow errors raised inside a factory propagate unchanged;
/// anything else is the factory's own failure.
fn factory_error(identifier: &str, cause: ResolutionError) -> ResolutionError {
    use crate::error::ErrorKind;
    match cause.kind {
        ErrorKind::Cycle
        | ErrorKind::NotFound
        | ErrorKind::UnresolvableParam
        | ErrorKind::DepthExceeded
        | ErrorKind::Timeout
        | ErrorKind::ScopeViolation => cause,
        _ => ResolutionError::factory_failed(identifier.to_string(), cause),
    }
}

fn construct(
    engine: &ResolutionEngine,
    services: &EngineServices,
    ctx: &Arc<KernelContext>,
    class: &str,
    prototype: &ServicePrototype,
    overrides: &HashMap<String, ArgumentValue>,
) -> Result<BoxedInstance> {
    let args = match &prototype.constructor {
        Some(constructor) => {
            DependencyResolver::resolve_params(&constructor.params, ctx, overrides, engine)?
        }
        None => crate::value::ArgumentList::new(),
    };
    services.instantiator.construct(class, &args)
}

/// Inject: fill inject-marked properties and call inject-marked methods.
pub(crate) fn run_inject(
    engine: &ResolutionEngine,
    services: &EngineServices,
    ctx: &Arc<KernelContext>,
    state: &mut PipelineState,
) -> Result<Stage> {
    if let (Some(built), Some(prototype)) = (state.built.as_mut(), state.prototype.as_ref()) {
        if prototype.has_injection_points() {
            services
                .injector
                .inject(built.as_mut(), prototype, ctx, engine, true)?;
        }
    }
    let target = state.target_id.clone();
    state.record(Stage::Inject, Outcome::Applied, target);
    Ok(Stage::Success)
}

/// Success: decorate, store per lifetime, and hand the instance out.
pub(crate) fn finish_success(
    engine: &ResolutionEngine,
    services: &EngineServices,
    ctx: &Arc<KernelContext>,
    state: &mut PipelineState,
) -> Result<Instance> {
    let mut instance = match (state.bound.take(), state.built.take()) {
        (Some(bound), _) => bound,
        (None, Some(built)) => seal(built),
        (None, None) => {
            return Err(ResolutionError::container_state(
                "pipeline reached success without an instance",
            ));
        }
    };

    if let Some(definition) = &state.definition {
        for decorator in &definition.decorators {
            let overrides: HashMap<String, ArgumentValue> = [(
                decorator.parameter.clone(),
                ArgumentValue::Service(Arc::clone(&instance)),
            )]
            .into();
            let child = ctx.child_with_overrides(&decorator.service, overrides);
            instance = engine.resolve_fresh(child)?;
        }
    }

    if !state.fresh {
        services
            .scopes
            .put(&state.target_id, Arc::clone(&instance), state.lifetime)?;
    }

    let target = state.target_id.clone();
    state.record(Stage::Success, Outcome::Applied, target);
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist_accepts_specified_edges() {
        assert!(can_transition(Stage::Start, Stage::ContextualLookup));
        assert!(can_transition(Stage::ContextualLookup, Stage::DefinitionLookup));
        assert!(can_transition(Stage::ContextualLookup, Stage::Success));
        assert!(can_transition(Stage::DefinitionLookup, Stage::Autowire));
        assert!(can_transition(Stage::DefinitionLookup, Stage::Instantiate));
        assert!(can_transition(Stage::DefinitionLookup, Stage::Success));
        assert!(can_transition(Stage::Autowire, Stage::Instantiate));
        assert!(can_transition(Stage::Instantiate, Stage::Inject));
        assert!(can_transition(Stage::Inject, Stage::Success));
        assert!(can_transition(Stage::Instantiate, Stage::Fail));
    }

    #[test]
    fn test_whitelist_rejects_shortcuts() {
        assert!(!can_transition(Stage::Start, Stage::Instantiate));
        assert!(!can_transition(Stage::Autowire, Stage::Success));
        assert!(!can_transition(Stage::Instantiate, Stage::Success));
        assert!(!can_transition(Stage::Success, Stage::Start));
    }

    #[test]
    fn test_terminal_requires_hit_and_instance() {
        let mut state = PipelineState::new("svc", false);
        state.stage = Stage::ContextualLookup;

        let err = state.transition(Stage::Success).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ContainerState);

        state.hit = true;
        let err = state.transition(Stage::Success).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ContainerState);

        state.bound = Some(Arc::new(1u32));
        assert!(state.transition(Stage::Success).is_ok());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut state = PipelineState::new("svc", false);
        state.stage = Stage::Inject;
        let err = state.transition(Stage::Instantiate).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ContainerState);
    }
}
