//! Priority-ordered argument sourcing.
//!
//! For each parameter, in declaration order: a caller override wins outright;
//! a resolvable non-scalar type goes through the engine under a child
//! context; a declared default comes next; a nullable parameter falls back to
//! the null sentinel; anything else is an unresolvable-parameter error
//! carrying the path from the resolution root.

use crate::context::KernelContext;
use crate::error::{ResolutionError, Result};
use crate::prototype::ParameterPrototype;
use crate::value::{ArgumentList, ArgumentValue, Instance};
use std::collections::HashMap;
use std::sync::Arc;

/// Where the resolver sends child resolutions.
///
/// Implemented by the resolution engine; the indirection keeps the resolver
/// free of an engine dependency and testable in isolation.
pub trait DependencySource: Send + Sync {
    /// Resolve the context's identifier, recursively.
    fn resolve_child(&self, ctx: Arc<KernelContext>) -> Result<Instance>;

    /// Whether the container can supply `identifier` at all (definition,
    /// registered class, or autowirable).
    fn can_supply(&self, identifier: &str) -> bool;
}

/// Stateless argument resolver.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Resolve a full parameter list into an argument vector.
    pub fn resolve_params(
        params: &[ParameterPrototype],
        ctx: &Arc<KernelContext>,
        overrides: &HashMap<String, ArgumentValue>,
        source: &dyn DependencySource,
    ) -> Result<ArgumentList> {
        let mut args = ArgumentList::with_capacity(params.len());
        for param in params {
            let value = Self::resolve_param(param, ctx, overrides, source)?;
            args.push(param.name.clone(), value);
        }
        Ok(args)
    }

    fn resolve_param(
        param: &ParameterPrototype,
        ctx: &Arc<KernelContext>,
        overrides: &HashMap<String, ArgumentValue>,
        source: &dyn DependencySource,
    ) -> Result<ArgumentValue> {
        // Overrides win over everything, type resolution included.
        if let Some(value) = overrides.get(&param.name) {
            if param.is_variadic {
                return Ok(match value {
                    ArgumentValue::Sequence(_) => value.clone(),
                    other => ArgumentValue::Sequence(vec![other.clone()]),
                });
            }
            return Ok(value.clone());
        }

        if param.is_variadic {
            return Ok(ArgumentValue::Sequence(Vec::new()));
        }

        if let Some(candidate) = Self::supplier_for(param, source) {
            if ctx.contains(&candidate) {
                let mut path = ctx.path();
                path.push(candidate);
                return Err(ResolutionError::cycle(path));
            }
            let child = ctx.child(&candidate);
            let instance = source.resolve_child(child)?;
            return Ok(ArgumentValue::Service(instance));
        }

        if param.has_default {
            return Ok(match &param.default_value {
                Some(value) => ArgumentValue::Scalar(value.clone()),
                None => ArgumentValue::Null,
            });
        }

        if param.allows_null {
            return Ok(ArgumentValue::Null);
        }

        Err(ResolutionError::unresolvable_param(
            &param.name,
            ctx.service_id(),
            ctx.path(),
        ))
    }

    /// First type candidate the container can supply, skipping scalars.
    fn supplier_for(param: &ParameterPrototype, source: &dyn DependencySource) -> Option<String> {
        let descriptor = param.type_name.as_ref()?;
        if descriptor.is_scalar() {
            return None;
        }
        descriptor
            .base_names()
            .into_iter()
            .filter(|name| !crate::types::is_scalar_name(name))
            .find(|name| source.can_supply(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolutionFlags;
    use serde_json::json;
    use std::sync::Mutex;

    struct StubSource {
        known: Vec<String>,
        resolved: Mutex<Vec<String>>,
    }

    impl StubSource {
        fn new(known: &[&str]) -> Self {
            Self {
                known: known.iter().map(|s| s.to_string()).collect(),
                resolved: Mutex::new(Vec::new()),
            }
        }
    }

    impl DependencySource for StubSource {
        fn resolve_child(&self, ctx: Arc<KernelContext>) -> Result<Instance> {
            self.resolved
                .lock()
                .unwrap()
                .push(ctx.service_id().to_string());
            Ok(Arc::new(ctx.service_id().to_string()))
        }

        fn can_supply(&self, identifier: &str) -> bool {
            self.known.iter().any(|k| k == identifier)
        }
    }

    fn ctx(id: &str) -> Arc<KernelContext> {
        KernelContext::root(id, ResolutionFlags::default(), HashMap::new())
    }

    #[test]
    fn test_override_wins_over_type() {
        let source = StubSource::new(&["pkg.Clock"]);
        let params = vec![ParameterPrototype::new("clock").of_type("pkg.Clock")];
        let overrides: HashMap<_, _> =
            [("clock".to_string(), ArgumentValue::scalar(json!("fixed")))].into();

        let args =
            DependencyResolver::resolve_params(&params, &ctx("pkg.Logger"), &overrides, &source)
                .unwrap();
        assert_eq!(
            args.get("clock").unwrap().as_scalar(),
            Some(&json!("fixed"))
        );
        assert!(source.resolved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_type_resolution_through_child_context() {
        let source = StubSource::new(&["pkg.Clock"]);
        let params = vec![ParameterPrototype::new("clock").of_type("pkg.Clock")];

        let args = DependencyResolver::resolve_params(
            &params,
            &ctx("pkg.Logger"),
            &HashMap::new(),
            &source,
        )
        .unwrap();
        assert!(args.get("clock").unwrap().as_service().is_some());
        assert_eq!(*source.resolved.lock().unwrap(), vec!["pkg.Clock"]);
    }

    #[test]
    fn test_default_then_null_fallback() {
        let source = StubSource::new(&[]);
        let params = vec![
            ParameterPrototype::new("retries").of_type("int").with_default(json!(3)),
            ParameterPrototype::new("clock").of_type("?pkg.Clock"),
        ];

        let args = DependencyResolver::resolve_params(
            &params,
            &ctx("pkg.Logger"),
            &HashMap::new(),
            &source,
        )
        .unwrap();
        assert_eq!(args.get("retries").unwrap().as_scalar(), Some(&json!(3)));
        assert!(args.get("clock").unwrap().is_null());
    }

    #[test]
    fn test_missing_param_error_carries_path() {
        let source = StubSource::new(&[]);
        let params = vec![ParameterPrototype::new("writer").of_type("pkg.Writer")];

        let root = ctx("pkg.App");
        let nested = root.child("pkg.Logger");
        let err = DependencyResolver::resolve_params(&params, &nested, &HashMap::new(), &source)
            .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::UnresolvableParam);
        assert_eq!(err.path, vec!["pkg.App", "pkg.Logger"]);
    }

    #[test]
    fn test_cycle_detected_before_recursion() {
        let source = StubSource::new(&["pkg.A"]);
        let params = vec![ParameterPrototype::new("a").of_type("pkg.A")];

        let root = ctx("pkg.A");
        let nested = root.child("pkg.B");
        let err = DependencyResolver::resolve_params(&params, &nested, &HashMap::new(), &source)
            .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::Cycle);
        assert_eq!(err.path, vec!["pkg.A", "pkg.B", "pkg.A"]);
    }

    #[test]
    fn test_variadic_consumes_override_as_sequence() {
        let source = StubSource::new(&[]);
        let params = vec![ParameterPrototype::new("handlers").variadic()];

        // Single value is wrapped.
        let overrides: HashMap<_, _> =
            [("handlers".to_string(), ArgumentValue::scalar(json!("h1")))].into();
        let args =
            DependencyResolver::resolve_params(&params, &ctx("pkg.Bus"), &overrides, &source)
                .unwrap();
        assert_eq!(args.get("handlers").unwrap().as_sequence().unwrap().len(), 1);

        // No override yields an empty sequence.
        let args =
            DependencyResolver::resolve_params(&params, &ctx("pkg.Bus"), &HashMap::new(), &source)
                .unwrap();
        assert!(args.get("handlers").unwrap().as_sequence().unwrap().is_empty());
    }

    #[test]
    fn test_union_tries_parts_in_order() {
        let source = StubSource::new(&["pkg.B"]);
        let params = vec![ParameterPrototype::new("dep").of_type("pkg.A|pkg.B")];

        let args = DependencyResolver::resolve_params(
            &params,
            &ctx("pkg.Svc"),
            &HashMap::new(),
            &source,
        )
        .unwrap();
        assert!(args.get("dep").unwrap().as_service().is_some());
        assert_eq!(*source.resolved.lock().unwrap(), vec!["pkg.B"]);
    }
}
