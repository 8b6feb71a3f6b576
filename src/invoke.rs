//! Calling arbitrary callables with auto-resolved arguments.
//!
//! Three callable forms are accepted: a bare function, an explicit
//! `(receiver, method)` pair, and the `"Class@method"` expression. The
//! expression form resolves the class through the container before the call;
//! static methods are invoked without a receiver. Callable signatures are
//! reflected once and cached under a `Class@method` key.

use crate::analyzer::TypeAnalyzer;
use crate::context::KernelContext;
use crate::error::{ResolutionError, Result};
use crate::prototype::{MethodPrototype, ParameterPrototype};
use crate::resolver::{DependencyResolver, DependencySource};
use crate::value::{ArgumentList, ArgumentValue, Instance};
use ahash::RandomState;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// A callable the executor can normalize and invoke.
#[derive(Clone)]
pub enum Callable {
    /// An anonymous function with a declared parameter list.
    Function {
        name: String,
        params: Vec<ParameterPrototype>,
        f: Arc<dyn Fn(&ArgumentList) -> Result<ArgumentValue> + Send + Sync>,
    },
    /// An explicit receiver plus method name.
    Method {
        receiver: Instance,
        class: String,
        method: String,
    },
    /// A `"Class@method"` expression, normalized at invocation time.
    Expression(String),
}

impl Callable {
    pub fn function<F>(name: impl Into<String>, mut params: Vec<ParameterPrototype>, f: F) -> Self
    where
        F: Fn(&ArgumentList) -> Result<ArgumentValue> + Send + Sync + 'static,
    {
        for (position, param) in params.iter_mut().enumerate() {
            param.position = position;
        }
        Callable::Function {
            name: name.into(),
            params,
            f: Arc::new(f),
        }
    }

    pub fn method(
        receiver: Instance,
        class: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Callable::Method {
            receiver,
            class: class.into(),
            method: method.into(),
        }
    }

    pub fn expression(expr: impl Into<String>) -> Self {
        Callable::Expression(expr.into())
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Function { name, params, .. } => f
                .debug_struct("Function")
                .field("name", name)
                .field("params", &params.len())
                .finish(),
            Callable::Method { class, method, .. } => {
                write!(f, "Method({class}@{method})")
            }
            Callable::Expression(expr) => write!(f, "Expression({expr})"),
        }
    }
}

/// Normalizes callables and invokes them with resolved arguments.
pub struct InvocationExecutor {
    analyzer: Arc<TypeAnalyzer>,
    /// Signature cache keyed by `Class@method`.
    reflection: DashMap<String, Arc<MethodPrototype>, RandomState>,
}

impl InvocationExecutor {
    pub fn new(analyzer: Arc<TypeAnalyzer>) -> Self {
        Self {
            analyzer,
            reflection: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Invoke a callable, resolving its parameters through the container.
    pub fn invoke(
        &self,
        callable: &Callable,
        overrides: &HashMap<String, ArgumentValue>,
        ctx: &Arc<KernelContext>,
        source: &dyn DependencySource,
    ) -> Result<ArgumentValue> {
        match callable {
            Callable::Function { name, params, f } => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "keystone_di",
                    callable = name.as_str(),
                    "Invoking function callable"
                );
                let _ = name;
                let args = DependencyResolver::resolve_params(params, ctx, overrides, source)?;
                f(&args)
            }
            Callable::Method {
                receiver,
                class,
                method,
            } => self.invoke_method(Some(receiver), class, method, overrides, ctx, source),
            Callable::Expression(expr) => {
                let (class, method) = Self::split_expression(expr)?;
                let meta = self.analyzer.reflect_class(class)?;
                let method_meta = meta.method(method).ok_or_else(|| {
                    ResolutionError::not_found(format!("{class}@{method}"))
                })?;

                if method_meta.is_static {
                    self.invoke_method(None, class, method, overrides, ctx, source)
                } else {
                    let receiver = source.resolve_child(ctx.child(class))?;
                    self.invoke_method(Some(&receiver), class, method, overrides, ctx, source)
                }
            }
        }
    }

    fn invoke_method(
        &self,
        receiver: Option<&Instance>,
        class: &str,
        method: &str,
        overrides: &HashMap<String, ArgumentValue>,
        ctx: &Arc<KernelContext>,
        source: &dyn DependencySource,
    ) -> Result<ArgumentValue> {
        let prototype = self.reflect(class, method)?;
        let args = DependencyResolver::resolve_params(&prototype.params, ctx, overrides, source)?;

        let meta = self.analyzer.reflect_class(class)?;
        let method_meta = meta
            .method(method)
            .ok_or_else(|| ResolutionError::not_found(format!("{class}@{method}")))?;
        let invoke = method_meta.invoke.as_ref().ok_or_else(|| {
            ResolutionError::container_state(format!(
                "method `{class}@{method}` has no invocation entry point"
            ))
        })?;

        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            class = class,
            method = method,
            static_call = receiver.is_none(),
            args = args.len(),
            "Invoking method callable"
        );

        invoke(receiver, &args)
    }

    /// Cached signature lookup.
    fn reflect(&self, class: &str, method: &str) -> Result<Arc<MethodPrototype>> {
        let key = format!("{class}@{method}");
        if let Some(cached) = self.reflection.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let meta = self.analyzer.reflect_class(class)?;
        let method_meta = meta
            .method(method)
            .ok_or_else(|| ResolutionError::not_found(key.clone()))?;
        let prototype = Arc::new(MethodPrototype::new(
            method_meta.name.clone(),
            method_meta.params.clone(),
        ));
        self.reflection.insert(key, Arc::clone(&prototype));
        Ok(prototype)
    }

    fn split_expression(expr: &str) -> Result<(&str, &str)> {
        match expr.split_once('@') {
            Some((class, method)) if !class.is_empty() && !method.is_empty() => {
                Ok((class, method))
            }
            _ => Err(ResolutionError::container_state(format!(
                "malformed callable expression `{expr}`; expected `Class@method`"
            ))),
        }
    }

    /// Cached callable signatures.
    #[inline]
    pub fn reflection_len(&self) -> usize {
        self.reflection.len()
    }
}

impl std::fmt::Debug for InvocationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationExecutor")
            .field("cached_signatures", &self.reflection.len())
            .finish()
    }
}
