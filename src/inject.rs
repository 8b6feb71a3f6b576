//! Post-construction property and method injection.
//!
//! Properties resolve against their explicit override identifier (when the
//! marker names one) or their declared type; methods resolve their parameter
//! lists exactly like constructors. Outcomes are collected per member; in
//! strict mode the first failure aborts.

use crate::analyzer::TypeAnalyzer;
use crate::context::KernelContext;
use crate::error::{ResolutionError, Result};
use crate::prototype::{MethodPrototype, PropertyPrototype, ServicePrototype};
use crate::resolver::{DependencyResolver, DependencySource};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Which member an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Property,
    Method,
}

/// Per-member result of an injection pass.
#[derive(Debug)]
pub struct MemberOutcome {
    pub member: String,
    pub kind: MemberKind,
    pub error: Option<ResolutionError>,
}

/// Everything that happened while injecting into one target.
#[derive(Debug, Default)]
pub struct InjectionReport {
    target: String,
    outcomes: Vec<MemberOutcome>,
}

impl InjectionReport {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            outcomes: Vec::new(),
        }
    }

    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[inline]
    pub fn outcomes(&self) -> &[MemberOutcome] {
        &self.outcomes
    }

    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    pub fn failures(&self) -> Vec<&MemberOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .collect()
    }
}

/// What `inspect_injection` reports without performing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionInspection {
    /// property name -> expected type (or explicit identifier)
    pub properties: BTreeMap<String, String>,
    /// method name -> expected parameter types
    pub methods: BTreeMap<String, Vec<String>>,
}

pub struct InjectionExecutor {
    analyzer: Arc<TypeAnalyzer>,
}

impl InjectionExecutor {
    #[inline]
    pub fn new(analyzer: Arc<TypeAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Fill injected properties and call injected methods on `target`.
    ///
    /// Non-strict mode records failures and keeps going; strict mode returns
    /// the first failure wrapped as `InjectionFailed`.
    pub fn inject(
        &self,
        target: &mut (dyn Any + Send + Sync),
        prototype: &ServicePrototype,
        ctx: &Arc<KernelContext>,
        source: &dyn DependencySource,
        strict: bool,
    ) -> Result<InjectionReport> {
        let meta = self.analyzer.reflect_class(&prototype.class_name)?;
        let mut report = InjectionReport::new(&prototype.class_name);

        for property in &prototype.properties {
            let outcome = self.inject_property(target, property, &meta, ctx, source);
            if strict {
                if let Err(err) = outcome {
                    return Err(ResolutionError::injection_failed(
                        &prototype.class_name,
                        format!("property `{}`: {}", property.name, err),
                    )
                    .with_cause(err));
                }
                report.outcomes.push(MemberOutcome {
                    member: property.name.clone(),
                    kind: MemberKind::Property,
                    error: None,
                });
            } else {
                report.outcomes.push(MemberOutcome {
                    member: property.name.clone(),
                    kind: MemberKind::Property,
                    error: outcome.err(),
                });
            }
        }

        for method in &prototype.methods {
            let outcome = self.inject_method(target, method, &meta, ctx, source);
            if strict {
                if let Err(err) = outcome {
                    return Err(ResolutionError::injection_failed(
                        &prototype.class_name,
                        format!("method `{}`: {}", method.name, err),
                    )
                    .with_cause(err));
                }
                report.outcomes.push(MemberOutcome {
                    member: method.name.clone(),
                    kind: MemberKind::Method,
                    error: None,
                });
            } else {
                report.outcomes.push(MemberOutcome {
                    member: method.name.clone(),
                    kind: MemberKind::Method,
                    error: outcome.err(),
                });
            }
        }

        Ok(report)
    }

    fn inject_property(
        &self,
        target: &mut (dyn Any + Send + Sync),
        property: &PropertyPrototype,
        meta: &crate::analyzer::ClassMetadata,
        ctx: &Arc<KernelContext>,
        source: &dyn DependencySource,
    ) -> Result<()> {
        let identifier = property.resolve_id().ok_or_else(|| {
            ResolutionError::injection_failed(
                meta.name(),
                format!("property `{}` has no resolvable identifier", property.name),
            )
        })?;

        if ctx.contains(&identifier) {
            let mut path = ctx.path();
            path.push(identifier.clone());
            return Err(ResolutionError::cycle(path));
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            class = meta.name(),
            property = property.name.as_str(),
            service = identifier.as_str(),
            "Injecting property"
        );

        let instance = source.resolve_child(ctx.child(&identifier))?;
        let prop_meta = meta
            .properties()
            .iter()
            .find(|p| p.name == property.name)
            .ok_or_else(|| {
                ResolutionError::injection_failed(
                    meta.name(),
                    format!("property `{}` is not registered", property.name),
                )
            })?;
        (prop_meta.set)(target, instance)
    }

    fn inject_method(
        &self,
        target: &mut (dyn Any + Send + Sync),
        method: &MethodPrototype,
        meta: &crate::analyzer::ClassMetadata,
        ctx: &Arc<KernelContext>,
        source: &dyn DependencySource,
    ) -> Result<()> {
        let args =
            DependencyResolver::resolve_params(&method.params, ctx, ctx.overrides(), source)?;
        let method_meta = meta.method(&method.name).ok_or_else(|| {
            ResolutionError::injection_failed(
                meta.name(),
                format!("method `{}` is not registered", method.name),
            )
        })?;
        let apply = method_meta.apply.as_ref().ok_or_else(|| {
            ResolutionError::injection_failed(
                meta.name(),
                format!("method `{}` has no injection entry point", method.name),
            )
        })?;

        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            class = meta.name(),
            method = method.name.as_str(),
            args = args.len(),
            "Invoking injected method"
        );

        apply(target, &args)
    }

    /// Enumerate injection points without resolving or calling anything.
    pub fn inspect(&self, prototype: &ServicePrototype) -> InjectionInspection {
        let properties = prototype
            .properties
            .iter()
            .map(|p| {
                let expected = p
                    .type_name
                    .as_ref()
                    .map(|t| t.format())
                    .or_else(|| p.override_id.clone())
                    .unwrap_or_default();
                (p.name.clone(), expected)
            })
            .collect();

        let methods = prototype
            .methods
            .iter()
            .map(|m| {
                let types = m
                    .params
                    .iter()
                    .map(|p| {
                        p.type_name
                            .as_ref()
                            .map(|t| t.format())
                            .unwrap_or_default()
                    })
                    .collect();
                (m.name.clone(), types)
            })
            .collect();

        InjectionInspection {
            properties,
            methods,
        }
    }

    /// Whether the prototype declares any injection point.
    #[inline]
    pub fn can_inject(&self, prototype: &ServicePrototype) -> bool {
        prototype.has_injection_points()
    }
}

impl std::fmt::Debug for InjectionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionExecutor").finish()
    }
}
