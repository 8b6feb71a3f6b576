//! Prototype verification.
//!
//! Runs after a prototype is built and before it is written to cache. The
//! rules catch classes that could never resolve at runtime: non-instantiable
//! classes without a factory, required parameters nothing can fill, and
//! injected properties with no resolvable identifier.

use crate::analyzer::TypeAnalyzer;
use crate::error::{ResolutionError, Result};
use crate::prototype::ServicePrototype;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Definition-derived context for a verification run.
#[derive(Debug, Clone, Default)]
pub struct VerifyHints {
    /// The identifier is registered with a factory or pre-built concrete.
    pub has_factory: bool,
    /// Parameter names the definition overrides at construction time.
    pub override_names: HashSet<String>,
}

impl VerifyHints {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_factory(mut self, has_factory: bool) -> Self {
        self.has_factory = has_factory;
        self
    }

    pub fn with_overrides<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.override_names = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Enforces the resolvable-type rule on freshly built prototypes.
pub struct Verifier {
    analyzer: Arc<TypeAnalyzer>,
}

impl Verifier {
    #[inline]
    pub fn new(analyzer: Arc<TypeAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Verify one prototype. The first violated rule fails the run.
    pub fn verify(&self, prototype: &ServicePrototype, hints: &VerifyHints) -> Result<()> {
        if !prototype.instantiable && !hints.has_factory {
            return Err(ResolutionError::verification_failed(
                &prototype.class_name,
                "class is not instantiable and no factory is registered",
            ));
        }

        if let Some(constructor) = &prototype.constructor {
            for param in &constructor.params {
                if param.has_default || param.is_variadic {
                    continue;
                }
                let resolvable = param
                    .type_name
                    .as_ref()
                    .is_some_and(|t| {
                        !t.is_scalar()
                            && t.base_names()
                                .iter()
                                .any(|name| self.analyzer.can_resolve_type(name))
                    });
                if resolvable {
                    continue;
                }
                if param.allows_null || hints.override_names.contains(&param.name) {
                    continue;
                }
                let cause = ResolutionError::unresolvable_param(
                    &param.name,
                    &prototype.class_name,
                    Vec::new(),
                );
                return Err(ResolutionError::verification_failed(
                    &prototype.class_name,
                    format!(
                        "constructor parameter `{}` has no default, no resolvable type, \
                         allows no null, and is not overridden",
                        param.name
                    ),
                )
                .with_cause(cause));
            }
        }

        for property in &prototype.properties {
            let ok = match (&property.override_id, &property.type_name) {
                (Some(_), _) => true,
                (None, Some(t)) => t
                    .base_names()
                    .iter()
                    .any(|name| self.analyzer.can_resolve_type(name)),
                (None, None) => false,
            };
            if !ok {
                return Err(ResolutionError::verification_failed(
                    &prototype.class_name,
                    format!(
                        "injected property `{}` has neither a resolvable type \
                         nor an explicit identifier",
                        property.name
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// Per-class outcomes of a batch verification run.
#[derive(Debug, Default)]
pub struct VerificationReport {
    entries: Vec<(String, ResolutionError)>,
}

impl VerificationReport {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, class: &str, error: ResolutionError) {
        self.entries.push((class.to_string(), error));
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, ResolutionError)] {
        &self.entries
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "verification passed");
        }
        writeln!(f, "verification failed for {} class(es):", self.entries.len())?;
        for (class, error) in &self.entries {
            writeln!(f, "  {class}: {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ClassMetadata;
    use crate::prototype::{ParameterPrototype, ServicePrototype};
    use crate::value::BoxedInstance;

    struct Widget;

    fn analyzer() -> Arc<TypeAnalyzer> {
        let analyzer = TypeAnalyzer::new();
        analyzer.register(
            ClassMetadata::builder("pkg.Widget")
                .constructor(vec![], |_| Ok(Box::new(Widget) as BoxedInstance))
                .build(),
        );
        analyzer.register(ClassMetadata::interface("pkg.PortInterface"));
        Arc::new(analyzer)
    }

    fn prototype_for(analyzer: &TypeAnalyzer, class: &str) -> ServicePrototype {
        ServicePrototype::from_metadata(&analyzer.reflect_class(class).unwrap())
    }

    #[test]
    fn test_instantiable_class_passes() {
        let analyzer = analyzer();
        let verifier = Verifier::new(Arc::clone(&analyzer));
        let prototype = prototype_for(&analyzer, "pkg.Widget");
        assert!(verifier.verify(&prototype, &VerifyHints::new()).is_ok());
    }

    #[test]
    fn test_interface_needs_factory() {
        let analyzer = analyzer();
        let verifier = Verifier::new(Arc::clone(&analyzer));
        let prototype = prototype_for(&analyzer, "pkg.PortInterface");

        assert!(verifier.verify(&prototype, &VerifyHints::new()).is_err());
        assert!(verifier
            .verify(&prototype, &VerifyHints::new().with_factory(true))
            .is_ok());
    }

    #[test]
    fn test_unresolvable_param_rejected_unless_overridden() {
        let analyzer = analyzer();
        analyzer.register(
            ClassMetadata::builder("pkg.Needy")
                .constructor(
                    vec![ParameterPrototype::new("token").of_type("string")],
                    |_| Ok(Box::new(Widget) as BoxedInstance),
                )
                .build(),
        );
        let verifier = Verifier::new(Arc::clone(&analyzer));
        let prototype = prototype_for(&analyzer, "pkg.Needy");

        let err = verifier.verify(&prototype, &VerifyHints::new()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::VerificationFailed);
        assert!(err.cause.is_some());

        assert!(verifier
            .verify(&prototype, &VerifyHints::new().with_overrides(["token"]))
            .is_ok());
    }

    #[test]
    fn test_batch_report_collects_per_class() {
        let mut report = VerificationReport::new();
        assert!(report.is_ok());
        report.add("pkg.Bad", ResolutionError::verification_failed("pkg.Bad", "boom"));
        assert!(!report.is_ok());
        assert_eq!(report.len(), 1);
    }
}
