//! Constructor invocation.
//!
//! Takes a class name and a resolved argument vector, finds the registered
//! construct closure, and runs it. Errors raised inside user constructors
//! surface as `FactoryFailed` with the original error as the cause.

use crate::analyzer::TypeAnalyzer;
use crate::error::{ResolutionError, Result};
use crate::value::{ArgumentList, BoxedInstance};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

pub struct Instantiator {
    analyzer: Arc<TypeAnalyzer>,
}

impl Instantiator {
    #[inline]
    pub fn new(analyzer: Arc<TypeAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Build an instance of `class` from resolved constructor arguments.
    pub fn construct(&self, class: &str, args: &ArgumentList) -> Result<BoxedInstance> {
        let meta = self.analyzer.reflect_class(class)?;
        if !meta.is_instantiable() {
            return Err(ResolutionError::verification_failed(
                class,
                "class is not instantiable",
            ));
        }
        let constructor = meta.constructor().ok_or_else(|| {
            ResolutionError::verification_failed(class, "class declares no constructor")
        })?;

        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            class = class,
            args = args.len(),
            "Invoking constructor"
        );

        (constructor.construct)(args)
            .map_err(|cause| ResolutionError::factory_failed(class, cause))
    }
}

impl std::fmt::Debug for Instantiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instantiator").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ClassMetadata;
    use crate::error::ErrorKind;
    use crate::prototype::ParameterPrototype;
    use crate::value::ArgumentValue;
    use serde_json::json;

    struct Greeter {
        greeting: String,
    }

    fn analyzer() -> Arc<TypeAnalyzer> {
        let analyzer = TypeAnalyzer::new();
        analyzer.register(
            ClassMetadata::builder("pkg.Greeter")
                .constructor(
                    vec![ParameterPrototype::new("greeting").of_type("string")],
                    |args| {
                        let greeting: String = args.expect_scalar("greeting")?;
                        Ok(Box::new(Greeter { greeting }) as BoxedInstance)
                    },
                )
                .build(),
        );
        analyzer.register(ClassMetadata::interface("pkg.Port"));
        Arc::new(analyzer)
    }

    #[test]
    fn test_construct_with_args() {
        let instantiator = Instantiator::new(analyzer());
        let mut args = ArgumentList::new();
        args.push("greeting", ArgumentValue::scalar(json!("hello")));

        let built = instantiator.construct("pkg.Greeter", &args).unwrap();
        let greeter = built.downcast_ref::<Greeter>().unwrap();
        assert_eq!(greeter.greeting, "hello");
    }

    #[test]
    fn test_constructor_error_becomes_factory_failed() {
        let instantiator = Instantiator::new(analyzer());
        // Missing argument makes the constructor closure fail.
        let err = instantiator
            .construct("pkg.Greeter", &ArgumentList::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FactoryFailed);
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_interface_rejected() {
        let instantiator = Instantiator::new(analyzer());
        let err = instantiator
            .construct("pkg.Port", &ArgumentList::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::VerificationFailed);
    }

    #[test]
    fn test_unknown_class_not_found() {
        let instantiator = Instantiator::new(analyzer());
        let err = instantiator
            .construct("pkg.Ghost", &ArgumentList::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
