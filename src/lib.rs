//! # Keystone DI - Reflection-Style Dependency Injection Kernel for Rust
//!
//! A service resolution engine with pluggable lifetimes, contextual bindings,
//! marker-based injection, prototype caching, scope management, and a staged
//! resolution pipeline with cycle detection and tracing.
//!
//! ## Features
//!
//! - 🧭 **Identifier-driven** - Services are registered and resolved by opaque
//!   string identifiers, so interfaces, aliases and concrete classes share one
//!   namespace
//! - 🔩 **Registered metadata instead of reflection** - Every constructible
//!   class registers a blueprint: constructor signature, inject-marked
//!   properties, inject-marked methods
//! - ♻️ **Four lifetimes** - Transient, scoped, singleton, and pre-built
//!   instance bindings
//! - 🧵 **Thread-safe** - Concurrent readers everywhere; singleton
//!   construction is double-checked per identifier
//! - 🗂️ **Two-tier prototype cache** - Bounded in-memory LRU over a versioned
//!   persistent directory
//! - 🔎 **Observable** - Stage traces, counters, duration histograms, and a
//!   telemetry timeline
//!
//! ## Quick Start
//!
//! ```rust
//! use keystone_di::prelude::*;
//!
//! struct Clock;
//! struct Logger {
//!     clock: std::sync::Arc<Clock>,
//! }
//!
//! let kernel = Kernel::builder()
//!     .register_class(
//!         ClassMetadata::builder("pkg.Clock")
//!             .constructor(vec![], |_| Ok(Box::new(Clock) as BoxedInstance))
//!             .build(),
//!     )
//!     .register_class(
//!         ClassMetadata::builder("pkg.Logger")
//!             .constructor(
//!                 vec![ParameterPrototype::new("clock").of_type("pkg.Clock")],
//!                 |args| {
//!                     let clock = args.expect_service::<Clock>("clock")?;
//!                     Ok(Box::new(Logger { clock }) as BoxedInstance)
//!                 },
//!             )
//!             .build(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! // Unregistered identifiers autowire through their class metadata.
//! let logger = kernel.get_as::<Logger>("pkg.Logger").unwrap();
//! let _ = &logger.clock;
//! ```
//!
//! ## Lifetimes
//!
//! ```rust
//! use keystone_di::prelude::*;
//!
//! struct Db;
//!
//! let kernel = Kernel::builder()
//!     .register_class(
//!         ClassMetadata::builder("pkg.Db")
//!             .constructor(vec![], |_| Ok(Box::new(Db) as BoxedInstance))
//!             .build(),
//!     )
//!     .define(ServiceDefinition::new("db", Concrete::class("pkg.Db")).singleton())
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! let a = kernel.get("db").unwrap();
//! let b = kernel.get("db").unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b));
//! ```

mod analyzer;
mod cache;
mod context;
mod definition;
mod engine;
mod error;
mod inject;
mod instantiate;
mod invoke;
mod kernel;
#[cfg(feature = "logging")]
pub mod logging;
mod observe;
mod pipeline;
mod prototype;
mod resolver;
mod scope;
mod trace;
mod types;
mod value;
mod verify;

pub use analyzer::{
    ClassMetadata, ClassMetadataBuilder, ConstructFn, ConstructorMeta, InjectMarker,
    MethodApplyFn, MethodInvokeFn, MethodMeta, PropertyMeta, PropertySetFn, TypeAnalyzer,
};
pub use cache::PrototypeCache;
pub use context::{KernelContext, ResolutionFlags, TraceId};
pub use definition::{
    Concrete, DecoratorSpec, DefinitionStore, Lifetime, ServiceDefinition, ServiceFactory,
};
pub use engine::ResolutionEngine;
pub use error::{ErrorKind, ResolutionError, Result};
pub use inject::{
    InjectionExecutor, InjectionInspection, InjectionReport, MemberKind, MemberOutcome,
};
pub use instantiate::Instantiator;
pub use invoke::{Callable, InvocationExecutor};
pub use kernel::{
    DefinitionBatch, FactoryContext, Kernel, KernelBuilder, KernelConfig, KernelConfigBuilder,
};
pub use observe::{DurationStats, Metrics, Observer, StepPhase, TelemetryEvent, Timeline};
pub use prototype::{
    MethodPrototype, ParameterPrototype, PropertyPrototype, PrototypeFactory, ServicePrototype,
    Visibility,
};
pub use resolver::{DependencyResolver, DependencySource};
pub use scope::{Scope, ScopeGuard, ScopeId, ScopeManager, Terminator};
pub use trace::{Outcome, ResolutionTrace, Stage, TraceEntry};
pub use types::TypeDescriptor;
pub use value::{seal, ArgumentList, ArgumentValue, BoxedInstance, Instance};
pub use verify::{VerificationReport, Verifier, VerifyHints};

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ArgumentList, ArgumentValue, BoxedInstance, Callable, ClassMetadata, Concrete, ErrorKind,
        InjectMarker, Instance, Kernel, KernelConfig, Lifetime, ParameterPrototype,
        ResolutionError, Result, ServiceDefinition, Visibility,
    };
    pub use std::sync::Arc;
}
