//! End-to-end resolution scenarios against the public kernel API.

use keystone_di::prelude::*;
use keystone_di::{DecoratorSpec, Outcome, Stage};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Fixture services
// =============================================================================

struct Clock;

struct Logger {
    clock: Option<Arc<Clock>>,
    writer_name: Option<String>,
}

struct FileWriter;
struct AuditWriter;

struct AuditService {
    logger: Arc<Logger>,
}

fn clock_metadata() -> ClassMetadata {
    ClassMetadata::builder("pkg.Clock")
        .constructor(vec![], |_| Ok(Box::new(Clock) as BoxedInstance))
        .build()
}

// =============================================================================
// S1: autowiring
// =============================================================================

#[test]
fn autowires_unregistered_classes_through_the_full_pipeline() {
    let kernel = Kernel::builder()
        .register_class(clock_metadata())
        .register_class(
            ClassMetadata::builder("pkg.Logger")
                .constructor(vec![], |_| {
                    Ok(Box::new(Logger {
                        clock: None,
                        writer_name: None,
                    }) as BoxedInstance)
                })
                .inject_property("clock", "pkg.Clock", |target, value| {
                    let logger = target
                        .downcast_mut::<Logger>()
                        .ok_or_else(|| ResolutionError::container_state("bad target"))?;
                    logger.clock = Arc::clone(&value).downcast::<Clock>().ok();
                    Ok(())
                })
                .build(),
        )
        .build()
        .unwrap();

    let (instance, trace) = kernel.get_traced("pkg.Logger").unwrap();
    let logger = instance.downcast::<Logger>().unwrap();
    assert!(logger.clock.is_some());

    assert_eq!(
        trace.stages(),
        vec![
            Stage::ContextualLookup,
            Stage::DefinitionLookup,
            Stage::Autowire,
            Stage::Instantiate,
            Stage::Inject,
            Stage::Success,
        ]
    );
    assert_eq!(trace.entries()[0].outcome, Outcome::Miss);
    assert_eq!(trace.entries()[1].outcome, Outcome::Miss);
    assert_eq!(trace.entries()[2].outcome, Outcome::Hit);
    assert_eq!(trace.entries()[3].outcome, Outcome::Hit);
}

// =============================================================================
// S2: contextual override
// =============================================================================

fn writer_kernel() -> Kernel {
    Kernel::builder()
        .register_interface("pkg.Writer")
        .register_class(
            ClassMetadata::builder("pkg.FileWriter")
                .constructor(vec![], |_| Ok(Box::new(FileWriter) as BoxedInstance))
                .build(),
        )
        .register_class(
            ClassMetadata::builder("pkg.AuditWriter")
                .constructor(vec![], |_| Ok(Box::new(AuditWriter) as BoxedInstance))
                .build(),
        )
        .register_class(
            ClassMetadata::builder("pkg.Logger")
                .constructor(
                    vec![ParameterPrototype::new("writer").of_type("pkg.Writer")],
                    |args| {
                        let value = args.get("writer").and_then(|v| v.as_service().cloned());
                        let name = value.as_ref().and_then(|instance| {
                            if Arc::clone(instance).downcast::<FileWriter>().is_ok() {
                                Some("file".to_string())
                            } else if Arc::clone(instance).downcast::<AuditWriter>().is_ok() {
                                Some("audit".to_string())
                            } else {
                                None
                            }
                        });
                        Ok(Box::new(Logger {
                            clock: None,
                            writer_name: name,
                        }) as BoxedInstance)
                    },
                )
                .build(),
        )
        .register_class(
            ClassMetadata::builder("pkg.AuditService")
                .constructor(
                    vec![ParameterPrototype::new("logger").of_type("pkg.Logger")],
                    |args| {
                        let logger = args.expect_service::<Logger>("logger")?;
                        Ok(Box::new(AuditService { logger }) as BoxedInstance)
                    },
                )
                .build(),
        )
        .define(ServiceDefinition::new(
            "pkg.Writer",
            Concrete::class("pkg.FileWriter"),
        ))
        .unwrap()
        .contextual(
            "pkg.AuditService",
            "pkg.Writer",
            Concrete::class("pkg.AuditWriter"),
        )
        .unwrap()
        .build()
        .unwrap()
}

#[test]
fn contextual_override_applies_only_under_the_declared_consumer() {
    let kernel = writer_kernel();

    let audit = kernel.get_as::<AuditService>("pkg.AuditService").unwrap();
    assert_eq!(audit.logger.writer_name.as_deref(), Some("audit"));

    let plain = kernel.get_as::<Logger>("pkg.Logger").unwrap();
    assert_eq!(plain.writer_name.as_deref(), Some("file"));
}

// =============================================================================
// S3: cycle
// =============================================================================

struct A;
struct B;

#[test]
fn constructor_cycle_fails_with_full_path() {
    let kernel = Kernel::builder()
        .register_class(
            ClassMetadata::builder("pkg.A")
                .constructor(
                    vec![ParameterPrototype::new("b").of_type("pkg.B")],
                    |_| Ok(Box::new(A) as BoxedInstance),
                )
                .build(),
        )
        .register_class(
            ClassMetadata::builder("pkg.B")
                .constructor(
                    vec![ParameterPrototype::new("a").of_type("pkg.A")],
                    |_| Ok(Box::new(B) as BoxedInstance),
                )
                .build(),
        )
        .build()
        .unwrap();

    let err = kernel.get("pkg.A").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cycle);
    assert_eq!(err.path, vec!["pkg.A", "pkg.B", "pkg.A"]);
}

// =============================================================================
// S4: singleton concurrency
// =============================================================================

#[test]
fn concurrent_singleton_resolution_runs_the_factory_once() {
    use std::sync::atomic::{AtomicU32, Ordering};

    static FACTORY_RUNS: AtomicU32 = AtomicU32::new(0);

    struct Db;

    let kernel = Kernel::builder()
        .define(
            ServiceDefinition::new(
                "DB",
                Concrete::factory(|_ctx| {
                    FACTORY_RUNS.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Db) as Instance)
                }),
            )
            .singleton(),
        )
        .unwrap()
        .build()
        .unwrap();

    let results: Vec<Instance> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..100)
            .map(|_| {
                let kernel = kernel.clone();
                scope.spawn(move || kernel.get("DB").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(FACTORY_RUNS.load(Ordering::SeqCst), 1);
    for instance in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], instance));
    }
}

// =============================================================================
// S5: scoped lifetime
// =============================================================================

#[test]
fn scoped_instances_are_shared_within_and_dropped_with_their_scope() {
    struct Request;

    let kernel = Kernel::builder()
        .define(
            ServiceDefinition::new(
                "Request",
                Concrete::factory(|_ctx| Ok(Arc::new(Request) as Instance)),
            )
            .scoped(),
        )
        .unwrap()
        .build()
        .unwrap();

    kernel.begin_scope();
    let first = kernel.get("Request").unwrap();
    let second = kernel.get("Request").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    kernel.end_scope().unwrap();

    kernel.begin_scope();
    let third = kernel.get("Request").unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    kernel.end_scope().unwrap();

    // Outside any scope, the scoped service is unreachable.
    let err = kernel.get("Request").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ScopeViolation);
}

// =============================================================================
// S6: call with overrides
// =============================================================================

#[test]
fn call_resolves_receiver_and_parameters_mixing_overrides() {
    struct Repo;
    struct Ctl;

    let kernel = Kernel::builder()
        .register_class(
            ClassMetadata::builder("pkg.Repo")
                .constructor(vec![], |_| Ok(Box::new(Repo) as BoxedInstance))
                .build(),
        )
        .register_class(
            ClassMetadata::builder("pkg.Ctl")
                .constructor(vec![], |_| Ok(Box::new(Ctl) as BoxedInstance))
                .method(
                    "save",
                    vec![
                        ParameterPrototype::new("repo").of_type("pkg.Repo"),
                        ParameterPrototype::new("id").of_type("int"),
                    ],
                    |receiver, args| {
                        assert!(receiver.is_some());
                        let _repo = args.expect_service::<Repo>("repo")?;
                        let id: i64 = args.expect_scalar("id")?;
                        Ok(ArgumentValue::scalar(json!(id * 2)))
                    },
                )
                .build(),
        )
        .build()
        .unwrap();

    let overrides: HashMap<_, _> = [("id".to_string(), ArgumentValue::scalar(json!(42)))].into();
    let result = kernel
        .call(&Callable::expression("pkg.Ctl@save"), overrides)
        .unwrap();
    assert_eq!(result.as_scalar(), Some(&json!(84)));
}

// =============================================================================
// S7: injection inspection
// =============================================================================

#[test]
fn inspection_enumerates_injection_points_without_acting() {
    use std::sync::atomic::{AtomicU32, Ordering};

    static SET_CLOCK_CALLS: AtomicU32 = AtomicU32::new(0);

    struct Holder;

    let kernel = Kernel::builder()
        .register_interface("LoggerInterface")
        .register_class(clock_metadata())
        .register_class(
            ClassMetadata::builder("pkg.Holder")
                .constructor(vec![], |_| Ok(Box::new(Holder) as BoxedInstance))
                .inject_property("logger", "LoggerInterface", |_, _| Ok(()))
                .inject_method(
                    "setClock",
                    vec![ParameterPrototype::new("clock").of_type("pkg.Clock")],
                    |_, _| {
                        SET_CLOCK_CALLS.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )
                .build(),
        )
        .build()
        .unwrap();

    let inspection = kernel.inspect_injection("pkg.Holder").unwrap();
    assert_eq!(
        inspection.properties.get("logger").map(String::as_str),
        Some("LoggerInterface")
    );
    assert_eq!(
        inspection.methods.get("setClock"),
        Some(&vec!["pkg.Clock".to_string()])
    );
    assert_eq!(SET_CLOCK_CALLS.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Decorators, aliases, tags, deadline
// =============================================================================

struct Plain;
struct Wrap1 {
    inner: Instance,
}
struct Wrap2 {
    inner: Instance,
}

#[test]
fn decorators_apply_in_registration_order() {
    let kernel = Kernel::builder()
        .register_class(
            ClassMetadata::builder("pkg.Plain")
                .constructor(vec![], |_| Ok(Box::new(Plain) as BoxedInstance))
                .build(),
        )
        .register_class(
            ClassMetadata::builder("pkg.Wrap1")
                .constructor(vec![ParameterPrototype::new("inner")], |args| {
                    let inner = args
                        .get("inner")
                        .and_then(|v| v.as_service().cloned())
                        .ok_or_else(|| ResolutionError::container_state("missing inner"))?;
                    Ok(Box::new(Wrap1 { inner }) as BoxedInstance)
                })
                .build(),
        )
        .register_class(
            ClassMetadata::builder("pkg.Wrap2")
                .constructor(vec![ParameterPrototype::new("inner")], |args| {
                    let inner = args
                        .get("inner")
                        .and_then(|v| v.as_service().cloned())
                        .ok_or_else(|| ResolutionError::container_state("missing inner"))?;
                    Ok(Box::new(Wrap2 { inner }) as BoxedInstance)
                })
                .build(),
        )
        .define(
            ServiceDefinition::new("svc", Concrete::class("pkg.Plain"))
                .decorate_with(DecoratorSpec::new("pkg.Wrap1", "inner"))
                .decorate_with(DecoratorSpec::new("pkg.Wrap2", "inner")),
        )
        .unwrap()
        .build()
        .unwrap();

    let outer = kernel.get_as::<Wrap2>("svc").unwrap();
    let middle = Arc::clone(&outer.inner).downcast::<Wrap1>().unwrap();
    assert!(Arc::clone(&middle.inner).downcast::<Plain>().is_ok());
}

#[test]
fn alias_chains_resolve_to_the_canonical_definition() {
    let kernel = Kernel::builder()
        .register_class(clock_metadata())
        .define(ServiceDefinition::new("impl", Concrete::class("pkg.Clock")).singleton())
        .unwrap()
        .alias("iface", "impl")
        .unwrap()
        .alias("shortcut", "iface")
        .unwrap()
        .build()
        .unwrap();

    let via_alias = kernel.get("shortcut").unwrap();
    let direct = kernel.get("impl").unwrap();
    assert!(Arc::ptr_eq(&via_alias, &direct));
}

#[test]
fn tagged_identifiers_resolve_in_registration_order() {
    struct H1;
    struct H2;

    let kernel = Kernel::builder()
        .define_many(|batch| {
            batch.define(
                ServiceDefinition::new(
                    "h1",
                    Concrete::factory(|_| Ok(Arc::new(H1) as Instance)),
                )
                .tag("handlers"),
            );
            batch.define(
                ServiceDefinition::new(
                    "h2",
                    Concrete::factory(|_| Ok(Arc::new(H2) as Instance)),
                )
                .tag("handlers"),
            );
        })
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(kernel.tagged("handlers"), vec!["h1", "h2"]);
    let resolved = kernel.resolve_tagged("handlers").unwrap();
    assert_eq!(resolved.len(), 2);
    assert!(Arc::clone(&resolved[0]).downcast::<H1>().is_ok());
    assert!(Arc::clone(&resolved[1]).downcast::<H2>().is_ok());
}

#[test]
fn deadline_expiry_surfaces_as_timeout() {
    struct Slow;

    let kernel = Kernel::builder()
        .define(
            ServiceDefinition::new(
                "slow",
                Concrete::factory(|_ctx| {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    Ok(Arc::new(Slow) as Instance)
                }),
            )
            .transient(),
        )
        .unwrap()
        .build()
        .unwrap();

    let err = kernel
        .get_within("slow", std::time::Duration::from_millis(5))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[test]
fn factories_resolve_their_own_dependencies_with_cycle_detection() {
    struct Config;
    struct Service {
        config: Arc<Config>,
    }

    let kernel = Kernel::builder()
        .instance("config", Config)
        .unwrap()
        .define(
            ServiceDefinition::new(
                "service",
                Concrete::factory(|ctx| {
                    let config = ctx.get_as::<Config>("config")?;
                    Ok(Arc::new(Service { config }) as Instance)
                }),
            )
            .singleton(),
        )
        .unwrap()
        .build()
        .unwrap();

    let service = kernel.get_as::<Service>("service").unwrap();
    let _ = &service.config;

    // A factory asking for its own identifier is a cycle, not a deadlock.
    let kernel = Kernel::builder()
        .define(
            ServiceDefinition::new(
                "selfish",
                Concrete::factory(|ctx| ctx.get("selfish")),
            )
            .transient(),
        )
        .unwrap()
        .build()
        .unwrap();
    let err = kernel.get("selfish").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cycle);
}

#[test]
fn inject_into_fills_an_existing_object() {
    struct Target {
        clock: Option<Arc<Clock>>,
    }

    let kernel = Kernel::builder()
        .register_class(clock_metadata())
        .register_class(
            ClassMetadata::builder("pkg.Target")
                .constructor(vec![], |_| {
                    Ok(Box::new(Target { clock: None }) as BoxedInstance)
                })
                .inject_property("clock", "pkg.Clock", |target, value| {
                    let t = target
                        .downcast_mut::<Target>()
                        .ok_or_else(|| ResolutionError::container_state("bad target"))?;
                    t.clock = Arc::clone(&value).downcast::<Clock>().ok();
                    Ok(())
                })
                .build(),
        )
        .build()
        .unwrap();

    assert!(kernel.can_inject("pkg.Target"));

    let mut target = Target { clock: None };
    let report = kernel.inject_into("pkg.Target", &mut target).unwrap();
    assert!(report.is_ok());
    assert!(target.clock.is_some());
}

#[test]
fn scope_terminators_run_in_reverse_insertion_order() {
    use std::sync::Mutex;

    struct Disposable(&'static str);

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let kernel = Kernel::builder()
        .define(
            ServiceDefinition::new(
                "first",
                Concrete::factory(|_| Ok(Arc::new(Disposable("first")) as Instance)),
            )
            .scoped(),
        )
        .unwrap()
        .define(
            ServiceDefinition::new(
                "second",
                Concrete::factory(|_| Ok(Arc::new(Disposable("second")) as Instance)),
            )
            .scoped(),
        )
        .unwrap()
        .with_terminator(move |id, _instance| {
            sink.lock().unwrap().push(id.to_string());
        })
        .build()
        .unwrap();

    {
        let _guard = kernel.scope_guard();
        kernel.get("first").unwrap();
        kernel.get("second").unwrap();
    }

    assert_eq!(*seen.lock().unwrap(), vec!["second", "first"]);
}

#[cfg(feature = "logging")]
#[test]
fn logging_plan_follows_kernel_config() {
    use keystone_di::logging::{self, LogFormat, SubscriberPlan};

    let kernel = Kernel::builder()
        .configure(|c| {
            c.dev_mode = true;
        })
        .register_class(clock_metadata())
        .build()
        .unwrap();

    let plan = SubscriberPlan::for_config(kernel.config());
    assert_eq!(plan.format, LogFormat::Pretty);
    assert_eq!(plan.directive(), "TRACE");

    // A second install can never win, backend or not.
    let first = logging::init_from_config(kernel.config());
    let second = logging::init_from_config(kernel.config());
    assert!(!(first && second));
}

#[test]
fn metrics_and_timeline_capture_resolutions() {
    let kernel = Kernel::builder()
        .register_class(clock_metadata())
        .define(ServiceDefinition::new("clock", Concrete::class("pkg.Clock")).singleton())
        .unwrap()
        .build()
        .unwrap();

    kernel.get("clock").unwrap();
    kernel.get("clock").unwrap();

    // One pipeline run; the second get is a scope hit.
    assert_eq!(
        kernel.metrics().resolutions_total("clock", Lifetime::Singleton),
        1
    );
    assert!(kernel.metrics().duration_stats("clock").is_some());
    assert!(!kernel.timeline().is_empty());
}
