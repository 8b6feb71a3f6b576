#![no_main]

//! Fuzz target for the definition store
//!
//! Exercises define/alias/contextual/tag sequences with arbitrary
//! identifiers, including replacement and freeze behavior.

use arbitrary::Arbitrary;
use keystone_di::{Concrete, DefinitionStore, Lifetime, ServiceDefinition};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum StoreOp {
    Define {
        id: String,
        class: String,
        lifetime: u8,
        tag: Option<String>,
    },
    Alias {
        id: String,
        target: String,
    },
    Contextual {
        consumer: String,
        needed: String,
        class: String,
    },
    ResolveAlias(String),
    Tagged(String),
    Has(String),
    Get(String),
    All,
    Freeze,
}

fn lifetime_from(raw: u8) -> Lifetime {
    match raw % 4 {
        0 => Lifetime::Transient,
        1 => Lifetime::Scoped,
        2 => Lifetime::Singleton,
        _ => Lifetime::Instance,
    }
}

fuzz_target!(|ops: Vec<StoreOp>| {
    let store = DefinitionStore::new();

    for op in ops {
        match op {
            StoreOp::Define {
                id,
                class,
                lifetime,
                tag,
            } => {
                let mut def = ServiceDefinition::new(id, Concrete::class(class))
                    .lifetime(lifetime_from(lifetime));
                if let Some(tag) = tag {
                    def = def.tag(tag);
                }
                let _ = store.define(def);
            }
            StoreOp::Alias { id, target } => {
                let _ = store.alias(id, target);
            }
            StoreOp::Contextual {
                consumer,
                needed,
                class,
            } => {
                let _ = store.contextual(consumer, needed, Concrete::class(class));
            }
            StoreOp::ResolveAlias(id) => {
                // Must terminate: either a canonical id or an alias-cycle error.
                let _ = store.resolve_alias(&id);
            }
            StoreOp::Tagged(tag) => {
                let _ = store.tagged(&tag);
            }
            StoreOp::Has(id) => {
                let _ = store.has(&id);
            }
            StoreOp::Get(id) => {
                let _ = store.get(&id);
            }
            StoreOp::All => {
                let _ = store.all();
            }
            StoreOp::Freeze => {
                store.freeze();
            }
        }
    }
});
