#![no_main]

//! Fuzz target for the scope manager
//!
//! Random begin/end/put/lookup sequences. The root scope must survive every
//! sequence, and end_scope on the root must fail instead of panicking.

use arbitrary::Arbitrary;
use keystone_di::{Lifetime, ScopeManager};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
enum ScopeOp {
    Begin,
    End,
    PutSingleton(String),
    PutScoped(String),
    PutTransient(String),
    Lookup(String),
    Has(String),
    Depth,
    ClearRoot,
}

fuzz_target!(|ops: Vec<ScopeOp>| {
    let scopes = ScopeManager::new();

    for op in ops.into_iter().take(256) {
        match op {
            ScopeOp::Begin => {
                scopes.begin_scope();
            }
            ScopeOp::End => {
                let _ = scopes.end_scope();
            }
            ScopeOp::PutSingleton(id) => {
                let _ = scopes.put(&id, Arc::new(0u32), Lifetime::Singleton);
            }
            ScopeOp::PutScoped(id) => {
                let _ = scopes.put(&id, Arc::new(0u32), Lifetime::Scoped);
            }
            ScopeOp::PutTransient(id) => {
                let _ = scopes.put(&id, Arc::new(0u32), Lifetime::Transient);
            }
            ScopeOp::Lookup(id) => {
                let _ = scopes.lookup(&id);
            }
            ScopeOp::Has(id) => {
                let _ = scopes.has(&id);
            }
            ScopeOp::Depth => {
                assert!(scopes.depth() >= 1);
            }
            ScopeOp::ClearRoot => {
                scopes.clear_root();
            }
        }
    }

    // The root always survives.
    assert!(scopes.depth() >= 1);
});
