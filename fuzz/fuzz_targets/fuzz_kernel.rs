#![no_main]

//! Fuzz target for kernel resolution
//!
//! Builds a kernel from an arbitrary dependency graph and resolves arbitrary
//! identifiers. Cycles, missing identifiers, and depth blowups must surface
//! as structured errors, never panics.

use arbitrary::Arbitrary;
use keystone_di::{
    ArgumentValue, BoxedInstance, ClassMetadata, Kernel, ParameterPrototype,
};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;

#[derive(Debug, Arbitrary)]
struct GraphSpec {
    /// Edge list over a small node universe; node i may depend on node j.
    edges: Vec<(u8, u8)>,
    /// Identifiers to resolve afterwards.
    requests: Vec<u8>,
    /// Overrides applied through make().
    with_overrides: bool,
}

struct Node;

const NODES: u8 = 8;

fn class_name(node: u8) -> String {
    format!("fuzz.Node{}", node % NODES)
}

fuzz_target!(|spec: GraphSpec| {
    // Collapse the edge list into per-node dependency lists.
    let mut deps: HashMap<u8, Vec<u8>> = HashMap::new();
    for (from, to) in spec.edges.iter().take(64) {
        let slot = deps.entry(from % NODES).or_default();
        if slot.len() < 4 {
            slot.push(to % NODES);
        }
    }

    let mut builder = Kernel::builder();
    for node in 0..NODES {
        let params: Vec<ParameterPrototype> = deps
            .get(&node)
            .map(|targets| {
                targets
                    .iter()
                    .enumerate()
                    .map(|(i, target)| {
                        ParameterPrototype::new(format!("dep{i}")).of_type(&class_name(*target))
                    })
                    .collect()
            })
            .unwrap_or_default();
        builder = builder.register_class(
            ClassMetadata::builder(class_name(node))
                .constructor(params, |_| Ok(Box::new(Node) as BoxedInstance))
                .build(),
        );
    }

    let Ok(kernel) = builder.build() else {
        return;
    };

    for request in spec.requests.iter().take(32) {
        let id = class_name(*request);
        if spec.with_overrides {
            let overrides: HashMap<String, ArgumentValue> =
                [("dep0".to_string(), ArgumentValue::service(Node))].into();
            let _ = kernel.make(&id, overrides);
        } else {
            let _ = kernel.get(&id);
        }
        let _ = kernel.has(&id);
    }
});
