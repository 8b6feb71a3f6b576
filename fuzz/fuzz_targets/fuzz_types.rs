#![no_main]

//! Fuzz target for type descriptor parsing
//!
//! Arbitrary strings must parse without panicking, and the parse/format pair
//! must be stable after one normalization pass.

use keystone_di::TypeDescriptor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: &str| {
    let descriptor = TypeDescriptor::parse(input);
    let formatted = descriptor.format();

    // Formatting a parsed descriptor must be a fixed point.
    let reparsed = TypeDescriptor::parse(&formatted);
    assert_eq!(reparsed.format(), formatted);

    // Derived predicates must not panic.
    let _ = descriptor.is_scalar();
    let _ = descriptor.allows_null();
    let _ = descriptor.base_names();

    // The serde boundary uses the same string form.
    if let Ok(json) = serde_json::to_string(&descriptor) {
        let _: Result<TypeDescriptor, _> = serde_json::from_str(&json);
    }
});
