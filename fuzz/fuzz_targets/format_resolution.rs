#![no_main]

use libfuzzer_sys::fuzz_target;
use pixpress::FormatRegistry;

fuzz_target!(|input: (Option<&str>, &str)| {
    let registry = FormatRegistry::default();
    let resolution = registry.resolve(input.0, input.1);
    assert!(registry.is_allowed(resolution.format));
});
