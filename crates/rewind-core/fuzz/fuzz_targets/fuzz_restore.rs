#![no_main]
use libfuzzer_sys::fuzz_target;
use rewind_core::serialize::restore;
use rewind_core::test_utils::*;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a World payload. Must not panic -- Err is fine.
    let Ok(registry) = sample_registry() else {
        return;
    };
    if let Ok(world) = restore::<World>(&registry, data) {
        release_world(&world);
    }
});
