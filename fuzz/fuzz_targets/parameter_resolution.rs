#![no_main]

use libfuzzer_sys::fuzz_target;
use retrograde_engine::fuzz::fuzz_resolve_parameters;

fuzz_target!(|data: &[u8]| {
    fuzz_resolve_parameters(data);
});
