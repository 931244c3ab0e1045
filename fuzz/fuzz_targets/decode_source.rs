#![no_main]

use libfuzzer_sys::fuzz_target;
use retrograde_engine::fuzz::fuzz_decode_source;

fuzz_target!(|data: &[u8]| {
    fuzz_decode_source(data);
});
