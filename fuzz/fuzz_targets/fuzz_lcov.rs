#![no_main]

use deltacov_adapters_coverage::{bundle_from_lcov, parse_lcov};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data)
        && let Ok(map) = parse_lcov(text)
    {
        let _ = bundle_from_lcov(&map, "fuzz", "src/main/java/");
    }
});
