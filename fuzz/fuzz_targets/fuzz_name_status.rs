#![no_main]

use deltacov_adapters_diff::{NameStatusOptions, parse_name_status_with_meta};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let options = NameStatusOptions::default();
        let result = parse_name_status_with_meta(text, &options);
        for file in &result.files {
            assert!(file.relative_path.ends_with(".java"));
            assert!(!file.qualified_name.is_empty());
        }
    }
});
