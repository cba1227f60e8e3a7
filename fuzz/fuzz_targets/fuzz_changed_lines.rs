#![no_main]

use deltacov_adapters_diff::{collapse_lines, parse_changed_lines};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let lines = parse_changed_lines(text);
        assert!(!lines.contains(&0));
        let covered: usize = collapse_lines(&lines)
            .iter()
            .map(|range| (range.end() - range.start()) as usize + 1)
            .sum();
        assert_eq!(covered, lines.len());
    }
});
