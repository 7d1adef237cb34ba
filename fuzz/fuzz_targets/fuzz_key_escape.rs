// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for document key escaping: unescape(escape(k)) == k

#![no_main]

use libfuzzer_sys::fuzz_target;
use tank_document::escape::{escape_key, unescape_key, DOLLAR_SUBSTITUTE, DOT_SUBSTITUTE};

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = std::str::from_utf8(data) {
        // Keys already holding a substitute are stored as-is.
        if key.contains(DOT_SUBSTITUTE) || key.contains(DOLLAR_SUBSTITUTE) {
            return;
        }
        let escaped = escape_key(key);
        assert!(!escaped.contains('.'));
        assert!(!escaped.contains('$'));
        assert_eq!(unescape_key(&escaped), key);
    }
});
