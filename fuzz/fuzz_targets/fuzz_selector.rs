// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Fuzz target for the selector parser and the watch timeout parser.
// Run with: cargo +nightly fuzz run fuzz_selector
//
// Both parse untrusted request bodies and must reject bad input with an
// error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if input.len() <= 4096 {
            if let Ok(cond) = tank_condition::parse_selector(input) {
                let _ = tank_document::to_native(&cond);
            }
            let _ = tank_core::parse_duration(input);
        }
    }
});
