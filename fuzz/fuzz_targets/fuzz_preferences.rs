//! Fuzz target: project preference tag extraction.
//!
//! Tags may be missing, unterminated or nested; lookups must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_core::prefs::{parse_bool, parse_double};

fuzz_target!(|data: &[u8]| {
    let Ok(prefs) = std::str::from_utf8(data) else {
        return;
    };
    for tag in ["max_vm_cpu_pct", "vm_headless_mode", ""] {
        let _ = parse_double(prefs, tag);
        let _ = parse_bool(prefs, tag);
    }
});
