//! Fuzz target: init data decoding and CPU count derivation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_core::{InitData, MAX_VM_CPUS};

fuzz_target!(|data: &[u8]| {
    let Ok(init) = serde_json::from_slice::<InitData>(data) else {
        return;
    };
    let cpus = init.vm_cpu_count();
    assert!((1..=MAX_VM_CPUS).contains(&cpus), "CPU count out of range: {cpus}");
    let _ = init.max_vm_cpu_pct();
    let _ = init.headless_preference();
});
