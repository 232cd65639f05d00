//! Fuzz target: `showvminfo --machinereadable` parsing.
//!
//! Arbitrary `VBoxManage` output must never panic the parser, and every
//! parsed key must be retrievable.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_core::MachineInfo;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let info = MachineInfo::parse(text);
    let _ = info.state();
    let _ = info.log_file();
    if info.is_empty() {
        assert_eq!(info.len(), 0);
    }
});
