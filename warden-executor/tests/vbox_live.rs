//! Integration tests against a real VirtualBox installation.
//!
//! These tests require `VBoxManage` in `PATH`.
//! Run with: `cargo test --test vbox_live -- --ignored`

use warden_core::VmState;
use warden_executor::vbox::listing_contains;
use warden_executor::{VBoxManage, VBoxManageRunner};

const SCRATCH_VM: &str = "warden_live_test_vm";

#[tokio::test]
#[ignore = "requires VirtualBox"]
async fn version_is_reported() {
    let vbox = VBoxManage::new(VBoxManageRunner::with_defaults());
    let version = vbox.version().await.expect("VBoxManage --version failed");
    println!("VirtualBox version: {version}");
    assert!(version.chars().next().is_some_and(|c| c.is_ascii_digit()));
}

#[tokio::test]
#[ignore = "requires VirtualBox"]
async fn register_query_and_unregister_scratch_vm() {
    let vbox = VBoxManage::new(VBoxManageRunner::with_defaults());
    vbox.unregister(SCRATCH_VM, true).await;

    assert!(vbox.create_vm(SCRATCH_VM, "Linux26").await, "createvm failed");
    let listing = vbox.list_vms().await.expect("list vms failed");
    assert!(listing_contains(&listing, SCRATCH_VM));

    let state = vbox.vm_state(SCRATCH_VM).await.expect("showvminfo failed");
    assert_eq!(state, VmState::PoweredOff);

    assert!(vbox.unregister(SCRATCH_VM, true).await, "unregistervm failed");
    let listing = vbox.list_vms().await.expect("list vms failed");
    assert!(!listing_contains(&listing, SCRATCH_VM));
}

#[tokio::test]
#[ignore = "requires VirtualBox"]
async fn querying_unknown_vm_fails() {
    let vbox = VBoxManage::new(VBoxManageRunner::with_defaults());
    assert!(vbox.show_vm_info("warden_no_such_vm").await.is_err());
}
