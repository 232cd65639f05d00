//! Core types for the vm-warden VirtualBox supervisor.
//!
//! Defines the domain vocabulary shared by the executor and the wrapper
//! binary: VM run states and the status-dump parser, the VM name, the
//! host client contract with its status flags and init data, and the
//! preference lookups.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod host;
pub mod name;
pub mod prefs;
pub mod state;

pub use error::CoreError;
pub use host::{derive_cpu_count, HostClient, HostStatus, InitData, EXIT_ABORTED_BY_CLIENT, MAX_VM_CPUS};
pub use name::VmName;
pub use state::{MachineInfo, VmState};
