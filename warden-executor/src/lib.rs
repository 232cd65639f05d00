//! VirtualBox lifecycle supervision for vm-warden.
//!
//! Drives one VM through `VBoxManage`: registration, start, pause and
//! resume following the host, periodic status polling with running-time
//! accounting, and teardown. The control program sits behind the
//! [`CommandRunner`] trait so the whole lifecycle runs against a fake
//! in tests.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod critical;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod platform;
pub mod poller;
pub mod progress;
pub mod provision;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod supervisor;
pub mod vbox;

pub use config::{SupervisorConfig, Thresholds};
pub use error::{BackendError, Exit, SupervisorError};
pub use handle::{read_persisted_name, resolve_vm_name, VmHandle};
pub use platform::{Platform, PlatformPaths};
pub use progress::{fraction_done, ProgressFile};
pub use provision::ProvisioningData;
pub use retry::{retry_with_backoff, RetryOutcome, RetryPolicy};
pub use runner::{CommandOutput, CommandRunner, VBoxManageRunner};
pub use supervisor::{LaunchOptions, VmSupervisor};
pub use vbox::{ControlAction, VBoxManage};
