//! Error types for the executor crate.

use std::path::PathBuf;
use std::time::Duration;

use warden_core::{CoreError, VmState};

/// A backend command that did not succeed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// `VBoxManage` exited unsuccessfully or could not be launched.
    #[error("VBoxManage {subcommand} failed: {output}")]
    CommandFailed { subcommand: String, output: String },
}

/// How the supervisor ends, as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// The task is over; `code` is its final exit status.
    Finished { code: i32 },
    /// The task stops now and should be restarted after `delay`.
    Temporary { delay: Duration, reason: String },
}

impl Exit {
    /// Process exit status for this outcome.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Finished { code } => *code,
            Self::Temporary { .. } => 0,
        }
    }
}

/// Errors that end supervision of the VM.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// The backend refused to register the VM.
    #[error("failed to register VM {name}")]
    RegisterFailed { name: String },

    /// The disk image could not be attached.
    #[error("failed to attach disk {} to VM {name}", path.display())]
    AttachDiskFailed { name: String, path: PathBuf },

    /// The VM name could not be persisted or read back.
    #[error("VM name file {}: {source}", path.display())]
    NameFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every start attempt failed.
    #[error("VM {name} failed to start after {attempts} attempts")]
    StartFailed { name: String, attempts: u32 },

    /// Status queries kept failing.
    #[error("status query for VM {name} failed {failures} consecutive times")]
    StatusUnavailable { name: String, failures: u32 },

    /// The VM kept turning up powered off.
    #[error("VM {name} observed powered off {observations} consecutive times")]
    UnexpectedPoweroff { name: String, observations: u32 },

    /// A pause, resume or save was never confirmed.
    #[error("VM {name} did not reach state {target} after {attempts} attempts")]
    TransitionTimeout {
        name: String,
        target: VmState,
        attempts: u32,
        retry_after: Duration,
    },

    /// A resume found the VM saved instead of running.
    #[error("VM {name} drifted into the saved state while resuming")]
    DriftedToSaved { name: String, retry_after: Duration },

    /// The list of registered VMs could not be obtained.
    #[error("cannot list registered VMs: {0}")]
    ListFailed(#[source] BackendError),

    /// The progress file exists but cannot be interpreted.
    #[error("progress file {} is unreadable: {reason}", path.display())]
    Progress { path: PathBuf, reason: String },

    /// The provisioning medium could not be built.
    #[error("provisioning data rejected: {0}")]
    Provisioning(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// The exit this error forces: a temporary exit for unconfirmed
    /// transitions, a failed finish for everything else.
    #[must_use]
    pub fn exit(&self) -> Exit {
        match self {
            Self::TransitionTimeout { retry_after, .. } | Self::DriftedToSaved { retry_after, .. } => {
                Exit::Temporary { delay: *retry_after, reason: self.to_string() }
            }
            _ => Exit::Finished { code: 1 },
        }
    }
}
