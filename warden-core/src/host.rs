//! Host-side contract: what the supervisor asks of the volunteer
//! computing client and what it receives from it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prefs;
use crate::CoreError;

/// Exit status reported when the host aborts the task.
pub const EXIT_ABORTED_BY_CLIENT: i32 = 194;

/// Upper bound on virtual CPUs handed to the VM.
pub const MAX_VM_CPUS: u8 = 3;

/// Snapshot of the host's control flags, taken once per loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
#[allow(clippy::struct_excessive_bools)]
pub struct HostStatus {
    /// The host wants computation paused.
    pub suspended: bool,
    /// The host asked the task to stop temporarily.
    pub quit_requested: bool,
    /// The host asked the task to give up for good.
    pub abort_requested: bool,
    /// The host stopped sending heartbeats.
    pub no_heartbeat: bool,
    /// The project preferences were reread.
    pub preferences_changed: bool,
}

impl HostStatus {
    /// A status with every flag cleared.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    #[must_use]
    pub fn with_quit(mut self) -> Self {
        self.quit_requested = true;
        self
    }

    #[must_use]
    pub fn with_abort(mut self) -> Self {
        self.abort_requested = true;
        self
    }

    #[must_use]
    pub fn with_no_heartbeat(mut self) -> Self {
        self.no_heartbeat = true;
        self
    }

    #[must_use]
    pub fn with_preferences_changed(mut self) -> Self {
        self.preferences_changed = true;
        self
    }
}

/// Initialization data supplied by the host at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct InitData {
    /// Raw project preference blob.
    pub project_preferences: Option<String>,
    /// Number of host cores available to the client.
    pub host_core_count: u32,
    /// Share of cores the volunteer allows, in percent.
    pub max_ncpus_pct: f64,
    pub user_name: String,
    pub authenticator: String,
    pub user_id: i64,
    pub host_id: i64,
    pub user_total_credit: f64,
    pub host_total_credit: f64,
}

impl Default for InitData {
    fn default() -> Self {
        Self {
            project_preferences: None,
            host_core_count: 1,
            max_ncpus_pct: 100.0,
            user_name: String::new(),
            authenticator: String::new(),
            user_id: 0,
            host_id: 0,
            user_total_credit: 0.0,
            host_total_credit: 0.0,
        }
    }
}

impl InitData {
    /// CPU execution cap from `<max_vm_cpu_pct>`, if the project set one.
    #[must_use]
    pub fn max_vm_cpu_pct(&self) -> Option<f64> {
        prefs::parse_double(self.project_preferences.as_deref()?, "max_vm_cpu_pct")
    }

    /// Display preference from `<vm_headless_mode>`.
    #[must_use]
    pub fn headless_preference(&self) -> Option<bool> {
        prefs::parse_bool(self.project_preferences.as_deref()?, "vm_headless_mode")
    }

    /// Virtual CPUs to give the VM, see [`derive_cpu_count`].
    #[must_use]
    pub fn vm_cpu_count(&self) -> u8 {
        derive_cpu_count(self.host_core_count, self.max_ncpus_pct)
    }
}

/// Derives the VM's CPU count from the host core count and the allowed
/// percentage: the floor of the usable cores when above one, capped at
/// [`MAX_VM_CPUS`], and never below one.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn derive_cpu_count(host_cores: u32, max_ncpus_pct: f64) -> u8 {
    let usable = f64::from(host_cores) * max_ncpus_pct / 100.0;
    if !usable.is_finite() || usable <= 1.0 {
        1
    } else if usable >= f64::from(MAX_VM_CPUS) {
        MAX_VM_CPUS
    } else {
        usable.floor() as u8
    }
}

/// The volunteer computing client hosting this task.
///
/// Implementations must be `Send + Sync`; the supervisor keeps one behind
/// an `Arc` and hands clones to critical-section guards.
pub trait HostClient: Send + Sync {
    /// Current control flags.
    fn status(&self) -> HostStatus;

    /// Reports the completed fraction of the job, in `[0, 1]`.
    fn report_progress(&self, fraction: f64);

    /// Marks the current progress as durable.
    fn checkpoint(&self);

    /// Announces final completion with the given exit status.
    fn finish(&self, code: i32);

    /// Announces a temporary stop; the host should restart the task after `delay`.
    fn temporary_exit(&self, delay: Duration, reason: &str);

    /// Maps a logical file name to a physical path in the slot.
    ///
    /// # Errors
    /// Returns [`CoreError::UnresolvedFile`] if the name cannot be resolved.
    fn resolve_filename(&self, logical_name: &str) -> Result<PathBuf, CoreError>;

    /// Reads (or rereads) the initialization data.
    ///
    /// # Errors
    /// Returns [`CoreError::InitData`] if the data is unreadable.
    fn read_init_data(&self) -> Result<InitData, CoreError>;

    /// Opens a region during which quit/abort must not be acted upon. Nests.
    fn begin_critical_section(&self);

    /// Closes the innermost critical region.
    fn end_critical_section(&self);

    /// Whether a critical region is currently open.
    fn in_critical_section(&self) -> bool {
        false
    }
}
