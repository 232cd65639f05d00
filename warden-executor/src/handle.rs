//! VM handle: identity of the supervised VM plus its run-time bookkeeping.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use warden_core::{VmName, MAX_VM_CPUS};

use crate::{SupervisorConfig, SupervisorError};

/// The VM under supervision.
///
/// Counters and the running-time accumulator are updated by the
/// lifecycle operations and the poller; nothing here talks to the backend.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct VmHandle {
    pub name: VmName,

    /// Disk image attached to the IDE controller.
    pub disk_path: PathBuf,

    /// File persisting `name` across restarts of the wrapper.
    pub name_file: PathBuf,

    /// Virtual CPUs, always in `1..=3`.
    pub cpu_count: u8,

    /// Last known: the VM is paused.
    pub suspended: bool,

    /// Running time observed since the last progress report.
    pub current_period: Duration,

    /// Instant of the last observation that updated `current_period`.
    pub last_poll_point: Instant,

    pub poll_error_count: u32,
    pub start_error_count: u32,
    pub poweroff_error_count: u32,

    was_running: bool,
}

impl VmHandle {
    /// Create a handle; `cpu_count` is clamped to `1..=3`.
    #[must_use]
    pub fn new(name: VmName, disk_path: PathBuf, name_file: PathBuf, cpu_count: u8) -> Self {
        Self {
            name,
            disk_path,
            name_file,
            cpu_count: cpu_count.clamp(1, MAX_VM_CPUS),
            suspended: false,
            current_period: Duration::ZERO,
            last_poll_point: Instant::now(),
            poll_error_count: 0,
            start_error_count: 0,
            poweroff_error_count: 0,
            was_running: false,
        }
    }

    /// Records that the VM was (re)started or resumed at `now`.
    pub fn mark_resumed(&mut self, now: Instant) {
        self.suspended = false;
        self.was_running = true;
        self.last_poll_point = now;
    }

    /// Records a `running` observation.
    ///
    /// The interval since the previous observation counts only when the
    /// VM was already known to be running; after a pause, a power-off or
    /// a failed query the clock restarts instead.
    pub fn observe_running(&mut self, now: Instant) {
        if self.was_running && !self.suspended {
            self.current_period += now.saturating_duration_since(self.last_poll_point);
        }
        self.mark_resumed(now);
    }

    /// Records a `paused` observation, or a confirmed pause.
    ///
    /// The first one after running time adds that running time once;
    /// repeated paused observations add nothing.
    pub fn observe_paused(&mut self, now: Instant) {
        if !self.suspended {
            if self.was_running {
                self.current_period += now.saturating_duration_since(self.last_poll_point);
            }
            self.suspended = true;
        }
        self.was_running = false;
        self.last_poll_point = now;
    }

    /// Records an observation that is neither running nor paused
    /// (powered off, saved, unknown, or a failed query). Adds nothing.
    pub fn observe_stopped(&mut self, now: Instant) {
        self.was_running = false;
        self.last_poll_point = now;
    }

    /// Takes the accumulated running time, leaving zero behind.
    pub fn drain_period(&mut self) -> Duration {
        std::mem::take(&mut self.current_period)
    }
}

/// Reads a VM name persisted by an earlier run.
///
/// # Errors
/// Returns [`SupervisorError::NameFile`] if the file exists but cannot be read,
/// or [`SupervisorError::Core`] if its content is not a valid name.
pub async fn read_persisted_name(path: &Path) -> Result<Option<VmName>, SupervisorError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(VmName::new(content.trim())?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SupervisorError::NameFile { path: path.to_owned(), source }),
    }
}

/// Picks the VM name: a persisted name wins, then the command-line
/// override, then a generated or default name.
///
/// # Errors
/// Propagates [`read_persisted_name`] errors and name validation failures.
pub async fn resolve_vm_name(
    config: &SupervisorConfig,
    requested: Option<&str>,
) -> Result<VmName, SupervisorError> {
    let name_file = config.name_file_path();
    if let Some(persisted) = read_persisted_name(&name_file).await? {
        if let Some(requested) = requested.filter(|r| *r != persisted.as_str()) {
            tracing::warn!(
                persisted = %persisted,
                requested,
                "VM name file exists, ignoring requested name"
            );
        }
        return Ok(persisted);
    }
    if let Some(requested) = requested {
        return Ok(VmName::new(requested)?);
    }
    if config.unique_name {
        return Ok(VmName::generate(Utc::now()));
    }
    Ok(VmName::new(config.default_vm_name.as_str())?)
}
