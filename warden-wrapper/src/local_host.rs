//! Standalone [`HostClient`] backed by the slot directory and process signals.
//!
//! Host requests arrive as Unix signals:
//!
//! | Signal  | Meaning                          |
//! |---------|----------------------------------|
//! | SIGINT  | quit, resume later               |
//! | SIGTERM | abort the task                   |
//! | SIGUSR1 | toggle suspend                   |
//! | SIGUSR2 | project preferences changed      |
//!
//! Other platforms only map Ctrl-C to quit.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use warden_core::{CoreError, HostClient, HostStatus, InitData};

/// Host client for running outside a volunteer computing client.
#[derive(Debug)]
pub struct LocalHost {
    slot: PathBuf,
    init_data_path: PathBuf,
    suspended: AtomicBool,
    quit: AtomicBool,
    abort: AtomicBool,
    preferences_changed: AtomicBool,
    critical_depth: AtomicUsize,
    /// `f64` bits of the last reported fraction.
    fraction: AtomicU64,
}

impl LocalHost {
    /// # Arguments
    /// - `slot`: directory holding the task's files
    /// - `init_data`: init data file; relative paths are joined to `slot`
    #[must_use]
    pub fn new(slot: impl Into<PathBuf>, init_data: &Path) -> Self {
        let slot = slot.into();
        let init_data_path = slot.join(init_data);
        Self {
            slot,
            init_data_path,
            suspended: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            preferences_changed: AtomicBool::new(false),
            critical_depth: AtomicUsize::new(0),
            fraction: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    pub fn request_quit(&self) {
        info!("quit requested");
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn request_abort(&self) {
        info!("abort requested");
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Flips the suspend flag and returns the new value.
    pub fn toggle_suspend(&self) -> bool {
        let suspended = !self.suspended.fetch_xor(true, Ordering::SeqCst);
        info!(suspended, "suspend toggled");
        suspended
    }

    pub fn notify_preferences_changed(&self) {
        info!("preferences changed");
        self.preferences_changed.store(true, Ordering::SeqCst);
    }

    /// Last fraction passed to [`HostClient::report_progress`].
    #[must_use]
    pub fn last_fraction(&self) -> f64 {
        f64::from_bits(self.fraction.load(Ordering::SeqCst))
    }
}

impl HostClient for LocalHost {
    fn status(&self) -> HostStatus {
        let mut status = HostStatus::idle().with_suspended(self.suspended.load(Ordering::SeqCst));
        // Stop requests stay pending until every critical section closes.
        if !self.in_critical_section() {
            if self.quit.load(Ordering::SeqCst) {
                status = status.with_quit();
            }
            if self.abort.load(Ordering::SeqCst) {
                status = status.with_abort();
            }
        }
        if self.preferences_changed.swap(false, Ordering::SeqCst) {
            status = status.with_preferences_changed();
        }
        status
    }

    fn report_progress(&self, fraction: f64) {
        self.fraction.store(fraction.to_bits(), Ordering::SeqCst);
        debug!(fraction, "progress");
    }

    fn checkpoint(&self) {
        debug!("checkpoint");
    }

    fn finish(&self, code: i32) {
        info!(code, "task finished");
    }

    fn temporary_exit(&self, delay: Duration, reason: &str) {
        info!(delay_secs = delay.as_secs(), reason, "temporary exit");
    }

    fn resolve_filename(&self, logical_name: &str) -> Result<PathBuf, CoreError> {
        let path = self.slot.join(logical_name);
        if path.exists() {
            Ok(path)
        } else {
            Err(CoreError::UnresolvedFile { name: logical_name.to_owned() })
        }
    }

    fn read_init_data(&self) -> Result<InitData, CoreError> {
        let raw = match std::fs::read_to_string(&self.init_data_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.init_data_path.display(), "no init data, using defaults");
                return Ok(InitData::default());
            }
            Err(e) => return Err(CoreError::Io(e)),
        };
        serde_json::from_str(&raw).map_err(|e| CoreError::InitData { reason: e.to_string() })
    }

    fn begin_critical_section(&self) {
        self.critical_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn end_critical_section(&self) {
        let previous = self
            .critical_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
        if previous.is_err() {
            warn!("critical section ended without a matching begin");
        }
    }

    fn in_critical_section(&self) -> bool {
        self.critical_depth.load(Ordering::SeqCst) > 0
    }
}

/// Routes process signals to `host` for the lifetime of the runtime.
///
/// # Errors
/// Returns an error if a signal handler cannot be registered.
#[cfg(unix)]
pub fn spawn_signal_listener(host: Arc<LocalHost>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = interrupt.recv() => host.request_quit(),
                Some(()) = terminate.recv() => host.request_abort(),
                Some(()) = user1.recv() => {
                    host.toggle_suspend();
                }
                Some(()) = user2.recv() => host.notify_preferences_changed(),
                else => break,
            }
        }
    });
    Ok(())
}

/// Routes Ctrl-C to `host` as a quit request.
///
/// # Errors
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn spawn_signal_listener(host: Arc<LocalHost>) -> std::io::Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            host.request_quit();
        }
    });
    Ok(())
}
