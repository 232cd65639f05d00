//! Scoped critical sections on the host.

use std::sync::Arc;

use warden_core::HostClient;

/// Keeps the host from acting on quit/abort while a backend sequence
/// is in flight. Entering opens a section; dropping closes it, on every
/// exit path. Sections nest.
#[must_use = "the critical section closes as soon as the guard is dropped"]
pub struct CriticalSection {
    host: Arc<dyn HostClient>,
}

impl CriticalSection {
    pub fn enter(host: &Arc<dyn HostClient>) -> Self {
        host.begin_critical_section();
        Self { host: Arc::clone(host) }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        self.host.end_critical_section();
    }
}

impl std::fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriticalSection").finish_non_exhaustive()
    }
}
