//! Translates host control flags into lifecycle operations.

use std::time::Duration;

use tracing::{debug, info, warn};
use warden_core::{HostStatus, EXIT_ABORTED_BY_CLIENT};

use crate::runner::CommandRunner;
use crate::{Exit, SupervisorError, VmSupervisor};

impl<R: CommandRunner> VmSupervisor<R> {
    /// Acts on one status snapshot.
    ///
    /// Preference changes re-apply the CPU cap. Quit and missing
    /// heartbeats save the VM and exit temporarily; abort saves, removes
    /// and finishes with [`EXIT_ABORTED_BY_CLIENT`]. Otherwise the VM is
    /// paused or resumed to follow the host's suspend flag, issuing at
    /// most one transition per flag change.
    ///
    /// Quit and abort are deferred while a critical section is open.
    ///
    /// # Errors
    /// Propagates transition failures from pause, resume and save.
    pub async fn dispatch(&mut self, status: HostStatus) -> Result<Option<Exit>, SupervisorError> {
        if status.preferences_changed {
            info!(vm = %self.vm.name, "preferences changed, reapplying CPU cap");
            self.throttle().await;
        }

        let stop_requested = status.quit_requested || status.no_heartbeat || status.abort_requested;
        if stop_requested && self.host.in_critical_section() {
            debug!(vm = %self.vm.name, "stop request deferred until the critical section closes");
            return Ok(None);
        }

        if status.abort_requested {
            warn!(vm = %self.vm.name, "host aborted the task");
            if let Err(e) = self.savestate().await {
                warn!(vm = %self.vm.name, error = %e, "could not save VM state before removal");
            }
            self.remove().await;
            return Ok(Some(Exit::Finished { code: EXIT_ABORTED_BY_CLIENT }));
        }

        if status.quit_requested || status.no_heartbeat {
            let reason = if status.no_heartbeat { "no heartbeat from host" } else { "host requested quit" };
            info!(vm = %self.vm.name, reason, "saving VM state before stopping");
            self.savestate().await?;
            return Ok(Some(Exit::Temporary { delay: Duration::ZERO, reason: reason.to_owned() }));
        }

        if status.suspended {
            if !self.vm.suspended {
                info!(vm = %self.vm.name, "host suspended, pausing VM");
                self.pause().await?;
            }
        } else if self.vm.suspended {
            info!(vm = %self.vm.name, "host resumed, resuming VM");
            self.resume().await?;
        }
        Ok(None)
    }
}
