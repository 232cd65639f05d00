//! Status polling: reconciles the handle with the backend's view of the VM.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use warden_core::VmState;

use crate::critical::CriticalSection;
use crate::runner::CommandRunner;
use crate::{SupervisorError, VmSupervisor};

impl<R: CommandRunner> VmSupervisor<R> {
    /// Queries the VM state once and updates the handle.
    ///
    /// Running time accumulates on `running` observations; a `paused`
    /// observation marks the VM suspended. Query failures and power-off
    /// observations each have their own counter and back-off; exceeding
    /// the query limit removes the VM, exceeding the power-off limit does not.
    ///
    /// # Errors
    /// Returns [`SupervisorError::StatusUnavailable`] or
    /// [`SupervisorError::UnexpectedPoweroff`] once a limit is exceeded.
    pub async fn poll(&mut self) -> Result<(), SupervisorError> {
        let _section = CriticalSection::enter(&self.host);
        let thresholds = self.config.thresholds;
        let observed = self.backend.vm_state(self.vm.name.as_str()).await;
        let now = Instant::now();

        let state = match observed {
            Ok(state) => state,
            Err(e) => {
                self.vm.poll_error_count += 1;
                self.vm.observe_stopped(now);
                let failures = self.vm.poll_error_count;
                error!(vm = %self.vm.name, failures, error = %e, "status query failed");
                tokio::time::sleep(thresholds.poll_error_delay()).await;
                if failures > thresholds.poll_error_limit {
                    error!(vm = %self.vm.name, failures, "status unavailable, giving up on the VM");
                    self.remove().await;
                    return Err(SupervisorError::StatusUnavailable { name: self.vm.name.to_string(), failures });
                }
                return Ok(());
            }
        };
        self.vm.poll_error_count = 0;

        match state {
            VmState::Running => {
                if self.vm.poweroff_error_count > 0 {
                    info!(vm = %self.vm.name, "VM running again");
                    self.vm.poweroff_error_count = 0;
                }
                self.vm.observe_running(now);
                debug!(vm = %self.vm.name, period_secs = self.vm.current_period.as_secs_f64(), "VM running");
            }
            VmState::Paused => {
                if !self.vm.suspended {
                    info!(vm = %self.vm.name, "VM observed paused");
                }
                self.vm.observe_paused(now);
            }
            VmState::PoweredOff => {
                self.vm.poweroff_error_count += 1;
                self.vm.observe_stopped(now);
                let observations = self.vm.poweroff_error_count;
                warn!(vm = %self.vm.name, observations, "VM is powered off");
                tokio::time::sleep(thresholds.poweroff_delay()).await;
                if observations > thresholds.poweroff_error_limit {
                    error!(vm = %self.vm.name, observations, "VM keeps powering off");
                    return Err(SupervisorError::UnexpectedPoweroff {
                        name: self.vm.name.to_string(),
                        observations,
                    });
                }
            }
            other => {
                self.vm.observe_stopped(now);
                warn!(vm = %self.vm.name, state = %other, "VM in unexpected state");
            }
        }
        Ok(())
    }
}
