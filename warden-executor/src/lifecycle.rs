//! VM lifecycle operations: create, start, throttle, pause, resume,
//! save and remove.
//!
//! Every operation that issues a multi-step backend sequence holds a
//! [`CriticalSection`] for its whole duration.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use warden_core::VmState;

use crate::critical::CriticalSection;
use crate::platform::is_named_vm_folder;
use crate::registry::rewrite_registry;
use crate::retry::{retry_with_backoff, RetryOutcome};
use crate::runner::CommandRunner;
use crate::vbox::{find_hwvirt_marker, ControlAction, MediumKind, FLOPPY_CONTROLLER, IDE_CONTROLLER};
use crate::{BackendError, SupervisorError, VmSupervisor};

const RESTRICTED_CLOSE_ACTIONS: (&str, &str) =
    ("GUI/RestrictedCloseActions", "SaveState,Shutdown,PowerOff,Restore");

impl<R: CommandRunner> VmSupervisor<R> {
    /// Registers the VM, configures its hardware, attaches the disk and
    /// persists its name.
    ///
    /// Optional steps (port forwarding, provisioning floppy) only log on
    /// failure. A failed registration or disk attach removes whatever
    /// was created and is fatal.
    ///
    /// # Errors
    /// Returns [`SupervisorError::RegisterFailed`], [`SupervisorError::AttachDiskFailed`]
    /// or [`SupervisorError::NameFile`].
    pub async fn create(&mut self) -> Result<(), SupervisorError> {
        let name = self.vm.name.clone();
        let vm = name.as_str();
        info!(vm, cpus = self.vm.cpu_count, memory_mb = self.config.memory_mb, "registering VM");

        if !self.backend.create_vm(vm, &self.config.os_type).await {
            error!(vm, "VM registration failed");
            self.remove().await;
            return Err(SupervisorError::RegisterFailed { name: vm.to_owned() });
        }
        if !self.backend.configure_hardware(vm, self.vm.cpu_count, self.config.memory_mb).await {
            warn!(vm, "hardware configuration failed");
        }
        if let Some(rule) = &self.config.port_forward {
            if !self.backend.add_nat_port_forward(vm, rule).await {
                warn!(vm, rule = %rule, "port forwarding rule rejected");
            }
        }
        if !self.backend.add_storage_controller(vm, IDE_CONTROLLER, "ide", Some("PIIX4")).await {
            warn!(vm, "adding the IDE controller failed");
        }
        let disk = self.vm.disk_path.clone();
        if !self.backend.attach_medium(vm, IDE_CONTROLLER, MediumKind::HardDisk, &disk).await {
            error!(vm, disk = %disk.display(), "disk attach failed");
            self.remove().await;
            return Err(SupervisorError::AttachDiskFailed { name: vm.to_owned(), path: disk });
        }
        self.attach_provisioning().await;

        let name_file = &self.vm.name_file;
        tokio::fs::write(name_file, vm)
            .await
            .map_err(|source| SupervisorError::NameFile { path: name_file.clone(), source })?;
        info!(vm, "VM registered");
        Ok(())
    }

    async fn attach_provisioning(&self) {
        if self.provisioning.is_empty() {
            return;
        }
        let vm = self.vm.name.as_str();
        let image = self.config.provision_image_path();
        if let Err(e) = self.provisioning.write_image(&image).await {
            warn!(vm, error = %e, "provisioning image not written");
            return;
        }
        if !self.backend.add_storage_controller(vm, FLOPPY_CONTROLLER, "floppy", None).await
            || !self.backend.attach_medium(vm, FLOPPY_CONTROLLER, MediumKind::Floppy, &image).await
        {
            warn!(vm, image = %image.display(), "provisioning floppy not attached");
            return;
        }
        debug!(vm, image = %image.display(), "provisioning floppy attached");
    }

    /// Starts the VM and applies display settings and the CPU cap.
    ///
    /// With more than one CPU the VM log is checked for missing hardware
    /// virtualization; if found, the VM is powered off, reduced to one
    /// CPU and started again.
    ///
    /// # Errors
    /// Returns [`SupervisorError::StartFailed`] after the VM has been
    /// removed when every start attempt failed.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        let _section = CriticalSection::enter(&self.host);
        self.launch().await?;
        if self.vm.cpu_count > 1 && self.downgrade_if_unaccelerated().await {
            self.launch().await?;
        }

        let vm = self.vm.name.as_str();
        if !self.backend.control(vm, ControlAction::RemoteDisplay(self.options.remote_display)).await {
            warn!(vm, enabled = self.options.remote_display, "remote display setting rejected");
        }
        if !self.options.headless {
            let (key, value) = RESTRICTED_CLOSE_ACTIONS;
            if !self.backend.set_extra_data(vm, key, value).await {
                warn!(vm, "restricting GUI close actions failed");
            }
        }
        self.throttle().await;
        Ok(())
    }

    async fn launch(&mut self) -> Result<(), SupervisorError> {
        let policy = self.config.thresholds.start_policy();
        let backend = &self.backend;
        let vm = self.vm.name.as_str();
        let errors = AtomicU32::new(self.vm.start_error_count);
        let failures = &errors;
        let headless = self.options.headless;
        info!(vm, headless, "starting VM");
        let outcome = retry_with_backoff(
            policy,
            "startvm",
            move || async move {
                let started = backend.start_vm(vm, headless).await;
                if started {
                    failures.store(0, Ordering::Relaxed);
                } else {
                    let consecutive_failures = failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(vm, consecutive_failures, "startvm failed");
                }
                started
            },
            |started| *started,
        )
        .await;
        self.vm.start_error_count = errors.into_inner();

        match outcome {
            RetryOutcome::Confirmed { attempts, .. } => {
                info!(vm, attempts, "VM started");
                self.vm.mark_resumed(Instant::now());
                Ok(())
            }
            RetryOutcome::Exhausted { attempts, .. } => {
                let name = vm.to_owned();
                error!(vm = %name, attempts, "VM failed to start, removing it");
                self.remove().await;
                Err(SupervisorError::StartFailed { name, attempts })
            }
        }
    }

    /// Returns true when the VM was reduced to one CPU and must be started again.
    async fn downgrade_if_unaccelerated(&mut self) -> bool {
        let vm = self.vm.name.as_str();
        let log_file = match self.backend.show_vm_info(vm).await.map(|info| info.log_file()) {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!(vm, "VM log location unknown, skipping virtualization check");
                return false;
            }
            Err(e) => {
                debug!(vm, error = %e, "cannot locate VM log, skipping virtualization check");
                return false;
            }
        };
        let log = match tokio::fs::read(&log_file).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!(vm, log = %log_file.display(), error = %e, "cannot read VM log");
                return false;
            }
        };
        let Some(marker) = find_hwvirt_marker(&log) else {
            return false;
        };

        warn!(vm, marker, "hardware virtualization unavailable, falling back to one CPU");
        if !self.backend.control(vm, ControlAction::PowerOff).await {
            warn!(vm, "poweroff request failed");
        }
        let backend = &self.backend;
        let stopped = retry_with_backoff(
            self.config.thresholds.transition_policy(),
            "poweroff",
            move || async move { backend.vm_state(vm).await },
            |state| matches!(state, Ok(VmState::PoweredOff)),
        )
        .await;
        if !stopped.is_confirmed() {
            warn!(vm, "VM not confirmed powered off, reconfiguring anyway");
        }
        if !self.backend.set_cpus(vm, 1).await {
            warn!(vm, "reducing CPU count failed");
        }
        self.vm.cpu_count = 1;
        true
    }

    /// Applies the `max_vm_cpu_pct` preference as a CPU execution cap.
    /// Failures are logged, never fatal.
    pub async fn throttle(&self) {
        let vm = self.vm.name.as_str();
        let init = match self.host.read_init_data() {
            Ok(init) => init,
            Err(e) => {
                warn!(vm, error = %e, "cannot read init data, CPU cap unchanged");
                return;
            }
        };
        let Some(pct) = init.max_vm_cpu_pct() else {
            debug!(vm, "no CPU cap preference");
            return;
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cap = pct.clamp(1.0, 100.0) as u8;
        info!(vm, cap, "applying CPU execution cap");
        if !self.backend.control(vm, ControlAction::CpuExecutionCap(cap)).await {
            error!(vm, cap, "failed to set CPU execution cap");
        }
    }

    /// Pauses the VM and confirms it reached `paused`.
    ///
    /// # Errors
    /// Returns [`SupervisorError::TransitionTimeout`] if the pause is never confirmed.
    pub async fn pause(&mut self) -> Result<(), SupervisorError> {
        let _section = CriticalSection::enter(&self.host);
        match self.transition(ControlAction::Pause, VmState::Paused).await {
            RetryOutcome::Confirmed { attempts, .. } => {
                self.vm.observe_paused(Instant::now());
                info!(vm = %self.vm.name, attempts, "VM paused");
                Ok(())
            }
            RetryOutcome::Exhausted { attempts, last } => Err(self.transition_failed(VmState::Paused, attempts, &last)),
        }
    }

    /// Resumes the VM and confirms it reached `running`.
    ///
    /// # Errors
    /// Returns [`SupervisorError::DriftedToSaved`] if the VM turned up saved,
    /// [`SupervisorError::TransitionTimeout`] otherwise.
    pub async fn resume(&mut self) -> Result<(), SupervisorError> {
        let _section = CriticalSection::enter(&self.host);
        match self.transition(ControlAction::Resume, VmState::Running).await {
            RetryOutcome::Confirmed { attempts, .. } => {
                self.vm.mark_resumed(Instant::now());
                info!(vm = %self.vm.name, attempts, "VM resumed");
                Ok(())
            }
            RetryOutcome::Exhausted { last: Ok(VmState::Saved), attempts } => {
                error!(vm = %self.vm.name, attempts, "VM drifted into the saved state");
                Err(SupervisorError::DriftedToSaved {
                    name: self.vm.name.to_string(),
                    retry_after: self.config.thresholds.saved_drift_exit_delay(),
                })
            }
            RetryOutcome::Exhausted { attempts, last } => Err(self.transition_failed(VmState::Running, attempts, &last)),
        }
    }

    /// Saves the VM state to disk and confirms it reached `saved`.
    ///
    /// # Errors
    /// Returns [`SupervisorError::TransitionTimeout`] if the save is never confirmed.
    pub async fn savestate(&mut self) -> Result<(), SupervisorError> {
        let _section = CriticalSection::enter(&self.host);
        match self.transition(ControlAction::SaveState, VmState::Saved).await {
            RetryOutcome::Confirmed { attempts, .. } => {
                info!(vm = %self.vm.name, attempts, "VM state saved");
                Ok(())
            }
            RetryOutcome::Exhausted { attempts, last } => Err(self.transition_failed(VmState::Saved, attempts, &last)),
        }
    }

    /// Issues `action` and queries the state until it reads `target`.
    async fn transition(
        &self,
        action: ControlAction,
        target: VmState,
    ) -> RetryOutcome<Result<VmState, BackendError>> {
        let backend = &self.backend;
        let vm = self.vm.name.as_str();
        retry_with_backoff(
            self.config.thresholds.transition_policy(),
            action.verb(),
            move || async move {
                if !backend.control(vm, action).await {
                    debug!(vm, action = action.verb(), "control command reported failure");
                }
                backend.vm_state(vm).await
            },
            move |observed| matches!(observed, Ok(state) if *state == target),
        )
        .await
    }

    fn transition_failed(
        &self,
        target: VmState,
        attempts: u32,
        last: &Result<VmState, BackendError>,
    ) -> SupervisorError {
        match last {
            Ok(state) => error!(vm = %self.vm.name, target_state = %target, observed = %state, attempts, "state transition not confirmed"),
            Err(e) => error!(vm = %self.vm.name, target_state = %target, error = %e, attempts, "state transition not confirmed"),
        }
        SupervisorError::TransitionTimeout {
            name: self.vm.name.to_string(),
            target,
            attempts,
            retry_after: self.config.thresholds.temporary_exit_delay(),
        }
    }

    /// Tears the VM down as far as possible. Idempotent; every step only
    /// logs on failure, so removing a VM that never existed is harmless.
    ///
    /// Powers off and discards state, unregisters and deletes the VM,
    /// scrubs stale registry entries, deletes the VM folder and the
    /// persisted name.
    pub async fn remove(&mut self) {
        let _section = CriticalSection::enter(&self.host);
        let vm = self.vm.name.as_str();
        info!(vm, "removing VM");

        if self.backend.control(vm, ControlAction::PowerOff).await {
            debug!(vm, "VM powered off");
        }
        if self.backend.discard_state(vm).await {
            info!(vm, "saved state discarded");
        } else {
            debug!(vm, "no saved state to discard");
        }
        tokio::time::sleep(self.config.thresholds.remove_settle_delay()).await;

        if self.backend.unregister(vm, true).await {
            info!(vm, "VM unregistered and deleted");
        } else {
            warn!(vm, "unregistering the VM failed");
        }
        if !self.backend.remove_storage_controller(vm, IDE_CONTROLLER).await {
            debug!(vm, "no IDE controller to remove");
        }

        let folder = match rewrite_registry(&self.paths, vm).await {
            Ok(folder) => folder,
            Err(e) => {
                warn!(vm, error = %e, "cannot scrub the VirtualBox registry");
                None
            }
        };
        if self.backend.unregister(vm, false).await {
            debug!(vm, "late unregister succeeded");
        }

        // Only a folder named after the VM, or a direct child of the
        // machines directory, is ever deleted.
        let folder = folder
            .filter(|f| is_named_vm_folder(f, vm))
            .or_else(|| self.paths.owned_vm_dir(vm));
        match folder {
            Some(folder) => match tokio::fs::remove_dir_all(&folder).await {
                Ok(()) => info!(vm, folder = %folder.display(), "VM folder deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(vm, folder = %folder.display(), error = %e, "cannot delete VM folder"),
            },
            None => warn!(vm, "no VM folder safe to delete"),
        }
        for file in [self.vm.name_file.clone(), self.config.provision_image_path()] {
            match tokio::fs::remove_file(&file).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    warn!(vm, file = %file.display(), error = %e, "cannot delete file");
                }
                _ => {}
            }
        }
    }
}
