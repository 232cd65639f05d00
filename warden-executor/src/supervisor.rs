//! The supervisor: owns the VM handle and drives it from registration
//! to completion.
//!
//! Operations live in separate `impl` blocks: [`crate::lifecycle`]
//! (create, start, pause, resume, save, remove), [`crate::poller`] and
//! [`crate::dispatch`]. This module holds the state and the main loop.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use warden_core::HostClient;

use crate::progress::{fraction_done, ProgressFile};
use crate::provision::ProvisioningData;
use crate::runner::CommandRunner;
use crate::vbox::{listing_contains, VBoxManage};
use crate::{Exit, PlatformPaths, SupervisorConfig, SupervisorError, VmHandle};

/// Frontend choices made at launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct LaunchOptions {
    /// Start without a GUI window.
    pub headless: bool,
    /// Enable the remote display server.
    pub remote_display: bool,
}

impl LaunchOptions {
    #[must_use]
    pub fn new(headless: bool, remote_display: bool) -> Self {
        Self { headless, remote_display }
    }
}

/// Supervises one VirtualBox VM on behalf of the host.
///
/// Generic over the [`CommandRunner`] so the lifecycle logic can be
/// driven against a scripted backend.
pub struct VmSupervisor<R: CommandRunner> {
    pub(crate) backend: VBoxManage<R>,
    pub(crate) host: Arc<dyn HostClient>,
    pub(crate) config: SupervisorConfig,
    pub(crate) paths: PlatformPaths,
    pub(crate) vm: VmHandle,
    pub(crate) options: LaunchOptions,
    pub(crate) provisioning: ProvisioningData,
    progress: ProgressFile,
}

impl<R: CommandRunner> VmSupervisor<R> {
    /// Create a supervisor for `vm`.
    ///
    /// # Arguments
    /// - `runner`: executes `VBoxManage` commands
    /// - `host`: the hosting client
    /// - `config`: tunables and slot file names
    /// - `paths`: VirtualBox registry and VM folder layout
    /// - `vm`: name, disk and CPU count of the VM
    /// - `options`: frontend choices
    #[must_use]
    pub fn new(
        runner: R,
        host: Arc<dyn HostClient>,
        config: SupervisorConfig,
        paths: PlatformPaths,
        vm: VmHandle,
        options: LaunchOptions,
    ) -> Self {
        let progress = ProgressFile::new(config.progress_file_path());
        Self {
            backend: VBoxManage::new(runner),
            host,
            config,
            paths,
            vm,
            options,
            provisioning: ProvisioningData::new(),
            progress,
        }
    }

    /// Data written to the provisioning floppy at creation.
    #[must_use]
    pub fn with_provisioning(mut self, provisioning: ProvisioningData) -> Self {
        self.provisioning = provisioning;
        self
    }

    #[must_use]
    pub fn vm(&self) -> &VmHandle {
        &self.vm
    }

    /// Mutable access to the handle, for restoring bookkeeping.
    pub fn vm_mut(&mut self) -> &mut VmHandle {
        &mut self.vm
    }

    #[must_use]
    pub fn backend(&self) -> &VBoxManage<R> {
        &self.backend
    }

    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Logs the backend version, or warns if it cannot be determined.
    pub async fn log_backend_version(&self) {
        match self.backend.version().await {
            Ok(version) => info!(version = %version, "VirtualBox detected"),
            Err(e) => warn!(error = %e, "cannot determine VirtualBox version"),
        }
    }

    /// Brings the VM into a registered state.
    ///
    /// With a persisted name the VM is reused if the backend still lists
    /// it and recreated otherwise. Without one, leftovers of an earlier
    /// attempt are removed, stale progress is discarded and the VM is
    /// created from scratch.
    ///
    /// # Errors
    /// Returns [`SupervisorError::NameFile`] if the name file's presence
    /// cannot be determined, [`SupervisorError::ListFailed`] if the
    /// registered VMs cannot be listed, or any error from [`Self::create`].
    pub async fn prepare(&mut self) -> Result<(), SupervisorError> {
        let name_file = &self.vm.name_file;
        let name_file_present = tokio::fs::try_exists(name_file)
            .await
            .map_err(|source| SupervisorError::NameFile { path: name_file.clone(), source })?;
        if name_file_present {
            let listing = self.backend.list_vms().await.map_err(SupervisorError::ListFailed)?;
            if listing_contains(&listing, self.vm.name.as_str()) {
                info!(vm = %self.vm.name, "reusing registered VM");
                return Ok(());
            }
            warn!(vm = %self.vm.name, "VM name file exists but the VM is not registered, recreating");
            self.remove().await;
        } else {
            info!(vm = %self.vm.name, "no VM name file, starting from a clean slate");
            self.remove().await;
            self.progress.clear().await?;
        }
        self.create().await
    }

    /// Runs the VM to completion and reports the outcome to the host exactly once.
    pub async fn run(&mut self) -> Exit {
        let exit = match self.drive().await {
            Ok(exit) => exit,
            Err(e) => {
                error!(vm = %self.vm.name, error = %e, "supervision stopped");
                e.exit()
            }
        };
        self.conclude(&exit);
        exit
    }

    async fn drive(&mut self) -> Result<Exit, SupervisorError> {
        self.prepare().await?;
        self.start().await?;
        loop {
            if let Some(exit) = self.step().await? {
                return Ok(exit);
            }
            tokio::time::sleep(self.config.poll_period()).await;
        }
    }

    /// One iteration of the main loop: act on host flags, observe the VM,
    /// account progress.
    ///
    /// # Errors
    /// Returns any fatal or temporary-exit error raised on the way.
    pub async fn step(&mut self) -> Result<Option<Exit>, SupervisorError> {
        let status = self.host.status();
        if let Some(exit) = self.dispatch(status).await? {
            return Ok(Some(exit));
        }
        if status.suspended {
            return Ok(None);
        }
        self.poll().await?;
        if self.vm.suspended {
            warn!(vm = %self.vm.name, "VM is paused while the host is running, resuming");
            self.resume().await?;
        }
        self.account_progress().await
    }

    /// Moves the running time observed since the last call into the
    /// progress file and reports the new fraction.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Progress`] if the progress file is unusable.
    pub async fn account_progress(&mut self) -> Result<Option<Exit>, SupervisorError> {
        let ran = self.vm.drain_period();
        let total = self.progress.add(ran).await?;
        let fraction = fraction_done(total, self.config.job_duration());
        debug!(vm = %self.vm.name, running_secs = total, fraction, "progress");
        self.host.report_progress(fraction);
        self.host.checkpoint();
        if fraction >= 1.0 {
            return self.complete().await.map(Some);
        }
        Ok(None)
    }

    async fn complete(&mut self) -> Result<Exit, SupervisorError> {
        info!(vm = %self.vm.name, "job complete, tearing down VM");
        if let Err(e) = self.savestate().await {
            warn!(vm = %self.vm.name, error = %e, "could not save VM state before removal");
        }
        self.remove().await;
        self.progress.reset().await?;
        let output = self.config.output_file_path();
        if let Err(e) = tokio::fs::write(&output, "Work Unit completed!\n").await {
            warn!(path = %output.display(), error = %e, "cannot write output file");
        }
        Ok(Exit::Finished { code: 0 })
    }

    fn conclude(&self, exit: &Exit) {
        match exit {
            Exit::Finished { code } => {
                info!(vm = %self.vm.name, code, "finishing");
                self.host.finish(*code);
            }
            Exit::Temporary { delay, reason } => {
                info!(vm = %self.vm.name, delay_secs = delay.as_secs(), reason = %reason, "exiting temporarily");
                self.host.temporary_exit(*delay, reason);
            }
        }
    }
}
