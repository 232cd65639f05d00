//! Typed wrapper over the `VBoxManage` subcommands the supervisor uses.
//!
//! Each method builds an argument vector and hands it to a
//! [`CommandRunner`]; nothing here interprets VM semantics beyond
//! success and the status dump.

use std::path::Path;

use warden_core::{MachineInfo, VmState};

use crate::runner::{CommandOutput, CommandRunner};
use crate::BackendError;

/// Storage controller holding the system disk.
pub const IDE_CONTROLLER: &str = "IDE Controller";

/// Storage controller holding the provisioning floppy.
pub const FLOPPY_CONTROLLER: &str = "Floppy Controller";

/// Log lines showing that hardware virtualization is missing or disabled.
pub const HWVIRT_UNAVAILABLE_MARKERS: &[&str] = &[
    "VERR_VMX_MSR_VMXON_DISABLED",
    "VERR_VMX_MSR_ALL_VMXON_DISABLED",
    "VERR_VMX_NO_VMX",
    "VERR_SVM_DISABLED",
    "VERR_SVM_NO_SVM",
    "VERR_VMX_NOT_IN_VMX_ROOT_MODE",
    "HM: HMR3Init: Falling back to raw-mode",
];

/// First hardware-virtualization failure marker found in a VM log.
#[must_use]
pub fn find_hwvirt_marker(log: &str) -> Option<&'static str> {
    HWVIRT_UNAVAILABLE_MARKERS.iter().copied().find(|marker| log.contains(marker))
}

/// Actions issued through `controlvm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ControlAction {
    Pause,
    Resume,
    SaveState,
    PowerOff,
    /// Caps guest CPU use at the given percentage.
    CpuExecutionCap(u8),
    /// Toggles the remote display server.
    RemoteDisplay(bool),
}

impl ControlAction {
    /// Name used in log lines.
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::SaveState => "savestate",
            Self::PowerOff => "poweroff",
            Self::CpuExecutionCap(_) => "cpuexecutioncap",
            Self::RemoteDisplay(_) => "vrde",
        }
    }

    fn args(self) -> Vec<String> {
        let mut args = vec![self.verb().to_owned()];
        match self {
            Self::CpuExecutionCap(pct) => args.push(pct.to_string()),
            Self::RemoteDisplay(on) => args.push(if on { "on" } else { "off" }.to_owned()),
            _ => {}
        }
        args
    }
}

/// Kind of medium attached to a storage controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumKind {
    HardDisk,
    Floppy,
}

impl MediumKind {
    fn token(self) -> &'static str {
        match self {
            Self::HardDisk => "hdd",
            Self::Floppy => "fdd",
        }
    }
}

/// `VBoxManage` front end over an arbitrary [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct VBoxManage<R> {
    runner: R,
}

impl<R: CommandRunner> VBoxManage<R> {
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// The underlying runner.
    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    async fn exec(&self, args: Vec<String>) -> bool {
        self.runner.run(&args, false).await.success
    }

    async fn capture(&self, args: Vec<String>) -> Result<String, BackendError> {
        let CommandOutput { success, output } = self.runner.run(&args, true).await;
        let output = output.unwrap_or_default();
        if success {
            Ok(output)
        } else {
            Err(BackendError::CommandFailed {
                subcommand: args.first().cloned().unwrap_or_default(),
                output: output.trim_end().to_owned(),
            })
        }
    }

    /// `--version`.
    ///
    /// # Errors
    /// Returns [`BackendError::CommandFailed`] if the program cannot report its version.
    pub async fn version(&self) -> Result<String, BackendError> {
        self.capture(owned(&["--version"])).await.map(|v| v.trim().to_owned())
    }

    /// `list vms`, raw output.
    ///
    /// # Errors
    /// Returns [`BackendError::CommandFailed`] if the listing fails.
    pub async fn list_vms(&self) -> Result<String, BackendError> {
        self.capture(owned(&["list", "vms"])).await
    }

    /// Registers an empty VM.
    pub async fn create_vm(&self, name: &str, os_type: &str) -> bool {
        self.exec(owned(&["createvm", "--name", name, "--ostype", os_type, "--register"])).await
    }

    /// Applies the fixed hardware profile: CPUs, memory, ACPI, disk-only
    /// boot order and a NAT adapter with DNS proxying.
    pub async fn configure_hardware(&self, name: &str, cpus: u8, memory_mb: u32) -> bool {
        let cpus = cpus.to_string();
        let memory = memory_mb.to_string();
        self.exec(owned(&[
            "modifyvm", name,
            "--cpus", &cpus,
            "--memory", &memory,
            "--acpi", "on",
            "--ioapic", "on",
            "--boot1", "disk",
            "--boot2", "none",
            "--boot3", "none",
            "--boot4", "none",
            "--nic1", "nat",
            "--natdnsproxy1", "on",
        ]))
        .await
    }

    pub async fn set_cpus(&self, name: &str, cpus: u8) -> bool {
        self.exec(owned(&["modifyvm", name, "--cpus", &cpus.to_string()])).await
    }

    pub async fn add_nat_port_forward(&self, name: &str, rule: &str) -> bool {
        self.exec(owned(&["modifyvm", name, "--natpf1", rule])).await
    }

    /// Adds a storage controller on `bus` (`ide`, `floppy`, ...).
    pub async fn add_storage_controller(
        &self,
        name: &str,
        controller: &str,
        bus: &str,
        chipset: Option<&str>,
    ) -> bool {
        let mut args = owned(&["storagectl", name, "--name", controller, "--add", bus]);
        if let Some(chipset) = chipset {
            args.extend(owned(&["--controller", chipset]));
        }
        self.exec(args).await
    }

    /// Attaches `medium` at port 0, device 0 of `controller`.
    pub async fn attach_medium(
        &self,
        name: &str,
        controller: &str,
        kind: MediumKind,
        medium: &Path,
    ) -> bool {
        let medium = medium.to_string_lossy();
        self.exec(owned(&[
            "storageattach", name,
            "--storagectl", controller,
            "--port", "0",
            "--device", "0",
            "--type", kind.token(),
            "--medium", &medium,
        ]))
        .await
    }

    pub async fn start_vm(&self, name: &str, headless: bool) -> bool {
        let mut args = owned(&["startvm", name]);
        if headless {
            args.extend(owned(&["--type", "headless"]));
        }
        self.exec(args).await
    }

    pub async fn control(&self, name: &str, action: ControlAction) -> bool {
        let mut args = owned(&["controlvm", name]);
        args.extend(action.args());
        self.exec(args).await
    }

    pub async fn set_extra_data(&self, name: &str, key: &str, value: &str) -> bool {
        self.exec(owned(&["setextradata", name, key, value])).await
    }

    /// `showvminfo --machinereadable`, parsed.
    ///
    /// # Errors
    /// Returns [`BackendError::CommandFailed`] if the query fails.
    pub async fn show_vm_info(&self, name: &str) -> Result<MachineInfo, BackendError> {
        let raw = self.capture(owned(&["showvminfo", name, "--machinereadable"])).await?;
        Ok(MachineInfo::parse(&raw))
    }

    /// Current run state.
    ///
    /// # Errors
    /// Returns [`BackendError::CommandFailed`] if the query fails.
    pub async fn vm_state(&self, name: &str) -> Result<VmState, BackendError> {
        Ok(self.show_vm_info(name).await?.state())
    }

    pub async fn discard_state(&self, name: &str) -> bool {
        self.exec(owned(&["discardstate", name])).await
    }

    /// Unregisters the VM, deleting its files when `delete` is set.
    pub async fn unregister(&self, name: &str, delete: bool) -> bool {
        let mut args = owned(&["unregistervm", name]);
        if delete {
            args.push("--delete".to_owned());
        }
        self.exec(args).await
    }

    pub async fn remove_storage_controller(&self, name: &str, controller: &str) -> bool {
        self.exec(owned(&["storagectl", name, "--name", controller, "--remove"])).await
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_owned()).collect()
}

/// Whether `list vms` output names the VM. Lines look like `"name" {uuid}`.
#[must_use]
pub fn listing_contains(listing: &str, name: &str) -> bool {
    let quoted = format!("\"{name}\"");
    listing.lines().any(|line| line.trim_start().starts_with(&quoted))
}
