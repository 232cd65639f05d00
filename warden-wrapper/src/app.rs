//! Wires the command line, the local host and the supervisor together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::info;
use warden_core::HostClient;
use warden_executor::{
    resolve_vm_name, Exit, LaunchOptions, PlatformPaths, ProvisioningData, SupervisorConfig,
    VBoxManageRunner, VmHandle, VmSupervisor,
};

use crate::cli::Cli;
use crate::local_host::{spawn_signal_listener, LocalHost};

/// Reads a JSON config file; absent fields keep their defaults.
///
/// # Errors
/// Returns an error if the file cannot be read or is not valid JSON.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SupervisorConfig> {
    let Some(path) = path else {
        return Ok(SupervisorConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

/// Slot directory: `--slot`, else the configured work directory.
#[must_use]
pub fn slot_dir(cli: &Cli, config: &SupervisorConfig) -> PathBuf {
    cli.slot.clone().unwrap_or_else(|| config.work_dir.clone())
}

/// Runs one task to its end and returns how the process should exit.
///
/// # Errors
/// Returns an error for setup failures before the supervisor starts:
/// unreadable config or init data, no home directory, an invalid VM
/// name or a missing disk image.
pub async fn run(cli: Cli) -> anyhow::Result<Exit> {
    let mut config = load_config(cli.config.as_deref())?;
    config.work_dir = slot_dir(&cli, &config);

    let local = Arc::new(LocalHost::new(config.work_dir.clone(), &cli.init_data));
    spawn_signal_listener(Arc::clone(&local)).context("installing signal handlers")?;
    let host: Arc<dyn HostClient> = local;

    let init = host.read_init_data().context("reading init data")?;
    let headless = cli.headless || init.headless_preference().unwrap_or(false);
    let cpus = init.vm_cpu_count();

    let paths = PlatformPaths::resolve()
        .ok_or_else(|| anyhow!("cannot determine the home directory"))?;
    let name = resolve_vm_name(&config, cli.vmname.as_deref()).await?;
    let disk = host
        .resolve_filename(&config.disk_image)
        .context("locating the disk image")?;

    info!(
        vm = %name,
        disk = %disk.display(),
        cpus,
        headless,
        vrde = cli.vrde,
        "starting vm-warden"
    );

    let vm = VmHandle::new(name, disk, config.name_file_path(), cpus);
    let provisioning = if config.provision_identity {
        ProvisioningData::from_init_data(&init)
    } else {
        ProvisioningData::new()
    };
    let runner = VBoxManageRunner::new(config.vboxmanage.clone(), config.output_capacity);

    let mut supervisor = VmSupervisor::new(
        runner,
        host,
        config,
        paths,
        vm,
        LaunchOptions::new(headless, cli.vrde),
    )
    .with_provisioning(provisioning);

    supervisor.log_backend_version().await;
    Ok(supervisor.run().await)
}
