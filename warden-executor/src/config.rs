//! Supervisor configuration and retry thresholds.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Tunables for one supervised VM.
///
/// Every field has a default, so a JSON file only needs the keys it
/// overrides. Relative file names resolve against `work_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SupervisorConfig {
    /// The `VBoxManage` executable.
    pub vboxmanage: PathBuf,
    /// Bytes of command output kept when capturing.
    pub output_capacity: usize,
    /// Guest memory in MiB.
    pub memory_mb: u32,
    /// Guest OS type passed to `createvm`.
    pub os_type: String,
    /// Logical name of the disk image.
    pub disk_image: String,
    /// Slot directory holding the files below.
    pub work_dir: PathBuf,
    pub name_file: PathBuf,
    pub progress_file: PathBuf,
    pub output_file: PathBuf,
    /// File name of the provisioning floppy image.
    pub provision_image: PathBuf,
    pub default_vm_name: String,
    /// Use a `boinc_vm_<timestamp>` name instead of `default_vm_name`.
    pub unique_name: bool,
    /// Running time that counts as a finished job.
    pub job_duration_secs: u64,
    pub poll_period_ms: u64,
    /// NAT port-forwarding rule, e.g. `graphicsvm,tcp,127.0.0.1,7859,,80`.
    pub port_forward: Option<String>,
    /// Put the volunteer's identity on the provisioning medium.
    pub provision_identity: bool,
    pub thresholds: Thresholds,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            vboxmanage: PathBuf::from("VBoxManage"),
            output_capacity: 8192,
            memory_mb: 256,
            os_type: "Linux26".to_owned(),
            disk_image: "cernvm.vmdk".to_owned(),
            work_dir: PathBuf::from("."),
            name_file: PathBuf::from("VMName"),
            progress_file: PathBuf::from("ProgressFile"),
            output_file: PathBuf::from("output"),
            provision_image: PathBuf::from("context.img"),
            default_vm_name: "BOINC_VM".to_owned(),
            unique_name: false,
            job_duration_secs: 86_400,
            poll_period_ms: 1000,
            port_forward: None,
            provision_identity: false,
            thresholds: Thresholds::default(),
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    #[must_use]
    pub fn job_duration(&self) -> Duration {
        Duration::from_secs(self.job_duration_secs)
    }

    #[must_use]
    pub fn name_file_path(&self) -> PathBuf {
        self.work_dir.join(&self.name_file)
    }

    #[must_use]
    pub fn progress_file_path(&self) -> PathBuf {
        self.work_dir.join(&self.progress_file)
    }

    #[must_use]
    pub fn output_file_path(&self) -> PathBuf {
        self.work_dir.join(&self.output_file)
    }

    #[must_use]
    pub fn provision_image_path(&self) -> PathBuf {
        self.work_dir.join(&self.provision_image)
    }
}

/// Attempt counts and delays for every retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Thresholds {
    /// Tries for pause, resume and save before giving up.
    pub transition_attempts: u32,
    pub transition_delay_ms: u64,
    /// Tries for `startvm` before the start is fatal.
    pub start_attempts: u32,
    pub start_delay_ms: u64,
    /// Consecutive failed status queries tolerated; one more is fatal.
    pub poll_error_limit: u32,
    pub poll_error_delay_ms: u64,
    /// Consecutive powered-off observations tolerated; one more is fatal.
    pub poweroff_error_limit: u32,
    pub poweroff_delay_ms: u64,
    /// Pause between discarding state and unregistering.
    pub remove_settle_delay_ms: u64,
    /// Restart delay requested after an unconfirmed transition.
    pub temporary_exit_delay_secs: u64,
    /// Restart delay requested when a resume finds the VM saved.
    pub saved_drift_exit_delay_secs: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            transition_attempts: 10,
            transition_delay_ms: 1000,
            start_attempts: 5,
            start_delay_ms: 2000,
            poll_error_limit: 4,
            poll_error_delay_ms: 5000,
            poweroff_error_limit: 4,
            poweroff_delay_ms: 2000,
            remove_settle_delay_ms: 2000,
            temporary_exit_delay_secs: 60,
            saved_drift_exit_delay_secs: 300,
        }
    }
}

impl Thresholds {
    #[must_use]
    pub fn transition_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transition_attempts, Duration::from_millis(self.transition_delay_ms))
    }

    #[must_use]
    pub fn start_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.start_attempts, Duration::from_millis(self.start_delay_ms))
    }

    #[must_use]
    pub fn poll_error_delay(&self) -> Duration {
        Duration::from_millis(self.poll_error_delay_ms)
    }

    #[must_use]
    pub fn poweroff_delay(&self) -> Duration {
        Duration::from_millis(self.poweroff_delay_ms)
    }

    #[must_use]
    pub fn remove_settle_delay(&self) -> Duration {
        Duration::from_millis(self.remove_settle_delay_ms)
    }

    #[must_use]
    pub fn temporary_exit_delay(&self) -> Duration {
        Duration::from_secs(self.temporary_exit_delay_secs)
    }

    #[must_use]
    pub fn saved_drift_exit_delay(&self) -> Duration {
        Duration::from_secs(self.saved_drift_exit_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wrapper_conventions() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.default_vm_name, "BOINC_VM");
        assert_eq!(cfg.memory_mb, 256);
        assert_eq!(cfg.poll_period(), Duration::from_secs(1));
        assert_eq!(cfg.job_duration(), Duration::from_secs(86_400));
        assert_eq!(cfg.name_file_path(), PathBuf::from("./VMName"));
        assert_eq!(cfg.thresholds.start_policy().max_attempts, 5);
        assert_eq!(cfg.thresholds.transition_policy().delay, Duration::from_secs(1));
    }

    #[test]
    fn partial_json_overrides_only_given_keys() {
        let json = r#"{ "memory_mb": 512, "thresholds": { "start_attempts": 2 } }"#;
        let cfg: SupervisorConfig = match serde_json::from_str(json) {
            Ok(c) => c,
            Err(e) => panic!("config must deserialize: {e}"),
        };
        assert_eq!(cfg.memory_mb, 512);
        assert_eq!(cfg.thresholds.start_attempts, 2);
        assert_eq!(cfg.thresholds.transition_attempts, 10, "unset keys must keep defaults");
        assert_eq!(cfg.os_type, "Linux26");
    }
}
