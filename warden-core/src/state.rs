//! VM run states and the parser for machine-readable status dumps.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Observed run state of the backend VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum VmState {
    Running,
    Paused,
    #[serde(rename = "poweroff")]
    PoweredOff,
    Saved,
    /// Any token the supervisor does not act on (aborted, starting, stuck, ...).
    Unknown,
}

impl VmState {
    /// Maps a `VMState` token from the status dump to a state.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "poweroff" => Self::PoweredOff,
            "saved" => Self::Saved,
            _ => Self::Unknown,
        }
    }

    /// The token the backend uses for this state.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::PoweredOff => "poweroff",
            Self::Saved => "saved",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Key/value view over `showvminfo --machinereadable` output.
///
/// Lines look like `key="value"` or `key=value`. Lines without `=` and
/// values whose opening quote is never closed (truncated capture) are
/// skipped, so a cut-off dump never yields a half-read state token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineInfo {
    entries: BTreeMap<String, String>,
}

impl MachineInfo {
    /// Parses a machine-readable status dump. Never fails.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in output.lines() {
            let Some((raw_key, raw_value)) = line.split_once('=') else {
                continue;
            };
            let (Some(key), Some(value)) = (unquote(raw_key), unquote(raw_value)) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            entries.entry(key.to_owned()).or_insert_with(|| value.to_owned());
        }
        Self { entries }
    }

    /// Looks up a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// The reported run state, `Unknown` when absent or unrecognized.
    #[must_use]
    pub fn state(&self) -> VmState {
        self.get("VMState").map_or(VmState::Unknown, VmState::from_token)
    }

    /// Location of the VM's main log file.
    ///
    /// Uses `LogFldr` when reported, otherwise the `Logs` folder next to
    /// the settings file named by `CfgFile`.
    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        if let Some(dir) = self.get("LogFldr").filter(|d| !d.is_empty()) {
            return Some(PathBuf::from(dir).join("VBox.log"));
        }
        let cfg = PathBuf::from(self.get("CfgFile")?);
        Some(cfg.parent()?.join("Logs").join("VBox.log"))
    }

    /// Number of parsed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing could be parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unquote(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    match trimmed.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"'),
        None => Some(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "name=\"BOINC_VM\"\n\
        groups=\"/\"\n\
        ostype=\"Linux 2.6 / 3.x / 4.x (32-bit)\"\n\
        CfgFile=\"/home/boinc/VirtualBox VMs/BOINC_VM/BOINC_VM.vbox\"\n\
        memory=256\n\
        VMState=\"running\"\n\
        VMStateChangeTime=\"2024-03-01T10:00:00.000000000\"\n\
        \"storagecontrollername0\"=\"IDE Controller\"\n";

    #[test]
    fn parse_reads_state_and_quoted_keys() {
        let info = MachineInfo::parse(DUMP);
        assert_eq!(info.state(), VmState::Running);
        assert_eq!(info.get("memory"), Some("256"));
        assert_eq!(info.get("storagecontrollername0"), Some("IDE Controller"));
        assert_eq!(info.get("name"), Some("BOINC_VM"));
    }

    #[test]
    fn parse_maps_every_known_token() {
        for (token, expected) in [
            ("running", VmState::Running),
            ("paused", VmState::Paused),
            ("poweroff", VmState::PoweredOff),
            ("saved", VmState::Saved),
            ("aborted", VmState::Unknown),
            ("", VmState::Unknown),
        ] {
            let info = MachineInfo::parse(&format!("VMState=\"{token}\"\n"));
            assert_eq!(info.state(), expected, "token {token:?}");
        }
    }

    #[test]
    fn parse_handles_crlf_line_endings() {
        let info = MachineInfo::parse("name=\"vm\"\r\nVMState=\"paused\"\r\n");
        assert_eq!(info.state(), VmState::Paused);
    }

    #[test]
    fn truncated_state_line_is_unknown() {
        let info = MachineInfo::parse("name=\"vm\"\nVMState=\"runn");
        assert_eq!(info.state(), VmState::Unknown, "truncated token must not be accepted");
        let info = MachineInfo::parse("name=\"vm\"\nVMState=\"running");
        assert_eq!(info.state(), VmState::Unknown, "missing closing quote must not be accepted");
    }

    #[test]
    fn missing_state_is_unknown() {
        assert_eq!(MachineInfo::parse("").state(), VmState::Unknown);
        assert_eq!(MachineInfo::parse("garbage without equals").state(), VmState::Unknown);
    }

    #[test]
    fn first_occurrence_wins() {
        let info = MachineInfo::parse("VMState=\"paused\"\nVMState=\"running\"\n");
        assert_eq!(info.state(), VmState::Paused);
    }

    #[test]
    fn log_file_prefers_log_folder() {
        let info = MachineInfo::parse("LogFldr=\"/vms/a/Logs\"\nCfgFile=\"/other/a.vbox\"\n");
        assert_eq!(info.log_file(), Some(PathBuf::from("/vms/a/Logs/VBox.log")));
    }

    #[test]
    fn log_file_falls_back_to_settings_directory() {
        let info = MachineInfo::parse(DUMP);
        assert_eq!(
            info.log_file(),
            Some(PathBuf::from("/home/boinc/VirtualBox VMs/BOINC_VM/Logs/VBox.log"))
        );
        assert_eq!(MachineInfo::parse("VMState=\"running\"").log_file(), None);
    }

    #[test]
    fn state_serializes_as_backend_token() {
        let json = match serde_json::to_string(&VmState::PoweredOff) {
            Ok(j) => j,
            Err(e) => panic!("serialization failed: {e}"),
        };
        assert_eq!(json, "\"poweroff\"");
        assert_eq!(VmState::Saved.to_string(), "saved");
    }

    proptest::proptest! {
        #[test]
        fn parse_never_panics(input in ".{0,512}") {
            let info = MachineInfo::parse(&input);
            let _ = info.state();
            let _ = info.log_file();
        }

        #[test]
        fn state_survives_surrounding_noise(
            before in proptest::collection::vec("[a-z]{1,8}=\"[a-z ]{0,12}\"", 0..8),
            after in proptest::collection::vec("[a-z]{1,8}=[0-9]{1,4}", 0..8),
            idx in 0usize..4,
        ) {
            let state = [VmState::Running, VmState::Paused, VmState::PoweredOff, VmState::Saved][idx];
            let mut lines = before.clone();
            lines.push(format!("VMState=\"{}\"", state.token()));
            lines.extend(after);
            let dump = lines.join("\n");
            proptest::prop_assert_eq!(MachineInfo::parse(&dump).state(), state);
        }
    }
}
