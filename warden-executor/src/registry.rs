//! Scrubbing stale VM entries out of the global `VirtualBox.xml` registry.
//!
//! `unregistervm` sometimes leaves `MachineEntry` and media lines behind
//! (locked session, crashed frontend). Removal strips every line that
//! references the VM's folder or settings file and records where that
//! folder lives so it can be deleted afterwards.

use std::path::PathBuf;

use crate::PlatformPaths;

/// Result of scrubbing registry text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryScrub {
    /// Registry text with the VM's lines removed.
    pub contents: String,
    pub removed_lines: usize,
    /// Folder of the VM, taken from its `src="...<name>.vbox"` entry.
    pub vm_folder: Option<PathBuf>,
}

/// Removes the VM's `MachineEntry` and every media line stored under its
/// folder.
///
/// The folder is the parent of the `src` path whose file is
/// `<name>.vbox`, used only when it is itself named after the VM.
/// Without such an entry nothing is removed; other VMs' lines never
/// match, whatever directories their paths pass through.
#[must_use]
pub fn scrub_registry(xml: &str, vm_name: &str) -> RegistryScrub {
    let settings_file = format!("{vm_name}.vbox");
    let settings_path = xml.lines().flat_map(path_attributes).find(|value| {
        value.rsplit(['/', '\\']).next() == Some(settings_file.as_str())
    });
    let Some(settings_path) = settings_path else {
        return RegistryScrub { contents: xml.to_owned(), removed_lines: 0, vm_folder: None };
    };
    let folder = settings_path
        .rfind(['/', '\\'])
        .map(|cut| &settings_path[..cut])
        .filter(|folder| folder.rsplit(['/', '\\']).next() == Some(vm_name));

    let mut contents = String::with_capacity(xml.len());
    let mut removed_lines = 0;
    for line in xml.lines() {
        let stale = path_attributes(line)
            .any(|value| value == settings_path || folder.is_some_and(|f| is_under(value, f)));
        if stale {
            removed_lines += 1;
        } else {
            contents.push_str(line);
            contents.push('\n');
        }
    }

    RegistryScrub { contents, removed_lines, vm_folder: folder.map(PathBuf::from) }
}

fn is_under(path: &str, folder: &str) -> bool {
    path.strip_prefix(folder)
        .is_some_and(|rest| rest.starts_with(['/', '\\']) && rest.len() > 1)
}

fn path_attributes(line: &str) -> impl Iterator<Item = &str> {
    ["src=\"", "location=\""].into_iter().filter_map(move |attr| {
        let start = line.find(attr)? + attr.len();
        let rest = &line[start..];
        rest.find('"').map(|end| &rest[..end])
    })
}

/// Rewrites the registry without the VM's entries.
///
/// Takes a backup the first time it changes anything, stages the new
/// text next to the registry and renames it into place. Returns the VM
/// folder if the registry named one. A missing registry is not an error.
///
/// # Errors
/// Returns I/O errors from reading, backing up or replacing the registry.
pub async fn rewrite_registry(paths: &PlatformPaths, vm_name: &str) -> std::io::Result<Option<PathBuf>> {
    let registry = paths.registry_file();
    let xml = match tokio::fs::read_to_string(&registry).await {
        Ok(xml) => xml,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(registry = %registry.display(), "no registry file to scrub");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let scrub = scrub_registry(&xml, vm_name);
    if scrub.removed_lines == 0 {
        tracing::debug!(vm = vm_name, "registry holds no stale entries");
        return Ok(None);
    }

    let backup = paths.registry_backup();
    if !tokio::fs::try_exists(&backup).await? {
        tokio::fs::copy(&registry, &backup).await?;
        tracing::info!(backup = %backup.display(), "registry backed up");
    }
    let staging = paths.registry_staging();
    tokio::fs::write(&staging, scrub.contents.as_bytes()).await?;
    tokio::fs::rename(&staging, &registry).await?;

    tracing::info!(vm = vm_name, removed = scrub.removed_lines, "stale registry entries removed");
    Ok(scrub.vm_folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"<?xml version="1.0"?>
<VirtualBox xmlns="http://www.virtualbox.org/" version="1.12-linux">
  <Global>
    <MachineRegistry>
      <MachineEntry uuid="{aaaa}" src="/home/vol/VirtualBox VMs/BOINC_VM/BOINC_VM.vbox"/>
      <MachineEntry uuid="{bbbb}" src="/home/vol/VirtualBox VMs/BOINC_VM2/BOINC_VM2.vbox"/>
    </MachineRegistry>
    <MediaRegistry>
      <HardDisks>
        <HardDisk uuid="{cccc}" location="/home/vol/VirtualBox VMs/BOINC_VM/Snapshots/{dddd}.vdi" format="VDI"/>
        <HardDisk uuid="{eeee}" location="/slots/3/cernvm.vmdk" format="VMDK"/>
      </HardDisks>
    </MediaRegistry>
  </Global>
</VirtualBox>
"#;

    #[test]
    fn scrub_removes_only_this_vms_lines() {
        let scrub = scrub_registry(REGISTRY, "BOINC_VM");
        assert_eq!(scrub.removed_lines, 2);
        assert!(!scrub.contents.contains("{aaaa}"));
        assert!(!scrub.contents.contains("{cccc}"));
        assert!(scrub.contents.contains("BOINC_VM2.vbox"), "similar names must survive");
        assert!(scrub.contents.contains("cernvm.vmdk"));
        assert_eq!(scrub.vm_folder, Some(PathBuf::from("/home/vol/VirtualBox VMs/BOINC_VM")));
    }

    #[test]
    fn scrub_understands_windows_paths() {
        let xml = r#"<MachineEntry uuid="{a}" src="C:\Users\vol\VirtualBox VMs\vm\vm.vbox"/>"#;
        let scrub = scrub_registry(xml, "vm");
        assert_eq!(scrub.removed_lines, 1);
        assert_eq!(scrub.vm_folder, Some(PathBuf::from(r"C:\Users\vol\VirtualBox VMs\vm")));
    }

    #[test]
    fn vm_named_like_an_ancestor_directory_leaves_other_vms_alone() {
        let xml = "<MachineEntry uuid=\"{a}\" src=\"/home/alice/VirtualBox VMs/Other/Other.vbox\"/>\n";
        let scrub = scrub_registry(xml, "alice");
        assert_eq!(scrub.removed_lines, 0);
        assert_eq!(scrub.contents, xml);

        let scrub = scrub_registry(REGISTRY, "vol");
        assert_eq!(scrub.removed_lines, 0, "a user name in every path must not match");
        let scrub = scrub_registry(REGISTRY, "VirtualBox VMs");
        assert_eq!(scrub.removed_lines, 0);
    }

    #[test]
    fn own_entry_is_removed_when_name_is_also_an_ancestor() {
        let xml = "\
<MachineEntry uuid=\"{own}\" src=\"/home/alice/VirtualBox VMs/alice/alice.vbox\"/>
<MachineEntry uuid=\"{other}\" src=\"/home/alice/VirtualBox VMs/Other/Other.vbox\"/>
<HardDisk uuid=\"{disk}\" location=\"/home/alice/VirtualBox VMs/alice/Snapshots/{s}.vdi\"/>
<HardDisk uuid=\"{otherdisk}\" location=\"/home/alice/VirtualBox VMs/Other/disk.vdi\"/>
";
        let scrub = scrub_registry(xml, "alice");
        assert_eq!(scrub.removed_lines, 2);
        assert!(!scrub.contents.contains("{own}"));
        assert!(!scrub.contents.contains("{disk}"));
        assert!(scrub.contents.contains("{other}"));
        assert!(scrub.contents.contains("{otherdisk}"));
        assert_eq!(scrub.vm_folder, Some(PathBuf::from("/home/alice/VirtualBox VMs/alice")));
    }

    #[test]
    fn settings_file_outside_a_named_folder_removes_only_its_entry() {
        let xml = "\
<MachineEntry uuid=\"{own}\" src=\"/home/vol/BOINC_VM.vbox\"/>
<HardDisk uuid=\"{disk}\" location=\"/home/vol/VirtualBox VMs/Other/disk.vdi\"/>
";
        let scrub = scrub_registry(xml, "BOINC_VM");
        assert_eq!(scrub.removed_lines, 1);
        assert!(scrub.contents.contains("{disk}"));
        assert_eq!(scrub.vm_folder, None);
    }

    #[test]
    fn scrub_without_matches_keeps_text() {
        let scrub = scrub_registry(REGISTRY, "other");
        assert_eq!(scrub.removed_lines, 0);
        assert_eq!(scrub.contents, REGISTRY);
        assert_eq!(scrub.vm_folder, None);
    }

    #[tokio::test]
    async fn rewrite_backs_up_once_and_replaces_registry() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let paths = PlatformPaths {
            platform: crate::Platform::Linux,
            config_dir: dir.path().to_owned(),
            machines_dir: dir.path().join("VirtualBox VMs"),
        };
        if let Err(e) = tokio::fs::write(paths.registry_file(), REGISTRY).await {
            panic!("setup: {e}");
        }

        let folder = match rewrite_registry(&paths, "BOINC_VM").await {
            Ok(f) => f,
            Err(e) => panic!("rewrite failed: {e}"),
        };
        assert_eq!(folder, Some(PathBuf::from("/home/vol/VirtualBox VMs/BOINC_VM")));

        let rewritten = tokio::fs::read_to_string(paths.registry_file()).await.unwrap_or_default();
        assert!(!rewritten.contains("{aaaa}"));
        let backup = tokio::fs::read_to_string(paths.registry_backup()).await.unwrap_or_default();
        assert_eq!(backup, REGISTRY, "backup must hold the original registry");
        assert!(!paths.registry_staging().exists(), "staging file must be renamed away");

        let again = rewrite_registry(&paths, "BOINC_VM2").await;
        assert!(again.is_ok());
        let backup = tokio::fs::read_to_string(paths.registry_backup()).await.unwrap_or_default();
        assert_eq!(backup, REGISTRY, "an existing backup must never be overwritten");
    }

    #[tokio::test]
    async fn missing_registry_is_not_an_error() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let paths = PlatformPaths::for_platform(crate::Platform::MacOs, dir.path(), None);
        match rewrite_registry(&paths, "vm").await {
            Ok(folder) => assert_eq!(folder, None),
            Err(e) => panic!("missing registry must be tolerated: {e}"),
        }
    }
}
