//! Host platform detection and VirtualBox path layout.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Host operating system family, as far as VirtualBox layout is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    /// Platform this binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

/// Where VirtualBox keeps its global registry and VM folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformPaths {
    pub platform: Platform,
    /// Directory holding `VirtualBox.xml`.
    pub config_dir: PathBuf,
    /// Default parent folder of per-VM directories.
    pub machines_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolves the layout for the current platform from the environment.
    ///
    /// Honors `VBOX_USER_HOME`; otherwise derives everything from the
    /// user's home directory. Returns `None` if no home can be found.
    #[must_use]
    pub fn resolve() -> Option<Self> {
        let platform = Platform::current();
        let home = home_dir(platform)?;
        let user_home = std::env::var_os("VBOX_USER_HOME").map(PathBuf::from);
        Some(Self::for_platform(platform, &home, user_home))
    }

    /// Layout for `platform` under `home`.
    #[must_use]
    pub fn for_platform(platform: Platform, home: &Path, vbox_user_home: Option<PathBuf>) -> Self {
        let config_dir = vbox_user_home.unwrap_or_else(|| match platform {
            Platform::MacOs => home.join("Library").join("VirtualBox"),
            Platform::Windows => home.join(".VirtualBox"),
            Platform::Linux => {
                let xdg = home.join(".config").join("VirtualBox");
                if xdg.join("VirtualBox.xml").exists() {
                    xdg
                } else {
                    home.join(".VirtualBox")
                }
            }
        });
        Self {
            platform,
            config_dir,
            machines_dir: home.join("VirtualBox VMs"),
        }
    }

    /// The global registry, `VirtualBox.xml`.
    #[must_use]
    pub fn registry_file(&self) -> PathBuf {
        self.config_dir.join("VirtualBox.xml")
    }

    /// One-time backup of the registry taken before the first rewrite.
    #[must_use]
    pub fn registry_backup(&self) -> PathBuf {
        self.config_dir.join("VirtualBox.xml.warden-bak")
    }

    /// Scratch file a rewritten registry is staged in.
    #[must_use]
    pub fn registry_staging(&self) -> PathBuf {
        self.config_dir.join("VirtualBox.xmlNew")
    }

    /// Default folder of a VM named `name`.
    #[must_use]
    pub fn default_vm_dir(&self, name: &str) -> PathBuf {
        self.machines_dir.join(name)
    }

    /// [`Self::default_vm_dir`], but only when it is a direct child of
    /// `machines_dir` and therefore safe to delete.
    #[must_use]
    pub fn owned_vm_dir(&self, name: &str) -> Option<PathBuf> {
        let dir = self.default_vm_dir(name);
        let direct_child = dir.parent() == Some(self.machines_dir.as_path());
        (direct_child && is_strict_child(&self.machines_dir, &dir)).then_some(dir)
    }
}

/// Whether `path` lies below `parent` without being `parent` itself or
/// climbing out through `.`/`..` components.
#[must_use]
pub fn is_strict_child(parent: &Path, path: &Path) -> bool {
    path != parent && path.starts_with(parent) && !has_relative_components(path)
}

/// Whether `folder` is named after the VM, as VirtualBox names the folder
/// holding `<name>.vbox`.
#[must_use]
pub fn is_named_vm_folder(folder: &Path, name: &str) -> bool {
    folder.file_name() == Some(OsStr::new(name)) && !has_relative_components(folder)
}

fn has_relative_components(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir | Component::CurDir))
}

fn home_dir(platform: Platform) -> Option<PathBuf> {
    if platform == Platform::Windows {
        if let (Some(drive), Some(path)) = (std::env::var_os("HOMEDRIVE"), std::env::var_os("HOMEPATH")) {
            let mut home = PathBuf::from(drive);
            home.push(path);
            return Some(home);
        }
        return std::env::var_os("USERPROFILE").map(PathBuf::from);
    }
    std::env::var_os("HOME").filter(|h| !h.is_empty()).map(PathBuf::from)
}
