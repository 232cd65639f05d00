//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// vm-warden - run a VirtualBox VM as a volunteer computing task
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "vm-warden", version)]
#[command(about = "Supervise a VirtualBox VM on behalf of a volunteer computing client")]
pub struct Cli {
    /// Start the VM without a GUI window
    #[arg(long)]
    pub headless: bool,

    /// Log verbosity: 0 off, 1 error, 2 warn, 3 info, 4 or more debug
    #[arg(long, default_value_t = 3, value_name = "LEVEL")]
    pub debug: u8,

    /// Name for a newly created VM (a persisted name takes precedence)
    #[arg(long, value_name = "NAME")]
    pub vmname: Option<String>,

    /// Enable the VirtualBox remote display server
    #[arg(long)]
    pub vrde: bool,

    /// JSON file overriding supervisor defaults
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Slot directory holding the disk image and state files
    #[arg(long, value_name = "DIR")]
    pub slot: Option<PathBuf>,

    /// Init data file, relative to the slot directory
    #[arg(long, default_value = "init_data.json", value_name = "PATH")]
    pub init_data: PathBuf,
}
