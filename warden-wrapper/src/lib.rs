//! `vm-warden`: runs a VirtualBox VM as a volunteer computing task.
//!
//! The binary parses the command line, sets up logging, reads the host's
//! init data from the slot directory and hands control to
//! [`warden_executor::VmSupervisor`]. Outside a volunteer computing
//! client, [`local_host::LocalHost`] stands in for the client and takes
//! suspend, quit and abort requests as process signals.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod app;
pub mod cli;
pub mod local_host;
pub mod logging;
