//! Command runner abstraction over the `VBoxManage` executable.
//!
//! Allows swapping the real process launcher for a scripted fake
//! without changing the lifecycle logic.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

/// Outcome of one control-program invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct CommandOutput {
    /// The program ran and exited with status zero.
    pub success: bool,
    /// Combined stdout then stderr, present only when capture was requested.
    pub output: Option<String>,
}

impl CommandOutput {
    #[must_use]
    pub fn new(success: bool, output: Option<String>) -> Self {
        Self { success, output }
    }
}

/// Runs the VirtualBox control program.
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
/// Failures are reported through [`CommandOutput::success`], never by
/// panicking; a program that cannot be launched counts as a failure.
///
/// # Cancel Safety
/// Dropping the future kills nothing; a launched process runs to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the control program with `args`, capturing output when `capture` is set.
    async fn run(&self, args: &[String], capture: bool) -> CommandOutput;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    async fn run(&self, args: &[String], capture: bool) -> CommandOutput {
        (**self).run(args, capture).await
    }
}

/// Launches the real `VBoxManage` binary in quiet mode.
#[derive(Debug, Clone)]
pub struct VBoxManageRunner {
    /// Path or bare name of the executable.
    program: PathBuf,

    /// Bytes of combined output kept when capturing.
    capacity: usize,
}

impl VBoxManageRunner {
    /// Create a runner for the given executable.
    ///
    /// # Arguments
    /// - `program`: path to `VBoxManage`, or a bare name looked up in `PATH`
    /// - `capacity`: maximum bytes of captured output returned
    #[must_use]
    pub fn new(program: PathBuf, capacity: usize) -> Self {
        Self { program, capacity }
    }

    /// Create a runner using `VBoxManage` from `PATH` and an 8 KiB capture buffer.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PathBuf::from("VBoxManage"), 8192)
    }
}

#[async_trait]
impl CommandRunner for VBoxManageRunner {
    async fn run(&self, args: &[String], capture: bool) -> CommandOutput {
        let mut command = Command::new(&self.program);
        command
            .arg("-q")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let subcommand = args.first().map_or("", String::as_str);
        match command.output().await {
            Ok(out) => {
                let success = out.status.success();
                if !success {
                    tracing::debug!(
                        subcommand,
                        status = %out.status,
                        stderr = %String::from_utf8_lossy(&out.stderr).trim_end(),
                        "VBoxManage reported failure"
                    );
                }
                let output = capture.then(|| combine_output(&out.stdout, &out.stderr, self.capacity));
                CommandOutput { success, output }
            }
            Err(e) => {
                tracing::warn!(
                    program = %self.program.display(),
                    subcommand,
                    error = %e,
                    "failed to launch VBoxManage"
                );
                CommandOutput { success: false, output: capture.then(String::new) }
            }
        }
    }
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Concatenates stdout and stderr and keeps at most `capacity` bytes.
fn combine_output(stdout: &[u8], stderr: &[u8], capacity: usize) -> String {
    let mut bytes = Vec::with_capacity((stdout.len() + stderr.len()).min(capacity));
    bytes.extend(stdout.iter().chain(stderr).take(capacity));
    String::from_utf8_lossy(&bytes).into_owned()
}
