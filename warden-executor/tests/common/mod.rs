//! Shared fixtures: a scripted `VBoxManage` and a recording host.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use warden_core::{CoreError, HostClient, HostStatus, InitData, VmName, VmState};
use warden_executor::{
    CommandOutput, CommandRunner, LaunchOptions, Platform, PlatformPaths, SupervisorConfig, VmHandle,
    VmSupervisor,
};

pub const VM: &str = "BOINC_VM";

/// Behaviour knobs and recorded calls of [`FakeVBox`].
#[derive(Debug)]
pub struct FakeState {
    pub registered: bool,
    pub state: VmState,
    pub calls: Vec<Vec<String>>,
    pub fail_create: bool,
    pub fail_attach: bool,
    pub fail_list: bool,
    /// Number of upcoming `startvm` calls that fail.
    pub start_failures: u32,
    /// Number of upcoming `showvminfo` calls that fail.
    pub query_failures: u32,
    /// `controlvm pause` is accepted but the VM keeps running.
    pub ignore_pause: bool,
    /// State a `controlvm resume` leads to.
    pub resume_lands_in: VmState,
    pub log_folder: Option<PathBuf>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            registered: false,
            state: VmState::PoweredOff,
            calls: Vec::new(),
            fail_create: false,
            fail_attach: false,
            fail_list: false,
            start_failures: 0,
            query_failures: 0,
            ignore_pause: false,
            resume_lands_in: VmState::Running,
            log_folder: None,
        }
    }
}

/// In-memory stand-in for the `VBoxManage` executable.
#[derive(Debug, Default)]
pub struct FakeVBox {
    inner: Mutex<FakeState>,
}

impl FakeVBox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fake with the VM already registered in `state`.
    pub fn with_vm(state: VmState) -> Arc<Self> {
        let fake = Self::new();
        {
            let mut s = fake.state();
            s.registered = true;
            s.state = state;
        }
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state().calls.clone()
    }

    /// Number of recorded calls whose arguments start with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls().iter().filter(|call| starts_with(call, prefix)).count()
    }

    /// Index of the first recorded call starting with `prefix`.
    pub fn position(&self, prefix: &[&str]) -> Option<usize> {
        self.calls().iter().position(|call| starts_with(call, prefix))
    }

    /// Recorded calls containing every word in `words`.
    pub fn count_containing(&self, words: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|call| words.iter().all(|w| call.iter().any(|a| a == w)))
            .count()
    }

    fn respond(&self, args: &[String]) -> (bool, String) {
        let mut s = self.state();
        s.calls.push(args.to_vec());
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["--version"] => (true, "7.0.14r161095\n".to_owned()),
            ["list", "vms"] if s.fail_list => (false, "VBOX_E_IPRT_ERROR".to_owned()),
            ["list", "vms"] => {
                let listing = if s.registered { format!("\"{VM}\" {{0b9a-42}}\n") } else { String::new() };
                (true, listing)
            }
            ["createvm", ..] => {
                if s.fail_create {
                    return (false, "VBOX_E_FILE_ERROR".to_owned());
                }
                s.registered = true;
                s.state = VmState::PoweredOff;
                (true, String::new())
            }
            ["storageattach", ..] => (s.registered && !s.fail_attach, String::new()),
            ["modifyvm" | "storagectl" | "setextradata", ..] => (s.registered, String::new()),
            ["startvm", ..] => {
                if s.start_failures > 0 {
                    s.start_failures -= 1;
                    return (false, "VBOX_E_INVALID_OBJECT_STATE".to_owned());
                }
                let ok = s.registered && matches!(s.state, VmState::PoweredOff | VmState::Saved);
                if ok {
                    s.state = VmState::Running;
                }
                (ok, String::new())
            }
            ["controlvm", _, action, ..] => {
                if !s.registered {
                    return (false, String::new());
                }
                let next = match (*action, s.state) {
                    ("pause", VmState::Running) if !s.ignore_pause => Some(VmState::Paused),
                    ("pause", VmState::Running) => None,
                    ("resume", VmState::Paused) => Some(s.resume_lands_in),
                    ("savestate", VmState::Running | VmState::Paused) => Some(VmState::Saved),
                    ("poweroff", VmState::Running | VmState::Paused) => Some(VmState::PoweredOff),
                    ("cpuexecutioncap" | "vrde", VmState::Running) => None,
                    _ => return (false, String::new()),
                };
                if let Some(next) = next {
                    s.state = next;
                }
                (true, String::new())
            }
            ["showvminfo", ..] => {
                if s.query_failures > 0 {
                    s.query_failures -= 1;
                    return (false, "VBOX_E_OBJECT_NOT_FOUND".to_owned());
                }
                if !s.registered {
                    return (false, "Could not find a registered machine".to_owned());
                }
                let mut dump = format!("name=\"{VM}\"\nmemory=256\nVMState=\"{}\"\n", s.state.token());
                if let Some(folder) = &s.log_folder {
                    dump.push_str(&format!("LogFldr=\"{}\"\n", folder.display()));
                }
                (true, dump)
            }
            ["discardstate", ..] => {
                let ok = s.registered && s.state == VmState::Saved;
                if ok {
                    s.state = VmState::PoweredOff;
                }
                (ok, String::new())
            }
            ["unregistervm", ..] => {
                let ok = s.registered && s.state != VmState::Running;
                if ok {
                    s.registered = false;
                }
                (ok, String::new())
            }
            _ => (false, "unknown command".to_owned()),
        }
    }
}

fn starts_with(call: &[String], prefix: &[&str]) -> bool {
    call.len() >= prefix.len() && call.iter().zip(prefix).all(|(a, p)| a == p)
}

#[async_trait]
impl CommandRunner for FakeVBox {
    async fn run(&self, args: &[String], capture: bool) -> CommandOutput {
        let (success, output) = self.respond(args);
        CommandOutput::new(success, capture.then_some(output))
    }
}

/// Something the supervisor told the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Progress(f64),
    Checkpoint,
    Finish(i32),
    TemporaryExit(Duration),
}

/// Host double that replays scripted statuses and records calls.
#[derive(Debug, Default)]
pub struct MockHost {
    statuses: Mutex<VecDeque<HostStatus>>,
    fallback: Mutex<HostStatus>,
    init: Mutex<InitData>,
    events: Mutex<Vec<HostEvent>>,
    depth: AtomicI64,
    max_depth: AtomicI64,
    slot: PathBuf,
}

impl MockHost {
    pub fn new(slot: &Path) -> Arc<Self> {
        Arc::new(Self { slot: slot.to_owned(), ..Self::default() })
    }

    /// Statuses returned in order; afterwards `fallback` repeats.
    pub fn script(&self, statuses: impl IntoIterator<Item = HostStatus>) {
        lock(&self.statuses).extend(statuses);
    }

    pub fn set_fallback(&self, status: HostStatus) {
        *lock(&self.fallback) = status;
    }

    pub fn set_preferences(&self, prefs: &str) {
        lock(&self.init).project_preferences = Some(prefs.to_owned());
    }

    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.events).clone()
    }

    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn max_depth(&self) -> i64 {
        self.max_depth.load(Ordering::SeqCst)
    }

    pub fn progress_reports(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Progress(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HostEvent) {
        lock(&self.events).push(event);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl HostClient for MockHost {
    fn status(&self) -> HostStatus {
        lock(&self.statuses).pop_front().unwrap_or_else(|| *lock(&self.fallback))
    }

    fn report_progress(&self, fraction: f64) {
        self.record(HostEvent::Progress(fraction));
    }

    fn checkpoint(&self) {
        self.record(HostEvent::Checkpoint);
    }

    fn finish(&self, code: i32) {
        self.record(HostEvent::Finish(code));
    }

    fn temporary_exit(&self, delay: Duration, _reason: &str) {
        self.record(HostEvent::TemporaryExit(delay));
    }

    fn resolve_filename(&self, logical_name: &str) -> Result<PathBuf, CoreError> {
        Ok(self.slot.join(logical_name))
    }

    fn read_init_data(&self) -> Result<InitData, CoreError> {
        Ok(lock(&self.init).clone())
    }

    fn begin_critical_section(&self) {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_depth.fetch_max(depth, Ordering::SeqCst);
    }

    fn end_critical_section(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn in_critical_section(&self) -> bool {
        self.depth() > 0
    }
}

/// A supervisor wired to fakes inside a temporary slot directory.
pub struct Harness {
    pub dir: TempDir,
    pub fake: Arc<FakeVBox>,
    pub host: Arc<MockHost>,
    pub supervisor: VmSupervisor<Arc<FakeVBox>>,
}

impl Harness {
    pub fn new(fake: Arc<FakeVBox>) -> Self {
        Self::with_config(fake, 2, |_| {})
    }

    pub fn with_config(fake: Arc<FakeVBox>, cpus: u8, tweak: impl FnOnce(&mut SupervisorConfig)) -> Self {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let mut config = SupervisorConfig::default();
        config.work_dir = dir.path().to_owned();
        tweak(&mut config);

        let host = MockHost::new(dir.path());
        let paths = PlatformPaths::for_platform(Platform::Linux, &dir.path().join("home"), None);
        let name = match VmName::new(VM) {
            Ok(n) => n,
            Err(e) => panic!("valid name: {e}"),
        };
        let vm = VmHandle::new(name, dir.path().join("cernvm.vmdk"), config.name_file_path(), cpus);
        let host_dyn: Arc<dyn HostClient> = host.clone();
        let supervisor = VmSupervisor::new(
            Arc::clone(&fake),
            host_dyn,
            config,
            paths,
            vm,
            LaunchOptions::new(true, false),
        );
        Self { dir, fake, host, supervisor }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }
}
