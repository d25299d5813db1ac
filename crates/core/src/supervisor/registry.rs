//! Process registry for recovering orphaned encode subprocesses.
//!
//! Every live encode subprocess is recorded here, and the set is flushed to
//! a small JSON file on each change. After an unclean shutdown the next
//! start reads the file and kills whatever is left over.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::SupervisorError;
use crate::metrics;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    /// pid -> program that was launched
    processes: BTreeMap<u32, String>,
}

/// Set of live subprocess ids, optionally persisted.
pub struct ProcessRegistry {
    path: Option<PathBuf>,
    live: Mutex<BTreeMap<u32, String>>,
}

impl ProcessRegistry {
    /// Registry persisted at `path`. Existing content is left for [`recover`].
    ///
    /// [`recover`]: ProcessRegistry::recover
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            live: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registry without persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            live: Mutex::new(BTreeMap::new()),
        }
    }

    fn live(&self) -> MutexGuard<'_, BTreeMap<u32, String>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a freshly spawned subprocess.
    pub fn register(&self, pid: u32, program: &str) -> Result<(), SupervisorError> {
        let mut live = self.live();
        live.insert(pid, program.to_string());
        metrics::LIVE_SUBPROCESSES.set(live.len() as i64);
        debug!(pid, program, "Registered subprocess");
        self.flush(&live)
    }

    /// Forget a subprocess that has been reaped. Unknown ids are ignored.
    pub fn unregister(&self, pid: u32) -> Result<(), SupervisorError> {
        let mut live = self.live();
        if live.remove(&pid).is_none() {
            return Ok(());
        }
        metrics::LIVE_SUBPROCESSES.set(live.len() as i64);
        debug!(pid, "Unregistered subprocess");
        self.flush(&live)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.live().keys().copied().collect()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.live().contains_key(&pid)
    }

    /// Kill subprocesses left behind by a previous run, then clear the file.
    ///
    /// Returns the ids that were signalled. Ids now owned by an unrelated
    /// program are skipped.
    pub fn recover(&self) -> Result<Vec<u32>, SupervisorError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };

        let leftover = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str::<RegistryFile>(&text)
                .map_err(|e| {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable process registry");
                })
                .unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryFile::default(),
            Err(e) => return Err(SupervisorError::Registry(e.to_string())),
        };

        let mut killed = Vec::new();
        for (pid, program) in leftover.processes {
            if !still_running_program(pid, &program) {
                debug!(pid, program = %program, "Orphan already gone");
                continue;
            }
            if force_kill(pid) {
                warn!(pid, program = %program, "Killed orphaned encode subprocess");
                killed.push(pid);
            }
        }
        metrics::ORPHANS_KILLED.inc_by(killed.len() as u64);

        let live = self.live();
        self.flush(&live)?;
        Ok(killed)
    }

    /// Kill every live subprocess. Used at shutdown.
    pub fn kill_all(&self) -> Vec<u32> {
        let pids = self.pids();
        let killed: Vec<u32> = pids.into_iter().filter(|pid| force_kill(*pid)).collect();
        if !killed.is_empty() {
            info!(count = killed.len(), "Killed live encode subprocesses");
        }
        killed
    }

    fn flush(&self, live: &BTreeMap<u32, String>) -> Result<(), SupervisorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = RegistryFile {
            processes: live.clone(),
        };
        let json = serde_json::to_string(&file)
            .map_err(|e| SupervisorError::Registry(e.to_string()))?;
        write_atomic(path, json.as_bytes()).map_err(|e| SupervisorError::Registry(e.to_string()))
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Whether `pid` still looks like the program we launched.
///
/// Without procfs there is nothing to compare against, so the id is trusted.
fn still_running_program(pid: u32, program: &str) -> bool {
    let cmdline = match std::fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(bytes) => bytes,
        Err(_) => return !Path::new("/proc/self").exists(),
    };
    let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
    let argv0 = String::from_utf8_lossy(argv0);
    let name = |s: &str| {
        Path::new(s)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    name(&argv0) == name(program)
}

#[cfg(unix)]
fn force_kill(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!(pid, error = %e, "Failed to kill subprocess");
            false
        }
    }
}

#[cfg(not(unix))]
fn force_kill(pid: u32) -> bool {
    warn!(pid, "Killing subprocesses by id is not supported on this platform");
    false
}
