// src/exec/reaper.rs

//! Finding and killing orphaned workers left behind by a dead coordinator.

use std::path::Path;

use sysinfo::{Pid, Process, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use super::launcher::WORKER_SUBCOMMAND;

/// What the stray check needs to know about one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo<'a> {
    pub pid: u32,
    pub exe: Option<&'a Path>,
    pub first_arg: Option<&'a str>,
    /// `None` when the parent is gone.
    pub parent: Option<u32>,
}

/// A stray runs our worker executable in worker mode, is not us, and has
/// lost the coordinator that started it. Workers whose parent is alive
/// belong to another coordinator and are left alone.
pub fn is_stray(info: &ProcessInfo<'_>, worker_exe: &Path, self_pid: u32) -> bool {
    info.pid != self_pid
        && info.exe == Some(worker_exe)
        && info.first_arg == Some(WORKER_SUBCOMMAND)
        && matches!(info.parent, None | Some(0) | Some(1))
}

fn describe<'a>(sys: &System, pid: Pid, process: &'a Process) -> ProcessInfo<'a> {
    // A parent pid that no longer exists counts as orphaned.
    let parent = process
        .parent()
        .filter(|ppid| sys.process(*ppid).is_some())
        .map(|ppid| ppid.as_u32());
    ProcessInfo {
        pid: pid.as_u32(),
        exe: process.exe(),
        first_arg: process.cmd().get(1).and_then(|arg| arg.to_str()),
        parent,
    }
}

/// Kill every stray worker of `worker_exe`. Returns how many were killed.
pub fn reap_strays(worker_exe: &Path) -> usize {
    let self_pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid.as_u32(),
        Err(e) => {
            warn!(error = %e, "cannot determine own pid; skipping stray worker scan");
            return 0;
        }
    };

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut killed = 0;
    for (pid, process) in sys.processes() {
        let info = describe(&sys, *pid, process);
        if !is_stray(&info, worker_exe, self_pid) {
            continue;
        }
        if process.kill() {
            info!(pid = info.pid, "killed stray worker");
            killed += 1;
        } else {
            warn!(pid = info.pid, "failed to kill stray worker");
        }
    }

    debug!(killed, exe = %worker_exe.display(), "stray worker scan complete");
    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info<'a>(exe: &'a Path, arg: &'a str, parent: Option<u32>) -> ProcessInfo<'a> {
        ProcessInfo {
            pid: 42,
            exe: Some(exe),
            first_arg: Some(arg),
            parent,
        }
    }

    #[test]
    fn orphaned_worker_is_stray() {
        let exe = Path::new("/opt/jobfleet");
        assert!(is_stray(&info(exe, "worker", None), exe, 7));
        assert!(is_stray(&info(exe, "worker", Some(1)), exe, 7));
    }

    #[test]
    fn live_parent_other_exe_or_self_is_not_stray() {
        let exe = Path::new("/opt/jobfleet");
        assert!(!is_stray(&info(exe, "worker", Some(500)), exe, 7));
        assert!(!is_stray(&info(exe, "run", None), exe, 7));
        assert!(!is_stray(&info(Path::new("/bin/sh"), "worker", None), exe, 7));
        assert!(!is_stray(&info(exe, "worker", None), exe, 42));
    }

    #[test]
    fn scan_never_kills_the_test_process() {
        // The test binary is never started in worker mode.
        let exe = std::env::current_exe().unwrap();
        assert_eq!(reap_strays(&exe), 0);
    }
}
