//! Cleanup of worker processes left behind by an earlier controller.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use sysinfo::{ProcessesToUpdate, System};
use tracing::{info, warn};

const WORKER_SUBCOMMANDS: [&str; 2] = ["scan", "write"];

/// Whether a command line is a `scan` or `write` invocation.
pub fn is_worker_command(args: &[OsString]) -> bool {
    args.get(1)
        .and_then(|a| a.to_str())
        .is_some_and(|sub| WORKER_SUBCOMMANDS.contains(&sub))
}

/// Kill every worker process of the executable `exe` other than this process.
/// Returns how many were killed.
pub fn sweep_orphans(exe: &Path) -> usize {
    let Some(exe_name) = exe.file_name() else {
        return 0;
    };
    let own_pid = std::process::id();

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut killed = 0;
    for (pid, process) in system.processes() {
        if pid.as_u32() == own_pid
            || !same_name(process.name(), exe_name)
            || !is_worker_command(process.cmd())
        {
            continue;
        }
        if process.kill() {
            info!("Killed orphaned worker (pid {})", pid);
            killed += 1;
        } else {
            warn!("Failed to kill orphaned worker (pid {})", pid);
        }
    }
    killed
}

fn same_name(a: &OsStr, b: &OsStr) -> bool {
    match (a.to_str(), b.to_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => a == b,
    }
}
