//! Privilege check run before any worker is spawned.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::memory::{ProcessHandle, find_process_id, is_elevated};

/// What the privilege check found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflightReport {
    pub elevated: bool,
    /// Pid of the target if it was running and could be opened.
    pub probed_pid: Option<u32>,
}

/// Fail with [`Error::InsufficientPrivilege`] unless this process is elevated
/// and, when the target is already running, able to open it for writing.
pub fn check_privileges(process_name: &str) -> Result<PreflightReport> {
    let elevated = is_elevated()?;
    if !elevated {
        return Err(Error::InsufficientPrivilege(
            "administrator rights are required to access game memory".to_string(),
        ));
    }

    let probed_pid = match find_process_id(process_name) {
        Ok(pid) => {
            ProcessHandle::open(pid).map_err(|e| {
                Error::InsufficientPrivilege(format!("cannot open {process_name} (pid {pid}): {e}"))
            })?;
            info!("Opened {} (pid {}) for read/write", process_name, pid);
            Some(pid)
        }
        Err(e) if e.is_process_gone() => {
            info!("{} not running yet, skipping open probe", process_name);
            None
        }
        Err(e) => {
            warn!("Process lookup failed: {}", e);
            None
        }
    };

    Ok(PreflightReport {
        elevated,
        probed_pid,
    })
}
