//! Worker-side watch on the controller process.

use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::info;

use crate::config::timing;

/// Whether a process with `pid` currently exists.
pub fn process_exists(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Throttled liveness check of the supervising process.
pub struct ParentWatch {
    pid: u32,
    interval: Duration,
    last_check: Option<Instant>,
    system: System,
}

impl ParentWatch {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            interval: Duration::from_millis(timing::PARENT_CHECK_INTERVAL_MS),
            last_check: None,
            system: System::new(),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns false once the parent is gone. Between checks it reports alive.
    pub fn parent_alive(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_check
            && now.duration_since(last) < self.interval
        {
            return true;
        }
        self.last_check = Some(now);

        let pid = Pid::from_u32(self.pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let alive = self.system.process(pid).is_some();
        if !alive {
            info!("Supervisor process {} is gone", self.pid);
        }
        alive
    }
}
