//! Handles to spawned worker processes.

use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::camera::CameraType;
use crate::error::{Error, Result};
use crate::ipc::{SignalPaths, SignalSender, WorkerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Scanner(CameraType),
    Writer,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanner(camera) => write!(f, "scanner[{}]", camera.name()),
            Self::Writer => f.write_str("writer"),
        }
    }
}

/// Forwarded from a worker's stdout reader thread.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Line {
        role: WorkerRole,
        pid: u32,
        line: String,
        event: Option<WorkerEvent>,
    },
    /// The worker's stdout reached end of file.
    Closed { role: WorkerRole, pid: u32 },
}

/// How [`WorkerHandle::stop`] ended the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyExited,
    Exited,
    Killed,
}

/// A running worker: child process, its side channel and its stdout reader.
pub struct WorkerHandle {
    role: WorkerRole,
    child: Child,
    signals: SignalSender,
    reader: Option<JoinHandle<()>>,
    last_seen: Arc<Mutex<Instant>>,
}

impl WorkerHandle {
    /// Spawn `command` with stdout piped to a reader thread that forwards
    /// every line to `tx`.
    pub fn spawn(
        role: WorkerRole,
        mut command: Command,
        signal_dir: &Path,
        tx: Sender<WorkerMessage>,
    ) -> Result<Self> {
        let mut child = command
            .spawn()
            .map_err(|e| Error::WorkerSpawnFailed(format!("{role}: {e}")))?;
        let pid = child.id();
        let signals = fresh_signals(signal_dir, pid);

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::WorkerSpawnFailed(format!("{role}: stdout not piped")));
        };

        let last_seen = Arc::new(Mutex::new(Instant::now()));
        let seen = Arc::clone(&last_seen);
        let reader = thread::Builder::new()
            .name(format!("{role}-stdout"))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    let line = line.trim_end().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if let Ok(mut seen) = seen.lock() {
                        *seen = Instant::now();
                    }
                    let event = WorkerEvent::parse(&line);
                    if tx
                        .send(WorkerMessage::Line {
                            role,
                            pid,
                            line,
                            event,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
                let _ = tx.send(WorkerMessage::Closed { role, pid });
            })
            .map_err(|e| Error::WorkerSpawnFailed(format!("{role}: reader thread: {e}")));

        let reader = match reader {
            Ok(reader) => reader,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        info!("Started {} (pid {})", role, pid);
        Ok(Self {
            role,
            child,
            signals,
            reader: Some(reader),
            last_seen,
        })
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn signals(&self) -> &SignalSender {
        &self.signals
    }

    /// Time of the last stdout line (or of the spawn).
    pub fn last_seen(&self) -> Instant {
        self.last_seen
            .lock()
            .map(|seen| *seen)
            .unwrap_or_else(|_| Instant::now())
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the worker to exit via its shutdown marker, then kill it if it is
    /// still running after `timeout`.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let pid = self.pid();
        let outcome = if !self.is_running() {
            StopOutcome::AlreadyExited
        } else {
            let marker = match self.role {
                WorkerRole::Writer => self.signals.writer_shutdown(),
                WorkerRole::Scanner(camera) => self.signals.scanner_shutdown(camera),
            };
            if let Err(e) = marker {
                warn!("Failed to signal {} (pid {}): {}", self.role, pid, e);
            }

            let deadline = Instant::now() + timeout;
            let mut exited = false;
            while Instant::now() < deadline {
                if !self.is_running() {
                    exited = true;
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }

            if exited {
                StopOutcome::Exited
            } else {
                warn!("{} ({}), terminating", Error::WorkerUnresponsive { pid }, self.role);
                if let Err(e) = self.child.kill() {
                    warn!("Failed to kill {} (pid {}): {}", self.role, pid, e);
                }
                let _ = self.child.wait();
                StopOutcome::Killed
            }
        };

        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!("{} stdout reader panicked", self.role);
        }
        self.signals.paths().clear();
        debug!("{} (pid {}) stopped: {:?}", self.role, pid, outcome);
        outcome
    }
}

/// Side channel for a new worker, with leftovers from an earlier process
/// that had the same pid removed.
fn fresh_signals(signal_dir: &Path, pid: u32) -> SignalSender {
    let paths = SignalPaths::in_dir(signal_dir, pid);
    paths.clear();
    SignalSender::new(paths)
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        command
    }

    #[test]
    fn test_reader_forwards_lines_and_close() {
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut handle = WorkerHandle::spawn(
            WorkerRole::Scanner(CameraType::Cab),
            shell("echo 'FOUND_PID: CAB: 5'; echo noise"),
            dir.path(),
            tx,
        )
        .unwrap();

        let messages: Vec<WorkerMessage> = rx.iter().take(3).collect();
        match &messages[0] {
            WorkerMessage::Line { event, .. } => assert_eq!(
                event,
                &Some(WorkerEvent::PidFound {
                    camera: CameraType::Cab,
                    pid: 5
                })
            ),
            other => panic!("unexpected {other:?}"),
        }
        match &messages[1] {
            WorkerMessage::Line { line, event, .. } => {
                assert_eq!(line, "noise");
                assert!(event.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(messages[2], WorkerMessage::Closed { .. }));

        let outcome = handle.stop(Duration::from_secs(5));
        assert!(matches!(
            outcome,
            StopOutcome::AlreadyExited | StopOutcome::Exited
        ));
    }

    #[test]
    fn test_new_worker_starts_with_clean_side_channel() {
        let dir = tempdir().unwrap();
        let stale = SignalSender::new(SignalPaths::in_dir(dir.path(), 4242));
        stale.writer_shutdown().unwrap();
        stale.scanner_rescan(CameraType::Cab).unwrap();
        stale.address_update(CameraType::Cab, 0x1000).unwrap();

        let signals = fresh_signals(dir.path(), 4242);
        let paths = signals.paths();
        assert!(!paths.writer_shutdown().exists());
        assert!(!paths.scanner_rescan(CameraType::Cab).exists());
        assert!(!paths.address_update().exists());
    }

    #[test]
    fn test_unresponsive_worker_is_killed() {
        let dir = tempdir().unwrap();
        let (tx, _rx) = mpsc::channel();
        let mut handle =
            WorkerHandle::spawn(WorkerRole::Writer, shell("exec sleep 30"), dir.path(), tx)
                .unwrap();

        let started = Instant::now();
        assert_eq!(handle.stop(Duration::from_millis(200)), StopOutcome::Killed);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!handle.is_running());
    }
}
