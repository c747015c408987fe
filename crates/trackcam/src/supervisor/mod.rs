//! Worker process lifecycle for the controller.

pub mod controller;
pub mod launcher;
pub mod orphans;
pub mod preflight;
pub mod session_log;
pub mod state;
pub mod worker;

pub use controller::Controller;
pub use launcher::WorkerLauncher;
pub use orphans::{is_worker_command, sweep_orphans};
pub use preflight::{PreflightReport, check_privileges};
pub use session_log::SessionLog;
pub use state::{AddressSet, ControlAction, ControllerState, Telemetry};
pub use worker::{StopOutcome, WorkerHandle, WorkerMessage, WorkerRole};

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::camera::CameraType;
use crate::config::{CameraConfigSet, ScanConfig, timing};
use crate::error::Result;

/// Owns every spawned worker: at most one scanner per camera and one writer.
pub struct WorkerSupervisor {
    launcher: WorkerLauncher,
    signal_dir: PathBuf,
    stop_timeout: Duration,
    scanners: BTreeMap<CameraType, WorkerHandle>,
    writer: Option<WorkerHandle>,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
}

impl WorkerSupervisor {
    pub fn new(launcher: WorkerLauncher) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            launcher,
            signal_dir: std::env::temp_dir(),
            stop_timeout: Duration::from_millis(timing::STOP_TIMEOUT_MS),
            scanners: BTreeMap::new(),
            writer: None,
            tx,
            rx,
        }
    }

    /// Directory for worker side-channel files (must match the workers').
    pub fn signal_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.signal_dir = dir.into();
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn launcher(&self) -> &WorkerLauncher {
        &self.launcher
    }

    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    pub fn writer_pid(&self) -> Option<u32> {
        self.writer.as_ref().map(WorkerHandle::pid)
    }

    pub fn scanner_pid(&self, camera: CameraType) -> Option<u32> {
        self.scanners.get(&camera).map(WorkerHandle::pid)
    }

    /// Spawn a scanner for `config.camera`, replacing any running one.
    pub fn start_scanner(&mut self, config: &ScanConfig) -> Result<u32> {
        self.stop_scanner(config.camera);
        let command = self.launcher.scanner_command(config);
        let handle = WorkerHandle::spawn(
            WorkerRole::Scanner(config.camera),
            command,
            &self.signal_dir,
            self.tx.clone(),
        )?;
        let pid = handle.pid();
        self.scanners.insert(config.camera, handle);
        Ok(pid)
    }

    /// Spawn the writer, stopping any previous one first. The camera
    /// configuration is handed over through the config blob.
    pub fn start_writer(
        &mut self,
        configs: &CameraConfigSet,
        addresses: &BTreeMap<CameraType, u64>,
        active: CameraType,
    ) -> Result<u32> {
        self.stop_writer();
        let config_path = self.launcher.config_path();
        configs.save(&config_path)?;

        let command = self.launcher.writer_command(&config_path, addresses, active);
        let handle =
            WorkerHandle::spawn(WorkerRole::Writer, command, &self.signal_dir, self.tx.clone())?;
        let pid = handle.pid();
        self.writer = Some(handle);
        Ok(pid)
    }

    pub fn stop_scanner(&mut self, camera: CameraType) -> Option<StopOutcome> {
        let mut handle = self.scanners.remove(&camera)?;
        Some(handle.stop(self.stop_timeout))
    }

    pub fn stop_writer(&mut self) -> Option<StopOutcome> {
        let mut handle = self.writer.take()?;
        Some(handle.stop(self.stop_timeout))
    }

    pub fn stop_all(&mut self) {
        if let Some(outcome) = self.stop_writer() {
            debug!("Writer stop: {:?}", outcome);
        }
        let cameras: Vec<CameraType> = self.scanners.keys().copied().collect();
        for camera in cameras {
            self.stop_scanner(camera);
        }
        let config_path = self.launcher.config_path();
        if let Err(e) = fs::remove_file(&config_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove {}: {}", config_path.display(), e);
        }
    }

    /// Point the running writer's `camera` session at `address`.
    pub fn switch_active_address(&self, camera: CameraType, address: u64) -> Result<()> {
        match &self.writer {
            Some(writer) => {
                info!("Sending {} address {:#x} to writer", camera, address);
                writer.signals().address_update(camera, address)
            }
            None => {
                debug!("No writer for {} address {:#x}", camera, address);
                Ok(())
            }
        }
    }

    pub fn switch_active_camera(&self, camera: CameraType) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.signals().active_camera(camera),
            None => Ok(()),
        }
    }

    pub fn request_rescan(&self, camera: CameraType) -> Result<()> {
        match self.scanners.get(&camera) {
            Some(scanner) => {
                info!("Requesting {} rescan", camera);
                scanner.signals().scanner_rescan(camera)
            }
            None => {
                warn!("No {} scanner running, rescan dropped", camera);
                Ok(())
            }
        }
    }

    /// Wait up to `timeout` for worker output, then drain whatever else is queued.
    pub fn poll(&self, timeout: Duration) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        match self.rx.recv_timeout(timeout) {
            Ok(message) => messages.push(message),
            // The supervisor holds a sender, so only a timeout ends the wait.
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return messages,
        }
        messages.extend(self.rx.try_iter());
        messages
    }

    /// Drop handles of workers that exited on their own.
    pub fn reap(&mut self) -> Vec<WorkerRole> {
        let mut reaped = Vec::new();
        if let Some(writer) = self.writer.as_mut()
            && !writer.is_running()
        {
            if let Some(mut handle) = self.writer.take() {
                handle.stop(self.stop_timeout);
            }
            reaped.push(WorkerRole::Writer);
        }

        let exited: Vec<CameraType> = self
            .scanners
            .iter_mut()
            .filter_map(|(&camera, handle)| (!handle.is_running()).then_some(camera))
            .collect();
        for camera in exited {
            self.stop_scanner(camera);
            reaped.push(WorkerRole::Scanner(camera));
        }

        for role in &reaped {
            info!("{} exited", role);
        }
        reaped
    }

    /// Workers whose stdout has been silent for at least `threshold`.
    pub fn stalled(&self, now: Instant, threshold: Duration) -> Vec<(WorkerRole, Duration)> {
        self.writer
            .iter()
            .chain(self.scanners.values())
            .map(|h| (h.role(), h.silent_for(now)))
            .filter(|(_, silent)| *silent >= threshold)
            .collect()
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
