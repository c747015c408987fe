//! Headless controller loop: worker output in, worker commands out.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::camera::CameraType;
use crate::config::{ControllerConfig, ScanConfig, timing};
use crate::error::Result;
use crate::ipc::process_exists;
use crate::supervisor::orphans::sweep_orphans;
use crate::supervisor::session_log::SessionLog;
use crate::supervisor::state::{ControlAction, ControllerState};
use crate::supervisor::worker::{WorkerMessage, WorkerRole};
use crate::supervisor::WorkerSupervisor;

/// Ties the pure [`ControllerState`] to real worker processes.
pub struct Controller {
    config: ControllerConfig,
    supervisor: WorkerSupervisor,
    state: ControllerState,
    log: Option<SessionLog>,
    game_check_interval: Duration,
    last_game_check: Option<Instant>,
    stall_threshold: Duration,
    stalled: HashSet<WorkerRole>,
}

impl Controller {
    pub fn new(config: ControllerConfig, supervisor: WorkerSupervisor) -> Self {
        Self {
            config,
            supervisor,
            state: ControllerState::new(),
            log: None,
            game_check_interval: Duration::from_millis(timing::GAME_CHECK_INTERVAL_MS),
            last_game_check: None,
            stall_threshold: Duration::from_millis(timing::STALL_WARNING_MS),
            stalled: HashSet::new(),
        }
    }

    pub fn session_log(mut self, log: SessionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Sweep leftovers from an earlier run, then start one scanner per camera.
    pub fn start(&mut self) -> Result<()> {
        let swept = sweep_orphans(self.supervisor.launcher().exe());
        if swept > 0 {
            info!("Cleaned up {} orphaned worker(s)", swept);
        }
        self.start_scanners()
    }

    pub fn start_scanners(&mut self) -> Result<()> {
        for camera in self.config.scanned_cameras() {
            let camera_config = self.config.cameras.get(camera);
            let scan = ScanConfig::builder(camera)
                .pattern(camera_config.pattern_for(camera))
                .radius(camera_config.radius)
                .process_name(self.config.process_name.as_str())
                .settings(&self.config.scan)
                .build();
            let pid = self.supervisor.start_scanner(&scan)?;
            info!("[{}] Scanner pid {}", camera, pid);
        }
        Ok(())
    }

    /// Handle worker output for up to `timeout`, reap exited workers and
    /// periodically check that the game is still running.
    pub fn tick(&mut self, timeout: Duration) {
        for message in self.supervisor.poll(timeout) {
            self.handle_message(message);
        }

        for role in self.supervisor.reap() {
            if role == WorkerRole::Writer {
                warn!("Writer exited");
                self.state.writer_stopped();
            }
        }

        let now = Instant::now();
        let due = self
            .last_game_check
            .is_none_or(|last| now.duration_since(last) >= self.game_check_interval);
        if due {
            self.last_game_check = Some(now);
            self.check_game();
            self.report_stalls(now);
        }
    }

    /// Warn once for each worker that has gone quiet; returns the roles
    /// newly reported. A worker that speaks again is reported afresh next time.
    pub fn report_stalls(&mut self, now: Instant) -> Vec<WorkerRole> {
        let silent = self.supervisor.stalled(now, self.stall_threshold);
        self.stalled.retain(|role| silent.iter().any(|(r, _)| r == role));

        let mut reported = Vec::new();
        for (role, duration) in silent {
            if self.stalled.insert(role) {
                warn!("{} silent for {:.1}s", role, duration.as_secs_f32());
                reported.push(role);
            }
        }
        reported
    }

    pub fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Line {
                role, line, event, ..
            } => {
                if let Some(log) = &self.log
                    && let Err(e) = log.append(&role.to_string(), &line)
                {
                    warn!("Session log write failed: {}", e);
                }
                if let Some(event) = event {
                    let actions = self.state.handle_event(&event);
                    self.apply_all(actions);
                }
            }
            WorkerMessage::Closed { role, pid } => {
                debug!("{} (pid {}) closed its output", role, pid);
            }
        }
    }

    /// Try the next known address for `camera`.
    pub fn cycle_address(&mut self, camera: CameraType) {
        let actions = self.state.cycle_address(camera);
        self.apply_all(actions);
    }

    pub fn set_active_camera(&mut self, camera: CameraType) {
        let actions = self.state.set_active_camera(camera);
        self.apply_all(actions);
    }

    pub fn request_rescan(&mut self, camera: CameraType) {
        let actions = self.state.request_rescan(camera);
        self.apply_all(actions);
    }

    pub fn shutdown(&mut self) {
        info!("Stopping all workers");
        self.supervisor.stop_all();
        self.state.writer_stopped();
        let swept = sweep_orphans(self.supervisor.launcher().exe());
        if swept > 0 {
            info!("Cleaned up {} orphaned worker(s)", swept);
        }
    }

    fn check_game(&mut self) {
        let Some(pid) = self.state.game_pid() else {
            return;
        };
        if process_exists(pid) {
            return;
        }
        let actions = self.state.target_lost();
        self.apply_all(actions);
        // Fresh scanners wait for the next game session.
        if let Err(e) = self.start_scanners() {
            warn!("Failed to restart scanners: {}", e);
        }
    }

    fn apply_all(&mut self, actions: Vec<ControlAction>) {
        for action in actions {
            if let Err(e) = self.apply(&action) {
                warn!("{:?} failed: {}", action, e);
            }
        }
    }

    fn apply(&mut self, action: &ControlAction) -> Result<()> {
        match action {
            ControlAction::StartWriter { addresses, active } => {
                let pid = self
                    .supervisor
                    .start_writer(&self.config.cameras, addresses, *active)?;
                info!("Writer pid {} ({} camera)", pid, active);
                self.state.writer_started();
            }
            ControlAction::SendAddress { camera, address } => {
                self.supervisor.switch_active_address(*camera, *address)?;
            }
            ControlAction::SendActiveCamera(camera) => {
                self.supervisor.switch_active_camera(*camera)?;
            }
            ControlAction::RequestRescan(camera) => {
                self.supervisor.request_rescan(*camera)?;
            }
            ControlAction::StopAllWorkers => {
                self.supervisor.stop_all();
                self.state.writer_stopped();
            }
        }
        Ok(())
    }
}
