use tracing::{debug, info};

use crate::camera::CameraType;
use crate::config::{CameraConfig, CameraOffsets};
use crate::writer::transform::{AxisLimits, Translation};

/// Lifecycle of one camera's write target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No address.
    Unarmed,
    /// Address known, baseline not captured yet.
    Armed,
    /// Baseline captured, writing every cycle.
    Tracking,
    /// Last write failed; address dropped.
    Faulted,
}

/// Write target and baseline for one camera type.
#[derive(Debug, Clone)]
pub struct CameraSession {
    camera: CameraType,
    config: CameraConfig,
    offsets: CameraOffsets,
    limits: AxisLimits,
    address: Option<u64>,
    baseline: Option<Translation>,
    phase: SessionPhase,
}

impl CameraSession {
    pub fn new(camera: CameraType, config: CameraConfig) -> Self {
        let config = config.sanitized();
        let offsets = config.offsets();
        let limits = AxisLimits::from(&config);
        Self {
            camera,
            config,
            offsets,
            limits,
            address: None,
            baseline: None,
            phase: SessionPhase::Unarmed,
        }
    }

    pub fn camera(&self) -> CameraType {
        self.camera
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn offsets(&self) -> &CameraOffsets {
        &self.offsets
    }

    pub fn limits(&self) -> &AxisLimits {
        &self.limits
    }

    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn baseline(&self) -> Option<Translation> {
        self.baseline
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn movement_enabled(&self) -> bool {
        self.config.enable_camera_movement
    }

    /// Point the session at a new address. Re-arming the current address is a no-op.
    pub fn arm(&mut self, address: u64) -> bool {
        if self.address == Some(address)
            && matches!(self.phase, SessionPhase::Armed | SessionPhase::Tracking)
        {
            debug!("{} session already on {:#x}", self.camera, address);
            return false;
        }
        if let Some(old) = self.address {
            info!("{} address changed {:#x} -> {:#x}", self.camera, old, address);
        } else {
            info!("{} address armed at {:#x}", self.camera, address);
        }
        self.address = Some(address);
        self.baseline = None;
        self.phase = SessionPhase::Armed;
        true
    }

    /// Armed -> Tracking, recording the baseline translation.
    pub fn begin_tracking(&mut self, baseline: Option<Translation>) {
        if self.phase != SessionPhase::Armed {
            return;
        }
        if let Some(b) = baseline {
            info!(
                "{} baseline: FB={:.2}, UD={:.2}, LR={:.2}",
                self.camera, b.forward_backward, b.up_down, b.left_right
            );
        }
        self.baseline = baseline;
        self.phase = SessionPhase::Tracking;
    }

    /// Drop the address after a failed write.
    pub fn fault(&mut self) -> Option<u64> {
        let address = self.address.take();
        self.baseline = None;
        self.phase = SessionPhase::Faulted;
        address
    }

    /// Faulted -> Unarmed once the backoff has elapsed.
    pub fn recover(&mut self) {
        if self.phase == SessionPhase::Faulted {
            self.phase = SessionPhase::Unarmed;
        }
    }

    pub fn clear(&mut self) {
        self.address = None;
        self.baseline = None;
        self.phase = SessionPhase::Unarmed;
    }
}
