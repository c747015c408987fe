//! Controller bookkeeping, kept free of process handles.
//!
//! Worker events go in, [`ControlAction`]s come out; the supervisor carries
//! the actions out against the real worker processes.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::camera::CameraType;
use crate::ipc::WorkerEvent;

/// Discovered addresses for one camera. Index 0 is the active address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    addresses: Vec<u64>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn active(&self) -> Option<u64> {
        self.addresses.first().copied()
    }

    pub fn contains(&self, address: u64) -> bool {
        self.addresses.contains(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.addresses.iter().copied()
    }

    /// Append an unseen address. Returns false if it was already present.
    pub fn push(&mut self, address: u64) -> bool {
        if self.contains(address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    /// Move a known address to the front. Returns false if it is unknown.
    pub fn promote(&mut self, address: u64) -> bool {
        let Some(index) = self.addresses.iter().position(|&a| a == address) else {
            return false;
        };
        let address = self.addresses.remove(index);
        self.addresses.insert(0, address);
        true
    }

    /// Send the active address to the back and return the new active one.
    pub fn rotate(&mut self) -> Option<u64> {
        if self.addresses.len() > 1 {
            self.addresses.rotate_left(1);
        }
        self.active()
    }

    pub fn remove(&mut self, address: u64) -> bool {
        let before = self.addresses.len();
        self.addresses.retain(|&a| a != address);
        self.addresses.len() != before
    }

    pub fn clear(&mut self) {
        self.addresses.clear();
    }
}

/// Side effect requested by the controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    StartWriter {
        addresses: BTreeMap<CameraType, u64>,
        active: CameraType,
    },
    SendAddress {
        camera: CameraType,
        address: u64,
    },
    SendActiveCamera(CameraType),
    RequestRescan(CameraType),
    StopAllWorkers,
}

/// Latest telemetry relayed by the writer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone)]
pub struct ControllerState {
    game_pid: Option<u32>,
    sets: BTreeMap<CameraType, AddressSet>,
    invalidated: HashSet<u64>,
    writer_running: bool,
    active_camera: CameraType,
    telemetry: Telemetry,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            game_pid: None,
            sets: CameraType::ALL
                .iter()
                .map(|&camera| (camera, AddressSet::new()))
                .collect(),
            invalidated: HashSet::new(),
            writer_running: false,
            active_camera: CameraType::Cab,
            telemetry: Telemetry::default(),
        }
    }

    pub fn game_pid(&self) -> Option<u32> {
        self.game_pid
    }

    pub fn addresses(&self, camera: CameraType) -> Option<&AddressSet> {
        self.sets.get(&camera)
    }

    pub fn active_address(&self, camera: CameraType) -> Option<u64> {
        self.sets.get(&camera).and_then(AddressSet::active)
    }

    /// Active address of every camera that has one.
    pub fn active_addresses(&self) -> BTreeMap<CameraType, u64> {
        self.sets
            .iter()
            .filter_map(|(&camera, set)| set.active().map(|a| (camera, a)))
            .collect()
    }

    pub fn is_invalidated(&self, address: u64) -> bool {
        self.invalidated.contains(&address)
    }

    pub fn writer_running(&self) -> bool {
        self.writer_running
    }

    pub fn active_camera(&self) -> CameraType {
        self.active_camera
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    pub fn writer_started(&mut self) {
        self.writer_running = true;
    }

    pub fn writer_stopped(&mut self) {
        self.writer_running = false;
    }

    pub fn handle_event(&mut self, event: &WorkerEvent) -> Vec<ControlAction> {
        match *event {
            WorkerEvent::PidFound { camera, pid } => {
                self.pid_found(camera, pid);
                Vec::new()
            }
            WorkerEvent::AddressFound { camera, address } => self.address_found(camera, address),
            WorkerEvent::WriteError { address } => self.write_error(address),
            WorkerEvent::RotationSample {
                yaw, pitch, roll, ..
            } => {
                self.telemetry.yaw = yaw;
                self.telemetry.pitch = pitch;
                self.telemetry.roll = roll;
                Vec::new()
            }
            WorkerEvent::PositionSample { x, y, z, .. } => {
                self.telemetry.x = x;
                self.telemetry.y = y;
                self.telemetry.z = z;
                Vec::new()
            }
        }
    }

    fn pid_found(&mut self, camera: CameraType, pid: u32) {
        match self.game_pid {
            Some(known) if known == pid => {}
            Some(known) => {
                info!(
                    "[{}] Game pid changed {} -> {}, clearing addresses",
                    camera, known, pid
                );
                self.clear_addresses();
                self.game_pid = Some(pid);
            }
            None => {
                info!("[{}] Game pid {}", camera, pid);
                self.game_pid = Some(pid);
            }
        }
    }

    fn address_found(&mut self, camera: CameraType, address: u64) -> Vec<ControlAction> {
        if self.invalidated.contains(&address) {
            debug!("[{}] Ignoring invalidated address {:#x}", camera, address);
            return Vec::new();
        }
        let Some(set) = self.sets.get_mut(&camera) else {
            return Vec::new();
        };

        let before = set.active();
        if set.push(address) {
            info!("[{}] Address {:#x} ({} known)", camera, address, set.len());
        } else {
            set.promote(address);
        }
        let after = set.active();

        let mut actions = Vec::new();
        if after != before
            && let Some(active) = after
        {
            if self.writer_running {
                actions.push(ControlAction::SendAddress {
                    camera,
                    address: active,
                });
            } else if camera == CameraType::Cab {
                actions.push(ControlAction::StartWriter {
                    addresses: self.active_addresses(),
                    active: self.active_camera,
                });
            }
        }
        actions
    }

    fn write_error(&mut self, address: u64) -> Vec<ControlAction> {
        self.invalidated.insert(address);
        let owner = self
            .sets
            .iter_mut()
            .find(|(_, set)| set.contains(address))
            .map(|(&camera, set)| {
                set.remove(address);
                (camera, set.active())
            });

        let Some((camera, next)) = owner else {
            warn!("Write error at unknown address {:#x}", address);
            return Vec::new();
        };
        warn!("[{}] Address {:#x} invalidated, requesting rescan", camera, address);

        let mut actions = vec![ControlAction::RequestRescan(camera)];
        if let Some(next) = next
            && self.writer_running
        {
            info!("[{}] Falling back to {:#x}", camera, next);
            actions.push(ControlAction::SendAddress {
                camera,
                address: next,
            });
        }
        actions
    }

    /// Try the next known address for `camera`.
    pub fn cycle_address(&mut self, camera: CameraType) -> Vec<ControlAction> {
        let Some(set) = self.sets.get_mut(&camera) else {
            return Vec::new();
        };
        if set.len() < 2 {
            info!("[{}] Only {} address(es) known, nothing to cycle", camera, set.len());
            return Vec::new();
        }
        let before = set.active();
        let next = set.rotate();
        match (before, next) {
            (Some(from), Some(to)) if self.writer_running => {
                info!("[{}] Switching {:#x} -> {:#x}", camera, from, to);
                vec![ControlAction::SendAddress {
                    camera,
                    address: to,
                }]
            }
            _ => Vec::new(),
        }
    }

    pub fn set_active_camera(&mut self, camera: CameraType) -> Vec<ControlAction> {
        if self.active_camera == camera {
            return Vec::new();
        }
        info!("Active camera -> {}", camera);
        self.active_camera = camera;
        if self.writer_running {
            vec![ControlAction::SendActiveCamera(camera)]
        } else {
            Vec::new()
        }
    }

    pub fn request_rescan(&self, camera: CameraType) -> Vec<ControlAction> {
        vec![ControlAction::RequestRescan(camera)]
    }

    /// The game process is gone: stop everything and forget its addresses.
    pub fn target_lost(&mut self) -> Vec<ControlAction> {
        if let Some(pid) = self.game_pid.take() {
            info!("Game process {} exited", pid);
        }
        self.clear_addresses();
        self.writer_running = false;
        vec![ControlAction::StopAllWorkers]
    }

    fn clear_addresses(&mut self) {
        for set in self.sets.values_mut() {
            set.clear();
        }
        self.invalidated.clear();
    }
}
