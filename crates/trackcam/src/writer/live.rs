//! Per-cycle pose writer.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::camera::CameraType;
use crate::config::{CameraConfigSet, CameraOffsets, timing};
use crate::device::{PoseSample, PoseSource};
use crate::error::Result;
use crate::ipc::{EventSink, WorkerEvent, WriterSignals};
use crate::memory::{ReadMemory, WriteMemory};
use crate::writer::session::{CameraSession, SessionPhase};
use crate::writer::transform::{Translation, rotation, translation};

/// What one call to [`LiveWriter::cycle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Active camera has no address; memory untouched.
    Idle,
    /// Device returned no sample.
    NoSample,
    Wrote,
    /// A write failed and the address was dropped.
    Faulted { address: u64 },
    /// Waiting out the pause after a fault.
    BackingOff,
}

impl CycleOutcome {
    pub fn wrote(&self) -> bool {
        matches!(self, Self::Wrote)
    }
}

/// Owns every camera session and applies pose samples to the active one.
pub struct LiveWriter<'a, M, P, S>
where
    M: ReadMemory + WriteMemory + ?Sized,
    P: PoseSource,
    S: EventSink + ?Sized,
{
    memory: &'a M,
    source: P,
    sink: &'a S,
    sessions: BTreeMap<CameraType, CameraSession>,
    active: CameraType,
    telemetry_interval: Duration,
    heartbeat_interval: Duration,
    fault_backoff: Duration,
    last_telemetry: Option<Instant>,
    last_heartbeat: Option<Instant>,
    backoff_until: Option<Instant>,
    writes: u64,
}

impl<'a, M, P, S> LiveWriter<'a, M, P, S>
where
    M: ReadMemory + WriteMemory + ?Sized,
    P: PoseSource,
    S: EventSink + ?Sized,
{
    pub fn new(
        memory: &'a M,
        source: P,
        sink: &'a S,
        configs: &CameraConfigSet,
        active: CameraType,
    ) -> Self {
        let sessions = CameraType::ALL
            .iter()
            .map(|&camera| (camera, CameraSession::new(camera, configs.get(camera))))
            .collect();
        Self {
            memory,
            source,
            sink,
            sessions,
            active,
            telemetry_interval: Duration::from_millis(timing::TELEMETRY_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(timing::WRITER_HEARTBEAT_MS),
            fault_backoff: Duration::from_millis(timing::FAULT_BACKOFF_MS),
            last_telemetry: None,
            last_heartbeat: None,
            backoff_until: None,
            writes: 0,
        }
    }

    pub fn telemetry_interval(mut self, interval: Duration) -> Self {
        self.telemetry_interval = interval;
        self
    }

    pub fn fault_backoff(mut self, backoff: Duration) -> Self {
        self.fault_backoff = backoff;
        self
    }

    pub fn memory(&self) -> &'a M {
        self.memory
    }

    pub fn active_camera(&self) -> CameraType {
        self.active
    }

    pub fn session(&self, camera: CameraType) -> Option<&CameraSession> {
        self.sessions.get(&camera)
    }

    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn start(&mut self) -> Result<()> {
        self.source.start()
    }

    pub fn stop(&mut self) {
        self.source.stop();
    }

    /// Point `camera` at `address`; other cameras are untouched.
    pub fn arm(&mut self, camera: CameraType, address: u64) {
        if let Some(session) = self.sessions.get_mut(&camera) {
            session.arm(address);
        }
    }

    pub fn set_active_camera(&mut self, camera: CameraType) {
        if self.active != camera {
            info!("Active camera: {} -> {}", self.active, camera);
            self.active = camera;
        }
    }

    /// Apply polled side-channel messages (shutdown is left to the caller).
    pub fn apply_signals(&mut self, signals: &WriterSignals) {
        if let Some((camera, address)) = signals.address_update {
            info!("Address update for {}: {:#x}", camera, address);
            self.arm(camera, address);
        }
        if let Some(camera) = signals.active_camera {
            self.set_active_camera(camera);
        }
    }

    /// Run one write cycle at time `now`.
    pub fn cycle(&mut self, now: Instant) -> CycleOutcome {
        if let Some(until) = self.backoff_until {
            if now < until {
                return CycleOutcome::BackingOff;
            }
            self.backoff_until = None;
            for session in self.sessions.values_mut() {
                session.recover();
            }
        }

        let active = self.active;
        let armed = self.sessions.get(&active).and_then(|s| s.address());
        let Some(address) = armed else {
            self.heartbeat(now, None);
            return CycleOutcome::Idle;
        };

        let Some(sample) = self.source.latest() else {
            return CycleOutcome::NoSample;
        };
        self.telemetry(now, &sample);

        let Some(session) = self.sessions.get_mut(&active) else {
            return CycleOutcome::Idle;
        };

        if session.phase() == SessionPhase::Armed {
            let baseline = session
                .movement_enabled()
                .then(|| read_baseline(self.memory, address, session.offsets()));
            session.begin_tracking(baseline);
        }

        match write_pose(self.memory, session, address, &sample) {
            Ok(()) => {
                self.writes += 1;
                self.heartbeat(now, Some(address));
                CycleOutcome::Wrote
            }
            Err(e) => {
                warn!("Write to {} camera at {:#x} failed: {}", active, address, e);
                session.fault();
                self.sink.emit(&WorkerEvent::WriteError { address });
                self.backoff_until = Some(now + self.fault_backoff);
                CycleOutcome::Faulted { address }
            }
        }
    }

    fn telemetry(&mut self, now: Instant, sample: &PoseSample) {
        if let Some(last) = self.last_telemetry
            && now.duration_since(last) < self.telemetry_interval
        {
            return;
        }
        self.last_telemetry = Some(now);
        self.sink.emit(&WorkerEvent::RotationSample {
            camera: self.active,
            yaw: sample.yaw,
            pitch: sample.pitch,
            roll: sample.roll,
        });
        self.sink.emit(&WorkerEvent::PositionSample {
            camera: self.active,
            x: sample.x,
            y: sample.y,
            z: sample.z,
        });
    }

    fn heartbeat(&mut self, now: Instant, address: Option<u64>) {
        let due = self
            .last_heartbeat
            .is_none_or(|last| now.duration_since(last) >= self.heartbeat_interval);
        if !due {
            return;
        }
        self.last_heartbeat = Some(now);
        match address {
            Some(address) => info!(
                "Heartbeat: {} camera at {:#x}, {} cycles written",
                self.active, address, self.writes
            ),
            None => info!("Heartbeat: {} camera has no address, idle", self.active),
        }
    }
}

/// Read the current translation, substituting 0.0 for unreadable axes.
fn read_baseline<M: ReadMemory + ?Sized>(
    memory: &M,
    address: u64,
    offsets: &CameraOffsets,
) -> Translation {
    let read = |offset: u64, axis: &str| match memory.read_f32(address + offset) {
        Ok(value) => value,
        Err(e) => {
            debug!("Baseline {} unreadable at {:#x}: {}", axis, address + offset, e);
            0.0
        }
    };
    Translation {
        forward_backward: read(offsets.forward_backward, "forward/backward"),
        up_down: read(offsets.up_down, "up/down"),
        left_right: read(offsets.left_right, "left/right"),
    }
}

fn write_pose<M: WriteMemory + ?Sized>(
    memory: &M,
    session: &CameraSession,
    address: u64,
    sample: &PoseSample,
) -> Result<()> {
    let offsets = session.offsets();
    let r = rotation(sample, session.limits());
    memory.write_f32(address + offsets.yaw, r.yaw)?;
    memory.write_f32(address + offsets.pitch, r.pitch)?;

    if session.movement_enabled() {
        let target = session
            .baseline()
            .unwrap_or_default()
            .offset_by(translation(sample, session.limits()));
        memory.write_f32(address + offsets.forward_backward, target.forward_backward)?;
        memory.write_f32(address + offsets.up_down, target.up_down)?;
        memory.write_f32(address + offsets.left_right, target.left_right)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::device::ScriptedPoseSource;
    use crate::ipc::EventLog;
    use crate::memory::mock::{MockMemory, MockMemoryBuilder};
    use crate::writer::transform::FULL_SCALE;

    const CAM: u64 = 0x10000;

    fn memory() -> MockMemory {
        let mut data = vec![0u8; 0x200];
        // Existing translation at the default offsets.
        data[0x6C..0x70].copy_from_slice(&5.0f32.to_le_bytes());
        data[0x68..0x6C].copy_from_slice(&1.0f32.to_le_bytes());
        data[0x64..0x68].copy_from_slice(&(-2.0f32).to_le_bytes());
        MockMemoryBuilder::new().region(CAM, data).build()
    }

    fn configs(movement: bool) -> CameraConfigSet {
        let mut set = CameraConfigSet::default();
        set.set(
            CameraType::Cab,
            CameraConfig {
                enable_camera_movement: movement,
                ..Default::default()
            },
        );
        set
    }

    fn full_right() -> ScriptedPoseSource {
        ScriptedPoseSource::constant(
            PoseSample::rotation(FULL_SCALE, -FULL_SCALE, 0.0).with_position(0.0, 0.0, 0.0),
        )
    }

    #[test]
    fn test_idle_without_address_touches_nothing() {
        let mem = memory();
        let log = EventLog::new();
        let mut writer = LiveWriter::new(&mem, full_right(), &log, &configs(false), CameraType::Cab);
        writer.start().unwrap();

        assert_eq!(writer.cycle(Instant::now()), CycleOutcome::Idle);
        assert!(mem.writes().is_empty());
        assert!(mem.reads().is_empty());
    }

    #[test]
    fn test_writes_scaled_rotation() {
        let mem = memory();
        let log = EventLog::new();
        let mut writer = LiveWriter::new(&mem, full_right(), &log, &configs(false), CameraType::Cab);
        writer.start().unwrap();
        writer.arm(CameraType::Cab, CAM);

        assert_eq!(writer.cycle(Instant::now()), CycleOutcome::Wrote);
        assert_eq!(mem.last_f32_at(CAM + 0xC), Some(-2.7));
        assert_eq!(mem.last_f32_at(CAM), Some(-1.5));
        // Translation disabled: no writes at the translation offsets.
        assert_eq!(mem.write_count_at(CAM + 0x6C), 0);
    }

    #[test]
    fn test_baseline_captured_once_and_stable() {
        let mem = memory();
        let log = EventLog::new();
        let source = ScriptedPoseSource::new(vec![
            PoseSample::default().with_position(0.0, 0.0, -FULL_SCALE),
            PoseSample::default().with_position(0.0, 0.0, 0.0),
        ]);
        let mut writer = LiveWriter::new(&mem, source, &log, &configs(true), CameraType::Cab);
        writer.start().unwrap();
        writer.arm(CameraType::Cab, CAM);

        let now = Instant::now();
        writer.cycle(now);
        // Full forward lean: baseline 5.0 + 0.6.
        let fb = mem.last_f32_at(CAM + 0x6C).unwrap();
        assert!((fb - 5.6).abs() < 1e-5);
        assert_eq!(mem.last_f32_at(CAM + 0x68), Some(1.0));
        assert_eq!(mem.last_f32_at(CAM + 0x64), Some(-2.0));

        // Memory now holds 5.6, but the baseline must stay at 5.0.
        writer.cycle(now + Duration::from_millis(10));
        assert_eq!(mem.last_f32_at(CAM + 0x6C), Some(5.0));
        writer.cycle(now + Duration::from_millis(20));
        assert_eq!(mem.last_f32_at(CAM + 0x6C), Some(5.0));

        let baseline_reads = mem
            .reads()
            .iter()
            .filter(|(addr, _)| *addr == CAM + 0x6C)
            .count();
        assert_eq!(baseline_reads, 1);
    }

    #[test]
    fn test_unreadable_baseline_defaults_to_zero() {
        let mem = MockMemoryBuilder::new()
            .region(CAM, vec![0u8; 0x200])
            .unreadable(CAM)
            .build();
        let log = EventLog::new();
        let source = ScriptedPoseSource::constant(
            PoseSample::default().with_position(0.0, 0.0, -FULL_SCALE),
        );
        let mut writer = LiveWriter::new(&mem, source, &log, &configs(true), CameraType::Cab);
        writer.start().unwrap();
        writer.arm(CameraType::Cab, CAM);

        assert_eq!(writer.cycle(Instant::now()), CycleOutcome::Wrote);
        assert_eq!(
            writer.session(CameraType::Cab).unwrap().baseline(),
            Some(Translation::default())
        );
        assert_eq!(mem.last_f32_at(CAM + 0x6C), Some(0.6));
    }

    #[test]
    fn test_write_failure_faults_and_reports() {
        let mem = memory();
        mem.fail_writes_at(CAM + 0xC);
        let log = EventLog::new();
        let mut writer = LiveWriter::new(&mem, full_right(), &log, &configs(false), CameraType::Cab)
            .fault_backoff(Duration::from_millis(1000));
        writer.start().unwrap();
        writer.arm(CameraType::Cab, CAM);

        let now = Instant::now();
        assert_eq!(writer.cycle(now), CycleOutcome::Faulted { address: CAM });
        assert!(
            log.events()
                .contains(&WorkerEvent::WriteError { address: CAM })
        );
        assert_eq!(
            writer.session(CameraType::Cab).unwrap().phase(),
            SessionPhase::Faulted
        );

        assert_eq!(
            writer.cycle(now + Duration::from_millis(500)),
            CycleOutcome::BackingOff
        );
        assert_eq!(
            writer.cycle(now + Duration::from_millis(1500)),
            CycleOutcome::Idle
        );
        assert_eq!(
            writer.session(CameraType::Cab).unwrap().phase(),
            SessionPhase::Unarmed
        );
    }

    #[test]
    fn test_camera_switch_keeps_other_sessions() {
        let mem = memory();
        let log = EventLog::new();
        let mut writer = LiveWriter::new(&mem, full_right(), &log, &configs(false), CameraType::Cab);
        writer.start().unwrap();
        writer.apply_signals(&WriterSignals {
            address_update: Some((CameraType::Cab, CAM)),
            active_camera: Some(CameraType::External),
            shutdown: false,
        });

        assert_eq!(writer.active_camera(), CameraType::External);
        assert_eq!(writer.cycle(Instant::now()), CycleOutcome::Idle);
        assert_eq!(writer.session(CameraType::Cab).unwrap().address(), Some(CAM));

        writer.set_active_camera(CameraType::Cab);
        assert_eq!(writer.cycle(Instant::now()), CycleOutcome::Wrote);
    }

    #[test]
    fn test_telemetry_is_throttled() {
        let mem = memory();
        let log = EventLog::new();
        let mut writer = LiveWriter::new(&mem, full_right(), &log, &configs(false), CameraType::Cab)
            .telemetry_interval(Duration::from_millis(100));
        writer.start().unwrap();
        writer.arm(CameraType::Cab, CAM);

        let now = Instant::now();
        for ms in [0u64, 10, 20, 50, 99, 100, 150] {
            writer.cycle(now + Duration::from_millis(ms));
        }
        let rotations = log
            .events()
            .iter()
            .filter(|e| matches!(e, WorkerEvent::RotationSample { .. }))
            .count();
        assert_eq!(rotations, 2);
        assert_eq!(
            log.events()[0],
            WorkerEvent::RotationSample {
                camera: CameraType::Cab,
                yaw: FULL_SCALE,
                pitch: -FULL_SCALE,
                roll: 0.0
            }
        );
    }
}
