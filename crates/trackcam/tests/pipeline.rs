//! Scanner, controller state and writer wired together in one process.

use std::time::{Duration, Instant};

use trackcam::config::CameraConfig;
use trackcam::ipc::{EventLog, WorkerEvent, WriterSignals};
use trackcam::memory::mock::MockMemoryBuilder;
use trackcam::supervisor::{ControlAction, ControllerState};
use trackcam::writer::{CycleOutcome, FULL_SCALE};
use trackcam::{
    CameraConfigSet, CameraType, LiveWriter, PoseSample, ScanConfig, ScanSession,
    ScriptedPoseSource, SignalPaths, SignalSender, select_address,
};

const MARKER: [u8; 6] = [0x6D, 0x40, 0x00, 0x00, 0x3B, 0x81];

fn place_camera(data: &mut [u8], at: usize, extent: f32) {
    data[at..at + MARKER.len()].copy_from_slice(&MARKER);
    data[at + 0x34..at + 0x38].copy_from_slice(&extent.to_le_bytes());
}

fn scan_config(camera: CameraType) -> ScanConfig {
    ScanConfig::builder(camera)
        .pattern("6D 40 ?? ?? 3B 81")
        .radius(10.0)
        .build()
}

#[test]
fn test_selection_rules() {
    let three = [0x300, 0x100, 0x200];
    assert_eq!(select_address(CameraType::Cab, &three), Some(0x300));
    assert_eq!(select_address(CameraType::Interior, &three), Some(0x200));
    assert_eq!(
        select_address(CameraType::External, &[0x200, 0x100]),
        Some(0x100)
    );
    assert_eq!(select_address(CameraType::Interior, &[0x500]), Some(0x500));
    assert_eq!(select_address(CameraType::Cab, &[]), None);
}

#[test]
fn test_scan_to_writer_handoff() {
    let mut data = vec![0u8; 0x2000];
    place_camera(&mut data, 0x400, 3.0);
    place_camera(&mut data, 0x800, 99.0);
    place_camera(&mut data, 0xC00, 4.0);
    let memory = MockMemoryBuilder::new()
        .pid(900)
        .region(0x40_0000, data)
        .build();

    // Scanner pass.
    let scan_log = EventLog::new();
    let config = scan_config(CameraType::Cab);
    let outcome = ScanSession::new(&config, &scan_log).run(&memory);
    assert_eq!(outcome.selected, Some(0x40_0C00));

    // Controller consumes the scanner's lines, acting on each as it arrives.
    let mut state = ControllerState::new();
    let mut launch = None;
    let mut updates = Vec::new();
    for event in scan_log.events() {
        let parsed = WorkerEvent::parse(&event.to_string()).unwrap();
        for action in state.handle_event(&parsed) {
            match action {
                ControlAction::StartWriter { addresses, active } => {
                    state.writer_started();
                    launch = Some((addresses, active));
                }
                ControlAction::SendAddress { camera, address } => updates.push((camera, address)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
    let (addresses, active) = launch.expect("writer should start on the first CAB address");
    assert_eq!(addresses.get(&CameraType::Cab), Some(&0x40_0400));
    assert_eq!(updates, vec![(CameraType::Cab, 0x40_0C00)]);
    assert_eq!(state.active_address(CameraType::Cab), Some(0x40_0C00));

    // Writer arms from the launch arguments, then takes the forwarded update.
    let writer_log = EventLog::new();
    let source = ScriptedPoseSource::constant(PoseSample::rotation(FULL_SCALE, 0.0, 0.0));
    let mut writer = LiveWriter::new(
        &memory,
        source,
        &writer_log,
        &CameraConfigSet::default(),
        active,
    );
    writer.start().unwrap();
    for (camera, address) in addresses {
        writer.arm(camera, address);
    }
    for (camera, address) in updates {
        writer.arm(camera, address);
    }

    assert_eq!(writer.cycle(Instant::now()), CycleOutcome::Wrote);
    assert_eq!(memory.last_f32_at(0x40_0C00 + 0xC), Some(-2.7));
}

#[test]
fn test_write_error_invalidates_address_for_good() {
    let memory = MockMemoryBuilder::new()
        .region(0x7f_f000, vec![0u8; 0x2000])
        .build();
    memory.fail_writes_at(0x7ffabc + 0xC);

    let mut state = ControllerState::new();
    let first = WorkerEvent::parse("FOUND_ADDRESS: CAB: 0x7ffabc").unwrap();
    let actions = state.handle_event(&first);
    assert!(matches!(actions[..], [ControlAction::StartWriter { .. }]));
    state.writer_started();

    let log = EventLog::new();
    let mut writer = LiveWriter::new(
        &memory,
        ScriptedPoseSource::constant(PoseSample::rotation(100.0, 0.0, 0.0)),
        &log,
        &CameraConfigSet::default(),
        CameraType::Cab,
    );
    writer.start().unwrap();
    writer.arm(CameraType::Cab, 0x7ffabc);
    assert_eq!(
        writer.cycle(Instant::now()),
        CycleOutcome::Faulted { address: 0x7ffabc }
    );

    let error_line = log
        .events()
        .into_iter()
        .find(|e| matches!(e, WorkerEvent::WriteError { .. }))
        .unwrap()
        .to_string();
    assert_eq!(error_line, "WRITE_ERROR: 0x7ffabc");

    let actions = state.handle_event(&WorkerEvent::parse(&error_line).unwrap());
    assert_eq!(actions, vec![ControlAction::RequestRescan(CameraType::Cab)]);
    assert_eq!(state.active_address(CameraType::Cab), None);

    // The rescan finds the same structure again; it is never handed back.
    let again = WorkerEvent::parse("FOUND_ADDRESS: CAB: 0x7ffabc").unwrap();
    assert!(state.handle_event(&again).is_empty());
    assert_eq!(state.active_address(CameraType::Cab), None);
}

#[test]
fn test_baseline_survives_many_cycles() {
    let cam = 0x9000u64;
    let mut data = vec![0u8; 0x100];
    data[0x6C..0x70].copy_from_slice(&10.0f32.to_le_bytes());
    data[0x68..0x6C].copy_from_slice(&20.0f32.to_le_bytes());
    data[0x64..0x68].copy_from_slice(&30.0f32.to_le_bytes());
    let memory = MockMemoryBuilder::new().region(cam, data).build();

    let mut configs = CameraConfigSet::default();
    configs.set(
        CameraType::Cab,
        CameraConfig {
            enable_camera_movement: true,
            ..Default::default()
        },
    );
    let log = EventLog::new();
    let lean = PoseSample::default().with_position(-FULL_SCALE, FULL_SCALE, -FULL_SCALE);
    let mut writer = LiveWriter::new(
        &memory,
        ScriptedPoseSource::constant(lean),
        &log,
        &configs,
        CameraType::Cab,
    );
    writer.start().unwrap();
    writer.arm(CameraType::Cab, cam);

    let start = Instant::now();
    for i in 0..50u64 {
        writer.cycle(start + Duration::from_millis(i * 10));
        let fb = memory.last_f32_at(cam + 0x6C).unwrap();
        let ud = memory.last_f32_at(cam + 0x68).unwrap();
        let lr = memory.last_f32_at(cam + 0x64).unwrap();
        assert!((fb - 10.6).abs() < 1e-4, "cycle {i}: fb {fb}");
        assert!((ud - 20.5).abs() < 1e-4, "cycle {i}: ud {ud}");
        assert!((lr - 30.6).abs() < 1e-4, "cycle {i}: lr {lr}");
    }

    // Re-sending the same address must not recapture the drifted values.
    writer.apply_signals(&WriterSignals {
        address_update: Some((CameraType::Cab, cam)),
        ..Default::default()
    });
    writer.cycle(start + Duration::from_secs(1));
    let fb = memory.last_f32_at(cam + 0x6C).unwrap();
    assert!((fb - 10.6).abs() < 1e-4);
}

#[test]
fn test_side_channel_messages_are_consumed_once() {
    let dir = tempfile::tempdir().unwrap();
    let paths = SignalPaths::in_dir(dir.path(), 31337);
    let sender = SignalSender::new(paths.clone());

    // Nothing pending: polling is harmless.
    assert!(WriterSignals::poll(&paths).is_empty());

    sender.address_update(CameraType::External, 0xABC0).unwrap();
    sender.address_update(CameraType::External, 0xDEF0).unwrap();
    sender.active_camera(CameraType::External).unwrap();

    let signals = WriterSignals::poll(&paths);
    assert_eq!(signals.address_update, Some((CameraType::External, 0xDEF0)));
    assert_eq!(signals.active_camera, Some(CameraType::External));
    assert!(!signals.shutdown);

    assert!(WriterSignals::poll(&paths).is_empty());

    sender.writer_shutdown().unwrap();
    assert!(WriterSignals::poll(&paths).shutdown);
    assert!(!WriterSignals::poll(&paths).shutdown);
}
