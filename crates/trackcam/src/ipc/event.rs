//! Line protocol spoken by workers on stdout.
//!
//! Each event is a single prefix-tagged line. Anything else a worker prints
//! is noise to the controller and parses to `None`.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Mutex;

use crate::camera::CameraType;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// `FOUND_PID: <CAMERA>: <pid>`
    PidFound { camera: CameraType, pid: u32 },
    /// `FOUND_ADDRESS: <CAMERA>: <hex>`
    AddressFound { camera: CameraType, address: u64 },
    /// `RAW_DATA_ROT: <CAMERA> Yaw: <f>, Pitch: <f>, Roll: <f>`
    RotationSample {
        camera: CameraType,
        yaw: f32,
        pitch: f32,
        roll: f32,
    },
    /// `RAW_DATA_POS: <CAMERA> X: <f>, Y: <f>, Z: <f>`
    PositionSample {
        camera: CameraType,
        x: f32,
        y: f32,
        z: f32,
    },
    /// `WRITE_ERROR: <hex>`
    WriteError { address: u64 },
}

const FOUND_PID: &str = "FOUND_PID:";
const FOUND_ADDRESS: &str = "FOUND_ADDRESS:";
const RAW_DATA_ROT: &str = "RAW_DATA_ROT:";
const RAW_DATA_POS: &str = "RAW_DATA_POS:";
const WRITE_ERROR: &str = "WRITE_ERROR:";

impl WorkerEvent {
    /// Parse one stdout line. Returns `None` for noise or malformed events.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix(FOUND_PID) {
            let (camera, pid) = split_camera_value(rest)?;
            return Some(Self::PidFound {
                camera,
                pid: pid.parse().ok()?,
            });
        }
        if let Some(rest) = line.strip_prefix(FOUND_ADDRESS) {
            let (camera, address) = split_camera_value(rest)?;
            return Some(Self::AddressFound {
                camera,
                address: parse_hex_address(address)?,
            });
        }
        if let Some(rest) = line.strip_prefix(RAW_DATA_ROT) {
            let (camera, [yaw, pitch, roll]) = parse_sample(rest, ["Yaw", "Pitch", "Roll"])?;
            return Some(Self::RotationSample {
                camera,
                yaw,
                pitch,
                roll,
            });
        }
        if let Some(rest) = line.strip_prefix(RAW_DATA_POS) {
            let (camera, [x, y, z]) = parse_sample(rest, ["X", "Y", "Z"])?;
            return Some(Self::PositionSample { camera, x, y, z });
        }
        if let Some(rest) = line.strip_prefix(WRITE_ERROR) {
            return Some(Self::WriteError {
                address: parse_hex_address(rest)?,
            });
        }
        None
    }
}

impl fmt::Display for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PidFound { camera, pid } => write!(f, "{FOUND_PID} {}: {pid}", camera.tag()),
            Self::AddressFound { camera, address } => {
                write!(f, "{FOUND_ADDRESS} {}: {address:#x}", camera.tag())
            }
            Self::RotationSample {
                camera,
                yaw,
                pitch,
                roll,
            } => write!(
                f,
                "{RAW_DATA_ROT} {} Yaw: {yaw:.2}, Pitch: {pitch:.2}, Roll: {roll:.2}",
                camera.tag()
            ),
            Self::PositionSample { camera, x, y, z } => write!(
                f,
                "{RAW_DATA_POS} {} X: {x:.2}, Y: {y:.2}, Z: {z:.2}",
                camera.tag()
            ),
            Self::WriteError { address } => write!(f, "{WRITE_ERROR} {address:#x}"),
        }
    }
}

/// Parse `0x7ffabc` or `7ffabc`.
pub fn parse_hex_address(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// `" CAB: value"` -> (Cab, "value")
fn split_camera_value(rest: &str) -> Option<(CameraType, &str)> {
    let (camera, value) = rest.split_once(':')?;
    let camera = CameraType::from_str(camera.trim()).ok()?;
    Some((camera, value.trim()))
}

/// `" CAB Yaw: 1.0, Pitch: 2.0, Roll: 3.0"` with the given field labels.
fn parse_sample(rest: &str, labels: [&str; 3]) -> Option<(CameraType, [f32; 3])> {
    let rest = rest.trim_start();
    let (camera, fields) = rest.split_once(char::is_whitespace)?;
    let camera = CameraType::from_str(camera).ok()?;

    let mut values = [0.0f32; 3];
    let mut parts = fields.split(',');
    for (label, slot) in labels.iter().zip(values.iter_mut()) {
        let (name, value) = parts.next()?.split_once(':')?;
        if name.trim() != *label {
            return None;
        }
        *slot = value.trim().parse().ok()?;
    }
    Some((camera, values))
}

/// Destination for worker events.
pub trait EventSink {
    fn emit(&self, event: &WorkerEvent);
}

/// Writes events to stdout, one flushed line each.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &WorkerEvent) {
        let mut out = io::stdout().lock();
        // A closed stdout means the controller is gone; the parent check ends the worker.
        let _ = writeln!(out, "{event}");
        let _ = out.flush();
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<WorkerEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn take(&self) -> Vec<WorkerEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: &WorkerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn emit(&self, event: &WorkerEvent) {
        (**self).emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_found_events() {
        assert_eq!(
            WorkerEvent::parse("FOUND_PID: CAB: 4242"),
            Some(WorkerEvent::PidFound {
                camera: CameraType::Cab,
                pid: 4242
            })
        );
        assert_eq!(
            WorkerEvent::parse("FOUND_ADDRESS: INTERIOR: 0x7ffabc"),
            Some(WorkerEvent::AddressFound {
                camera: CameraType::Interior,
                address: 0x7ffabc
            })
        );
    }

    #[test]
    fn test_parse_write_error() {
        assert_eq!(
            WorkerEvent::parse("WRITE_ERROR: 0x7ffabc\r\n"),
            Some(WorkerEvent::WriteError { address: 0x7ffabc })
        );
        assert_eq!(WorkerEvent::parse("WRITE_ERROR: nope"), None);
    }

    #[test]
    fn test_parse_samples() {
        let rot = WorkerEvent::parse("RAW_DATA_ROT: CAB Yaw: 100.50, Pitch: -20.00, Roll: 0.00");
        assert_eq!(
            rot,
            Some(WorkerEvent::RotationSample {
                camera: CameraType::Cab,
                yaw: 100.5,
                pitch: -20.0,
                roll: 0.0
            })
        );

        let pos = WorkerEvent::parse("RAW_DATA_POS: EXTERNAL X: 1.00, Y: 2.00, Z: -3.00");
        assert_eq!(
            pos,
            Some(WorkerEvent::PositionSample {
                camera: CameraType::External,
                x: 1.0,
                y: 2.0,
                z: -3.0
            })
        );

        assert_eq!(WorkerEvent::parse("RAW_DATA_POS: CAB X: 1.0, Z: 2.0, Y: 3.0"), None);
    }

    #[test]
    fn test_noise_is_ignored() {
        assert_eq!(WorkerEvent::parse("[Scanner-cab] Starting scan"), None);
        assert_eq!(WorkerEvent::parse(""), None);
        assert_eq!(WorkerEvent::parse("FOUND_PID: DRONE: 1"), None);
    }

    #[test]
    fn test_display_parses_back() {
        let events = [
            WorkerEvent::PidFound {
                camera: CameraType::External,
                pid: 7,
            },
            WorkerEvent::AddressFound {
                camera: CameraType::Cab,
                address: 0x1234_5678_9abc,
            },
            WorkerEvent::WriteError { address: 0x7ffabc },
        ];
        for event in events {
            assert_eq!(WorkerEvent::parse(&event.to_string()), Some(event.clone()));
        }
        assert_eq!(
            WorkerEvent::AddressFound {
                camera: CameraType::Cab,
                address: 0x7ffabc
            }
            .to_string(),
            "FOUND_ADDRESS: CAB: 0x7ffabc"
        );
    }

    #[test]
    fn test_event_log_take_drains() {
        let log = EventLog::new();
        log.emit(&WorkerEvent::WriteError { address: 1 });
        assert_eq!(log.take().len(), 1);
        assert!(log.events().is_empty());
    }
}
