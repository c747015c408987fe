//! # trackcam
//!
//! Head-tracking bridge for the Open Rails train simulator.
//!
//! This crate provides:
//! - Wildcard byte-pattern matching over a target process's memory
//! - Camera structure discovery (scan, validate, select) per camera type
//! - A live writer that maps TrackIR head pose onto camera rotation and translation
//! - The controller side: worker supervision over a file and stdout line protocol

pub mod camera;
pub mod config;
pub mod device;
pub mod error;
pub mod ipc;
pub mod memory;
pub mod pattern;
pub mod scan;
pub mod supervisor;
pub mod writer;

pub use camera::CameraType;
pub use config::{
    CameraConfig, CameraConfigSet, CameraOffsets, ControllerConfig, ScanConfig, ScanSettings,
    timing,
};
pub use device::{NpClient, PoseSample, PoseSource, ScriptedPoseSource};
pub use error::{Error, Result};
pub use ipc::{EventSink, SignalPaths, SignalSender, StdoutSink, WorkerEvent};
pub use memory::{
    MemoryRegion, ProcessHandle, QueryRegions, ReadMemory, TargetProcess, WriteMemory,
};
pub use pattern::BytePattern;
pub use scan::{ScanSession, ScannerExit, ScannerWorker, select_address};
pub use supervisor::{
    ControlAction, Controller, ControllerState, WorkerLauncher, WorkerSupervisor,
    check_privileges,
};
pub use writer::{LiveWriter, WriterExit, WriterWorker};
