//! Scanner worker command.

use anyhow::{Context, Result};
use tracing::info;
use trackcam::config::parse_hex_offset;
use trackcam::ipc::{ParentWatch, SignalPaths, StdoutSink};
use trackcam::{CameraType, ProcessHandle, ScanConfig, ScannerWorker};

pub struct ScanArgs {
    pub camera: CameraType,
    pub radius: f32,
    pub aob: Vec<String>,
    pub process_name: String,
    pub max_region_size: u64,
    pub extent_offset: String,
    pub parent_pid: Option<u32>,
}

pub fn run(args: ScanArgs) -> Result<()> {
    let extent_offset = parse_hex_offset(&args.extent_offset)
        .with_context(|| format!("invalid extent offset '{}'", args.extent_offset))?;

    let mut builder = ScanConfig::builder(args.camera)
        .radius(args.radius)
        .process_name(args.process_name)
        .max_region_size(args.max_region_size)
        .extent_offset(extent_offset);
    if !args.aob.is_empty() {
        builder = builder.pattern(args.aob.join(" "));
    }
    let config = builder.build();

    let signals = SignalPaths::new(std::process::id());
    let mut worker = ScannerWorker::new(config, signals, &StdoutSink);
    if let Some(pid) = args.parent_pid {
        worker = worker.parent(ParentWatch::new(pid));
    }

    let exit = worker.run(ProcessHandle::find_and_open)?;
    info!("[{}] Scanner exiting: {:?}", args.camera, exit);
    Ok(())
}
