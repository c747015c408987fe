//! Writer worker command.

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{info, warn};
use trackcam::device::PoseSource;
use trackcam::ipc::{ParentWatch, SignalPaths, StdoutSink, parse_hex_address};
use trackcam::writer::Attach;
use trackcam::{
    CameraConfigSet, CameraType, LiveWriter, NpClient, PoseSample, ProcessHandle,
    ScriptedPoseSource, WriterWorker,
};

pub struct WriteArgs {
    pub config_file: PathBuf,
    pub addresses: [(CameraType, String); 3],
    pub active_camera: CameraType,
    pub process_name: String,
    pub parent_pid: Option<u32>,
    pub dry_run: bool,
}

/// `0` (or anything unparsable) means the camera has no address yet.
fn launch_address(camera: CameraType, text: &str) -> Option<u64> {
    match parse_hex_address(text) {
        Some(0) => None,
        Some(address) => Some(address),
        None => {
            warn!("Ignoring malformed {} address '{}'", camera, text);
            None
        }
    }
}

pub fn run(args: WriteArgs) -> Result<()> {
    let configs = CameraConfigSet::load_or_default(&args.config_file);

    let mut worker = WriterWorker::new(SignalPaths::new(std::process::id()));
    if let Some(pid) = args.parent_pid {
        worker = worker.parent(ParentWatch::new(pid));
    }
    let process = match worker.attach(&args.process_name, ProcessHandle::find_and_open)? {
        Attach::Attached(process) => process,
        Attach::Exited(exit) => {
            info!("Writer exiting before attach: {:?}", exit);
            return Ok(());
        }
    };

    let source: Box<dyn PoseSource> = if args.dry_run {
        info!("Dry run: writing a centred pose");
        Box::new(ScriptedPoseSource::constant(PoseSample::default()))
    } else {
        match NpClient::load() {
            Ok(client) => Box::new(client),
            Err(e) => bail!("TrackIR unavailable: {e}"),
        }
    };

    let mut writer = LiveWriter::new(&process, source, &StdoutSink, &configs, args.active_camera);
    for (camera, text) in &args.addresses {
        if let Some(address) = launch_address(*camera, text) {
            writer.arm(*camera, address);
        }
    }

    let exit = worker.run(&mut writer)?;
    info!("Writer exiting: {:?}", exit);
    Ok(())
}
