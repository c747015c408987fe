//! Filesystem side-channel between the controller and its workers.
//!
//! Every file is scoped by the worker's process ID and lives in a shared
//! directory (the system temp dir by default). The controller publishes with
//! write-to-temp + rename so a file is either absent or complete. Workers
//! consume by renaming the file to a private claim name before reading it, so
//! a message is delivered exactly once even if the controller republishes
//! while the worker is polling.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::camera::CameraType;
use crate::config::write_atomic;
use crate::error::Result;
use crate::ipc::event::parse_hex_address;

/// Paths of the signal files for one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalPaths {
    dir: PathBuf,
    pid: u32,
}

impl SignalPaths {
    /// Signal paths in the system temp directory.
    pub fn new(pid: u32) -> Self {
        Self::in_dir(env::temp_dir(), pid)
    }

    pub fn in_dir<P: Into<PathBuf>>(dir: P, pid: u32) -> Self {
        Self {
            dir: dir.into(),
            pid,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn writer_shutdown(&self) -> PathBuf {
        self.dir
            .join(format!("trackcam_writer_shutdown_{}.flag", self.pid))
    }

    pub fn scanner_shutdown(&self, camera: CameraType) -> PathBuf {
        self.dir.join(format!(
            "trackcam_scanner_{}_shutdown_{}.flag",
            camera.name(),
            self.pid
        ))
    }

    pub fn scanner_rescan(&self, camera: CameraType) -> PathBuf {
        self.dir.join(format!(
            "trackcam_scanner_{}_rescan_{}.flag",
            camera.name(),
            self.pid
        ))
    }

    pub fn address_update(&self) -> PathBuf {
        self.dir
            .join(format!("trackcam_address_update_{}.dat", self.pid))
    }

    pub fn active_camera(&self) -> PathBuf {
        self.dir
            .join(format!("trackcam_active_camera_{}.dat", self.pid))
    }

    /// Every file this worker could be signalled through.
    pub fn all(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            self.writer_shutdown(),
            self.address_update(),
            self.active_camera(),
        ];
        for camera in CameraType::ALL {
            paths.push(self.scanner_shutdown(camera));
            paths.push(self.scanner_rescan(camera));
        }
        paths
    }

    /// Remove leftovers from a previous process with the same pid.
    pub fn clear(&self) {
        for path in self.all() {
            remove_if_exists(&path);
        }
    }
}

/// Path of the controller's camera configuration blob.
pub fn config_blob_path(dir: &Path, controller_pid: u32) -> PathBuf {
    dir.join(format!("trackcam_config_{controller_pid}.json"))
}

/// Atomically claim and read a signal file. `Ok(None)` if absent.
pub fn take_message(path: &Path) -> io::Result<Option<String>> {
    let mut claim = path.as_os_str().to_owned();
    claim.push(".claimed");
    let claim = PathBuf::from(claim);

    match fs::rename(path, &claim) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }

    let content = fs::read_to_string(&claim);
    remove_if_exists(&claim);
    content.map(Some)
}

/// Consume a marker file. Returns whether it was present.
pub fn take_marker(path: &Path) -> bool {
    match take_message(path) {
        Ok(found) => found.is_some(),
        Err(e) => {
            warn!("Failed to consume marker {:?}: {}", path, e);
            // Unreadable but present still counts as the signal.
            path.exists()
        }
    }
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}

/// Parse an address update line `<camera>:<hex>`.
pub fn parse_address_update(text: &str) -> Option<(CameraType, u64)> {
    let (camera, address) = text.trim().split_once(':')?;
    let camera = CameraType::from_str(camera.trim()).ok()?;
    Some((camera, parse_hex_address(address)?))
}

/// Messages the writer can receive in one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterSignals {
    pub shutdown: bool,
    pub address_update: Option<(CameraType, u64)>,
    pub active_camera: Option<CameraType>,
}

impl WriterSignals {
    /// Consume every pending writer signal.
    pub fn poll(paths: &SignalPaths) -> Self {
        let shutdown = take_marker(&paths.writer_shutdown());

        let address_update = match take_message(&paths.address_update()) {
            Ok(Some(text)) => {
                let parsed = parse_address_update(&text);
                if parsed.is_none() {
                    warn!("Ignoring malformed address update '{}'", text.trim());
                }
                parsed
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read address update: {}", e);
                None
            }
        };

        let active_camera = match take_message(&paths.active_camera()) {
            Ok(Some(text)) => {
                let parsed = CameraType::from_str(text.trim()).ok();
                if parsed.is_none() {
                    warn!("Ignoring unknown active camera '{}'", text.trim());
                }
                parsed
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read active camera: {}", e);
                None
            }
        };

        Self {
            shutdown,
            address_update,
            active_camera,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Messages a scanner can receive in one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScannerSignals {
    pub shutdown: bool,
    pub rescan: bool,
}

impl ScannerSignals {
    pub fn poll(paths: &SignalPaths, camera: CameraType) -> Self {
        Self {
            shutdown: take_marker(&paths.scanner_shutdown(camera)),
            rescan: take_marker(&paths.scanner_rescan(camera)),
        }
    }
}

/// Controller-side publisher for one worker's signals.
#[derive(Debug, Clone)]
pub struct SignalSender {
    paths: SignalPaths,
}

impl SignalSender {
    pub fn new(paths: SignalPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SignalPaths {
        &self.paths
    }

    pub fn writer_shutdown(&self) -> Result<()> {
        debug!("Signalling writer {} to shut down", self.paths.pid);
        write_atomic(&self.paths.writer_shutdown(), b"1")
    }

    pub fn scanner_shutdown(&self, camera: CameraType) -> Result<()> {
        debug!("Signalling {} scanner {} to shut down", camera, self.paths.pid);
        write_atomic(&self.paths.scanner_shutdown(camera), b"1")
    }

    pub fn scanner_rescan(&self, camera: CameraType) -> Result<()> {
        debug!("Requesting rescan from {} scanner {}", camera, self.paths.pid);
        write_atomic(&self.paths.scanner_rescan(camera), b"1")
    }

    pub fn address_update(&self, camera: CameraType, address: u64) -> Result<()> {
        debug!("Sending {} address {:#x} to writer {}", camera, address, self.paths.pid);
        let line = format!("{}:{:#x}", camera.name(), address);
        write_atomic(&self.paths.address_update(), line.as_bytes())
    }

    pub fn active_camera(&self, camera: CameraType) -> Result<()> {
        debug!("Switching writer {} to {} camera", self.paths.pid, camera);
        write_atomic(&self.paths.active_camera(), camera.name().as_bytes())
    }
}
