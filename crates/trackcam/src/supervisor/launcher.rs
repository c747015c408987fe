//! Command lines for spawning worker processes of this executable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::camera::CameraType;
use crate::config::{DEFAULT_PROCESS_NAME, ScanConfig};
use crate::error::Result;
use crate::ipc::config_blob_path;

/// Builds `scan` / `write` invocations of the worker executable.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    exe: PathBuf,
    controller_pid: u32,
    config_dir: PathBuf,
    process_name: String,
}

impl WorkerLauncher {
    pub fn new<P: Into<PathBuf>>(exe: P) -> Self {
        Self {
            exe: exe.into(),
            controller_pid: std::process::id(),
            config_dir: std::env::temp_dir(),
            process_name: DEFAULT_PROCESS_NAME.to_string(),
        }
    }

    /// Launcher for the currently running executable.
    pub fn current() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn controller_pid(mut self, pid: u32) -> Self {
        self.controller_pid = pid;
        self
    }

    pub fn config_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Game executable the writer attaches to.
    pub fn process_name<S: Into<String>>(mut self, name: S) -> Self {
        self.process_name = name.into();
        self
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub fn pid(&self) -> u32 {
        self.controller_pid
    }

    /// Where the writer's camera configuration blob is written.
    pub fn config_path(&self) -> PathBuf {
        config_blob_path(&self.config_dir, self.controller_pid)
    }

    pub fn scanner_command(&self, config: &ScanConfig) -> Command {
        let mut command = self.base_command("scan");
        command
            .arg("--camera-type")
            .arg(config.camera.name())
            .arg("--radius")
            .arg(config.radius.to_string())
            .arg("--process-name")
            .arg(&config.process_name)
            .arg("--max-region-size")
            .arg(config.max_region_size.to_string())
            .arg("--extent-offset")
            .arg(format!("{:#x}", config.extent_offset))
            .arg("--parent-pid")
            .arg(self.controller_pid.to_string())
            .arg("--aob")
            .args(config.pattern.split_whitespace());
        command
    }

    /// `0` marks a camera without an address.
    pub fn writer_command(
        &self,
        config_path: &Path,
        addresses: &BTreeMap<CameraType, u64>,
        active: CameraType,
    ) -> Command {
        let mut command = self.base_command("write");
        command.arg("--config-file").arg(config_path);
        for camera in CameraType::ALL {
            let address = addresses
                .get(&camera)
                .map_or_else(|| "0".to_string(), |a| format!("{a:#x}"));
            command
                .arg(format!("--{}-address", camera.name()))
                .arg(address);
        }
        command
            .arg("--active-camera")
            .arg(active.name())
            .arg("--process-name")
            .arg(&self.process_name)
            .arg("--parent-pid")
            .arg(self.controller_pid.to_string());
        command
    }

    fn base_command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.exe);
        command
            .arg(subcommand)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &Command) -> Vec<String> {
        command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn launcher() -> WorkerLauncher {
        WorkerLauncher::new("trackcam.exe")
            .controller_pid(321)
            .config_dir("/tmp/tc")
    }

    #[test]
    fn test_scanner_command_line() {
        let config = ScanConfig::builder(CameraType::Interior)
            .pattern("6D ?? 40")
            .radius(12.5)
            .build();
        let command = launcher().scanner_command(&config);
        let args = args(&command);

        assert_eq!(command.get_program(), "trackcam.exe");
        assert_eq!(&args[..3], ["scan", "--camera-type", "interior"]);
        assert!(args.windows(2).any(|w| w == ["--radius", "12.5"]));
        assert!(args.windows(2).any(|w| w == ["--parent-pid", "321"]));
        assert!(args.windows(2).any(|w| w == ["--extent-offset", "0x34"]));
        assert_eq!(&args[args.len() - 4..], ["--aob", "6D", "??", "40"]);
    }

    #[test]
    fn test_writer_command_line() {
        let launcher = launcher();
        let addresses = BTreeMap::from([(CameraType::Cab, 0x7ffabc)]);
        let command =
            launcher.writer_command(&launcher.config_path(), &addresses, CameraType::External);
        let args = args(&command);

        assert_eq!(args[0], "write");
        assert!(args.windows(2).any(|w| w == ["--cab-address", "0x7ffabc"]));
        assert!(args.windows(2).any(|w| w == ["--external-address", "0"]));
        assert!(args.windows(2).any(|w| w == ["--interior-address", "0"]));
        assert!(args.windows(2).any(|w| w == ["--active-camera", "external"]));
        assert!(args.windows(2).any(|w| w == ["--process-name", "RunActivity.exe"]));
        assert!(args.iter().any(|a| a.ends_with("trackcam_config_321.json")));
    }
}
