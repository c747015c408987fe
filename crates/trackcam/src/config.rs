//! Configuration for scanners, the writer and the controller.
//!
//! The per-camera blob ([`CameraConfigSet`]) is what the controller hands to
//! the writer process. [`ControllerConfig`] is the user-facing `trackcam.json`
//! that seeds it. Every field has a documented default, and malformed values
//! degrade to those defaults with a warning instead of failing.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::camera::CameraType;
use crate::error::{Error, Result};

/// Timing constants for the worker and controller loops.
pub mod timing {
    /// Writer sleep between active write cycles (ms)
    pub const WRITE_INTERVAL_MS: u64 = 10;

    /// Writer sleep while no address is armed (ms)
    pub const IDLE_INTERVAL_MS: u64 = 100;

    /// Interval between supervisor liveness checks in workers (ms)
    pub const PARENT_CHECK_INTERVAL_MS: u64 = 1000;

    /// Fixed backoff while the target process is not running (ms)
    pub const ATTACH_RETRY_MS: u64 = 5000;

    /// Scanner monitoring loop interval (ms)
    pub const SCANNER_POLL_MS: u64 = 1000;

    /// Writer pause after a failed write (ms)
    pub const FAULT_BACKOFF_MS: u64 = 1000;

    /// Minimum interval between raw pose telemetry lines (ms)
    pub const TELEMETRY_INTERVAL_MS: u64 = 100;

    /// Writer heartbeat log interval (ms)
    pub const WRITER_HEARTBEAT_MS: u64 = 5000;

    /// Scanner heartbeat log interval (ms)
    pub const SCAN_HEARTBEAT_MS: u64 = 10_000;

    /// Grace period between a shutdown marker and forced termination (ms)
    pub const STOP_TIMEOUT_MS: u64 = 1000;

    /// Controller check for target process liveness (ms)
    pub const GAME_CHECK_INTERVAL_MS: u64 = 5000;

    /// Controller event loop tick (ms)
    pub const CONTROLLER_TICK_MS: u64 = 50;

    /// Worker silence before the controller warns about it (ms)
    pub const STALL_WARNING_MS: u64 = 30_000;
}

/// Default target executable.
pub const DEFAULT_PROCESS_NAME: &str = "RunActivity.exe";

/// Offset from a match to the f32 extent field used for validation.
pub const DEFAULT_EXTENT_OFFSET: u64 = 0x34;

/// Largest region the scanner will snapshot.
pub const DEFAULT_MAX_REGION_SIZE: u64 = 150 * 1024 * 1024;

/// Per-camera tuning and memory layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Scanner pattern; empty means the camera's default pattern
    pub aob: String,
    /// Validation threshold for the extent field
    pub radius: f32,
    pub x_limit: f32,
    pub y_limit: f32,
    pub forward_backward_add: f32,
    pub up_down_add: f32,
    pub left_right_add: f32,
    pub enable_camera_movement: bool,
    /// Accepted for compatibility with older config files; unused.
    pub force_write_when_inactive: bool,
    pub x_offset: String,
    pub y_offset: String,
    pub forward_backward_offset: String,
    pub up_down_offset: String,
    pub left_right_offset: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            aob: String::new(),
            radius: 10.0,
            x_limit: 2.7,
            y_limit: 1.5,
            forward_backward_add: 0.6,
            up_down_add: 0.5,
            left_right_add: 0.6,
            enable_camera_movement: false,
            force_write_when_inactive: false,
            x_offset: "C".to_string(),
            y_offset: "0".to_string(),
            forward_backward_offset: "6c".to_string(),
            up_down_offset: "68".to_string(),
            left_right_offset: "64".to_string(),
        }
    }
}

/// Resolved field offsets relative to the camera structure address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraOffsets {
    pub yaw: u64,
    pub pitch: u64,
    pub forward_backward: u64,
    pub up_down: u64,
    pub left_right: u64,
}

impl Default for CameraOffsets {
    fn default() -> Self {
        Self {
            yaw: 0xC,
            pitch: 0x0,
            forward_backward: 0x6C,
            up_down: 0x68,
            left_right: 0x64,
        }
    }
}

impl CameraConfig {
    /// Pattern text for `camera`, falling back to its default.
    pub fn pattern_for(&self, camera: CameraType) -> String {
        if self.aob.trim().is_empty() {
            camera.default_pattern()
        } else {
            self.aob.clone()
        }
    }

    /// Parse every offset field, substituting defaults for malformed ones.
    pub fn offsets(&self) -> CameraOffsets {
        let d = CameraOffsets::default();
        CameraOffsets {
            yaw: resolve_offset("x_offset", &self.x_offset, d.yaw),
            pitch: resolve_offset("y_offset", &self.y_offset, d.pitch),
            forward_backward: resolve_offset(
                "forward_backward_offset",
                &self.forward_backward_offset,
                d.forward_backward,
            ),
            up_down: resolve_offset("up_down_offset", &self.up_down_offset, d.up_down),
            left_right: resolve_offset("left_right_offset", &self.left_right_offset, d.left_right),
        }
    }

    /// Replace non-finite or negative limits with defaults. A zero limit
    /// turns its axis off and is kept; the radius must be positive.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        let fix = |name: &str, value: &mut f32, default: f32| {
            if !value.is_finite() || *value < 0.0 {
                warn!("Invalid {} {}, using default {}", name, value, default);
                *value = default;
            }
        };
        if !self.radius.is_finite() || self.radius <= 0.0 {
            warn!("Invalid radius {}, using default {}", self.radius, d.radius);
            self.radius = d.radius;
        }
        fix("x_limit", &mut self.x_limit, d.x_limit);
        fix("y_limit", &mut self.y_limit, d.y_limit);
        fix("forward_backward_add", &mut self.forward_backward_add, d.forward_backward_add);
        fix("up_down_add", &mut self.up_down_add, d.up_down_add);
        fix("left_right_add", &mut self.left_right_add, d.left_right_add);
        self
    }
}

/// Parse a hex offset such as `C`, `0x6c` or `68+4`.
pub fn parse_hex_offset(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.split('+').try_fold(0u64, |acc, term| {
        let term = term.trim();
        let digits = term
            .strip_prefix("0x")
            .or_else(|| term.strip_prefix("0X"))
            .unwrap_or(term);
        if digits.is_empty() {
            return None;
        }
        let value = u64::from_str_radix(digits, 16).ok()?;
        acc.checked_add(value)
    })
}

fn resolve_offset(field: &str, text: &str, default: u64) -> u64 {
    match parse_hex_offset(text) {
        Some(value) => value,
        None => {
            warn!(
                "Malformed {} '{}', using default {:#x}",
                field, text, default
            );
            default
        }
    }
}

/// Camera configs keyed by camera type; the writer's configuration blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraConfigSet {
    cameras: BTreeMap<CameraType, CameraConfig>,
}

impl CameraConfigSet {
    /// Config for `camera`, or the defaults if absent.
    pub fn get(&self, camera: CameraType) -> CameraConfig {
        self.cameras.get(&camera).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, camera: CameraType, config: CameraConfig) {
        self.cameras.insert(camera, config);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CameraType, &CameraConfig)> {
        self.cameras.iter()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let set: Self = serde_json::from_str(&content)?;
        debug!("Loaded camera configs for {} camera(s) from {:?}", set.cameras.len(), path);
        Ok(set)
    }

    /// Load, or fall back to defaults with a warning on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(set) => set,
            Err(e) => {
                warn!("Failed to load camera config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Write atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }
}

/// Scanner settings shared by every camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub max_region_size: u64,
    pub extent_offset: u64,
    pub heartbeat_secs: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_region_size: DEFAULT_MAX_REGION_SIZE,
            extent_offset: DEFAULT_EXTENT_OFFSET,
            heartbeat_secs: timing::SCAN_HEARTBEAT_MS / 1000,
        }
    }
}

/// Controller configuration file (`trackcam.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub process_name: String,
    /// Also scan the external and interior cameras
    pub enable_extra_cameras: bool,
    pub cameras: CameraConfigSet,
    pub scan: ScanSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            enable_extra_cameras: false,
            cameras: CameraConfigSet::default(),
            scan: ScanSettings::default(),
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        if config.process_name.trim().is_empty() {
            return Err(Error::InvalidConfig("process_name is empty".to_string()));
        }
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) if e.is_not_found() => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("Failed to load config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Cameras the controller should scan for.
    pub fn scanned_cameras(&self) -> Vec<CameraType> {
        if self.enable_extra_cameras {
            CameraType::ALL.to_vec()
        } else {
            vec![CameraType::Cab]
        }
    }
}

/// Settings for one scanner run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub camera: CameraType,
    pub pattern: String,
    pub radius: f32,
    pub process_name: String,
    pub max_region_size: u64,
    pub extent_offset: u64,
    pub heartbeat_secs: u64,
}

impl ScanConfig {
    pub fn builder(camera: CameraType) -> ScanConfigBuilder {
        ScanConfigBuilder {
            camera: Some(camera),
            ..Default::default()
        }
    }
}

/// Builder for ScanConfig
#[derive(Debug, Clone, Default)]
pub struct ScanConfigBuilder {
    camera: Option<CameraType>,
    pattern: Option<String>,
    radius: Option<f32>,
    process_name: Option<String>,
    max_region_size: Option<u64>,
    extent_offset: Option<u64>,
    heartbeat_secs: Option<u64>,
}

impl ScanConfigBuilder {
    pub fn pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn process_name<S: Into<String>>(mut self, name: S) -> Self {
        self.process_name = Some(name.into());
        self
    }

    pub fn max_region_size(mut self, size: u64) -> Self {
        self.max_region_size = Some(size);
        self
    }

    pub fn extent_offset(mut self, offset: u64) -> Self {
        self.extent_offset = Some(offset);
        self
    }

    pub fn heartbeat_secs(mut self, secs: u64) -> Self {
        self.heartbeat_secs = Some(secs);
        self
    }

    pub fn settings(self, settings: &ScanSettings) -> Self {
        self.max_region_size(settings.max_region_size)
            .extent_offset(settings.extent_offset)
            .heartbeat_secs(settings.heartbeat_secs)
    }

    pub fn build(self) -> ScanConfig {
        let camera = self.camera.unwrap_or(CameraType::Cab);
        let defaults = ScanSettings::default();
        ScanConfig {
            camera,
            pattern: self
                .pattern
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| camera.default_pattern()),
            radius: self.radius.unwrap_or(CameraConfig::default().radius),
            process_name: self
                .process_name
                .unwrap_or_else(|| DEFAULT_PROCESS_NAME.to_string()),
            max_region_size: self.max_region_size.unwrap_or(defaults.max_region_size),
            extent_offset: self.extent_offset.unwrap_or(defaults.extent_offset),
            heartbeat_secs: self.heartbeat_secs.unwrap_or(defaults.heartbeat_secs),
        }
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_hex_offset() {
        assert_eq!(parse_hex_offset("C"), Some(0xC));
        assert_eq!(parse_hex_offset("0x6c"), Some(0x6C));
        assert_eq!(parse_hex_offset("68+4"), Some(0x6C));
        assert_eq!(parse_hex_offset(" 0x60 + 0xC "), Some(0x6C));
        assert_eq!(parse_hex_offset("0"), Some(0));
        assert_eq!(parse_hex_offset(""), None);
        assert_eq!(parse_hex_offset("zz"), None);
        assert_eq!(parse_hex_offset("68+"), None);
    }

    #[test]
    fn test_malformed_offset_degrades_to_default() {
        let config = CameraConfig {
            x_offset: "nope".to_string(),
            up_down_offset: "60+8".to_string(),
            ..Default::default()
        };
        let offsets = config.offsets();
        assert_eq!(offsets.yaw, 0xC);
        assert_eq!(offsets.up_down, 0x68);
        assert_eq!(offsets.forward_backward, 0x6C);
    }

    #[test]
    fn test_camera_config_partial_json_uses_defaults() {
        let config: CameraConfig = serde_json::from_str(r#"{"x_limit": 3.0}"#).unwrap();
        assert_eq!(config.x_limit, 3.0);
        assert_eq!(config.y_limit, 1.5);
        assert_eq!(config.radius, 10.0);
        assert!(!config.enable_camera_movement);
        assert_eq!(config.pattern_for(CameraType::Cab), CameraType::Cab.default_pattern());
    }

    #[test]
    fn test_sanitized_replaces_bad_limits() {
        let config = CameraConfig {
            x_limit: f32::NAN,
            radius: -1.0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.x_limit, 2.7);
        assert_eq!(config.radius, 10.0);
    }

    #[test]
    fn test_sanitized_keeps_zero_limits() {
        let config = CameraConfig {
            x_limit: 0.0,
            y_limit: 0.0,
            up_down_add: 0.0,
            left_right_add: -0.5,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.x_limit, 0.0);
        assert_eq!(config.y_limit, 0.0);
        assert_eq!(config.up_down_add, 0.0);
        assert_eq!(config.left_right_add, 0.6);
    }

    #[test]
    fn test_config_set_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cams.json");

        let mut set = CameraConfigSet::default();
        set.set(
            CameraType::Interior,
            CameraConfig {
                x_limit: 1.0,
                ..Default::default()
            },
        );
        set.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"interior\""));

        let loaded = CameraConfigSet::load(&path).unwrap();
        assert_eq!(loaded.get(CameraType::Interior).x_limit, 1.0);
        assert_eq!(loaded.get(CameraType::Cab), CameraConfig::default());
    }

    #[test]
    fn test_controller_config_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = ControllerConfig::load_or_default(&dir.path().join("missing.json"));
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.scanned_cameras(), vec![CameraType::Cab]);
    }

    #[test]
    fn test_controller_config_from_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trackcam.json");
        fs::write(
            &path,
            r#"{"enable_extra_cameras": true, "cameras": {"cab": {"radius": 5.0}}}"#,
        )
        .unwrap();

        let config = ControllerConfig::load(&path).unwrap();
        assert_eq!(config.process_name, DEFAULT_PROCESS_NAME);
        assert_eq!(config.cameras.get(CameraType::Cab).radius, 5.0);
        assert_eq!(config.scanned_cameras().len(), 3);
        assert_eq!(config.scan.max_region_size, DEFAULT_MAX_REGION_SIZE);
    }

    #[test]
    fn test_scan_config_builder_defaults() {
        let config = ScanConfig::builder(CameraType::External).build();
        assert_eq!(config.camera, CameraType::External);
        assert_eq!(config.pattern, CameraType::External.default_pattern());
        assert_eq!(config.radius, 10.0);
        assert_eq!(config.process_name, "RunActivity.exe");
        assert_eq!(config.extent_offset, 0x34);

        let custom = ScanConfig::builder(CameraType::Cab)
            .pattern("6D 40")
            .radius(2.0)
            .max_region_size(4096)
            .build();
        assert_eq!(custom.pattern, "6D 40");
        assert_eq!(custom.max_region_size, 4096);
    }
}
