//! Print the per-camera scan patterns.

use std::path::Path;

use anyhow::Result;
use trackcam::{BytePattern, CameraType, ControllerConfig};

pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };

    for camera in CameraType::ALL {
        let text = config.cameras.get(camera).pattern_for(camera);
        let pattern = BytePattern::compile(&text);
        let anchor = match pattern.anchor() {
            Some((offset, byte)) => format!("{byte:02X} at +{offset}"),
            None => "none".to_string(),
        };
        println!("{}:", camera.tag());
        println!(
            "  {} bytes, {} fixed, {} wildcards, anchor {}",
            pattern.len(),
            pattern.fixed_count(),
            pattern.wildcard_count(),
            anchor
        );
        println!("  {pattern}");
    }
    Ok(())
}
