//! Headless controller command.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use trackcam::config::timing;
use trackcam::supervisor::SessionLog;
use trackcam::{
    Controller, ControllerConfig, WorkerLauncher, WorkerSupervisor, check_privileges,
};

use crate::input::{self, KEY_HELP, KeyCommand};
use crate::shutdown::ShutdownSignal;

pub fn run(config_path: &Path, log_dir: Option<&Path>) -> Result<()> {
    let config = ControllerConfig::load_or_default(config_path);

    // Insufficient privilege is the one fatal condition; check before spawning.
    let report = check_privileges(&config.process_name)
        .context("privilege check failed; run as administrator")?;
    if let Some(pid) = report.probed_pid {
        info!("{} already running (pid {})", config.process_name, pid);
    }

    let shutdown = Arc::new(ShutdownSignal::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping...");
        shutdown_ctrlc.trigger();
    })?;

    let (key_tx, key_rx) = mpsc::channel();
    let _keyboard_handle = input::spawn_keyboard_monitor(Arc::clone(&shutdown), key_tx);

    let launcher = WorkerLauncher::current()?.process_name(config.process_name.as_str());
    let supervisor = WorkerSupervisor::new(launcher);
    let mut controller = Controller::new(config, supervisor);
    if let Some(dir) = log_dir {
        let mut log = SessionLog::new(dir);
        match log.start_session() {
            Ok(path) => {
                info!("Session log: {}", path.display());
                controller = controller.session_log(log);
            }
            Err(e) => warn!("Session log disabled: {}", e),
        }
    }

    controller.start()?;
    println!("Waiting for {}... {}", controller.config().process_name, KEY_HELP);

    let tick = Duration::from_millis(timing::CONTROLLER_TICK_MS);
    while !shutdown.is_shutdown() {
        controller.tick(tick);
        handle_keys(&mut controller, &key_rx);
    }

    controller.shutdown();
    info!("Controller stopped");
    Ok(())
}

fn handle_keys(controller: &mut Controller, keys: &Receiver<KeyCommand>) {
    for command in keys.try_iter() {
        let camera = controller.state().active_camera();
        match command {
            KeyCommand::NextAddress => controller.cycle_address(camera),
            KeyCommand::SelectCamera(camera) => controller.set_active_camera(camera),
            KeyCommand::Rescan => controller.request_rescan(camera),
            // Quit is handled by the keyboard thread.
            KeyCommand::Quit => {}
        }
    }
}
