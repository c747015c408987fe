//! Privilege and device preflight.

use anyhow::Result;
use trackcam::check_privileges;
use trackcam::device::find_npclient_dll;

pub fn run(process_name: &str) -> Result<()> {
    let report = check_privileges(process_name)?;
    println!("Elevated: {}", if report.elevated { "yes" } else { "no" });
    match report.probed_pid {
        Some(pid) => println!("{process_name}: running (pid {pid}), opened for read/write"),
        None => println!("{process_name}: not running"),
    }

    match find_npclient_dll() {
        Ok(path) if path.exists() => println!("TrackIR client: {}", path.display()),
        Ok(path) => println!("TrackIR client: registered but missing ({})", path.display()),
        Err(e) => println!("TrackIR client: {e}"),
    }
    Ok(())
}
