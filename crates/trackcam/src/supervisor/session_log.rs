use crate::error::Result;
use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamped record of every worker line seen during a controller session.
pub struct SessionLog {
    base_dir: PathBuf,
    current_session: Option<PathBuf>,
}

impl SessionLog {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            current_session: None,
        }
    }

    /// Open `<base>/<YYYY-MM-DD>/session_<HHMMSS>.log`.
    pub fn start_session(&mut self) -> Result<PathBuf> {
        let now: DateTime<Local> = Local::now();
        let day_dir = self.base_dir.join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&day_dir)?;

        let session_file = day_dir.join(format!("session_{}.log", now.format("%H%M%S")));
        self.current_session = Some(session_file.clone());

        Ok(session_file)
    }

    /// Append `[HH:MM:SS.mmm] [source] line`. No-op before a session starts.
    pub fn append(&self, source: &str, line: &str) -> Result<()> {
        if let Some(ref path) = self.current_session {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            writeln!(
                file,
                "[{}] [{}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                source,
                line
            )?;
        }
        Ok(())
    }

    pub fn current_session_path(&self) -> Option<&Path> {
        self.current_session.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_before_start_is_noop() {
        let dir = tempdir().unwrap();
        let log = SessionLog::new(dir.path());
        log.append("writer", "ignored").unwrap();
        assert!(log.current_session_path().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_lines_are_timestamped_and_tagged() {
        let dir = tempdir().unwrap();
        let mut log = SessionLog::new(dir.path());
        let path = log.start_session().unwrap();
        assert!(path.starts_with(dir.path()));

        log.append("scanner[cab]", "FOUND_PID: CAB: 7").unwrap();
        log.append("writer", "WRITE_ERROR: 0x10").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("[scanner[cab]] FOUND_PID: CAB: 7"));
        assert!(lines[1].ends_with("[writer] WRITE_ERROR: 0x10"));
    }
}
