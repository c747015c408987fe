//! Scanner worker: attach, scan, validate, select, then monitor.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{ScanConfig, timing};
use crate::error::Result;
use crate::ipc::{EventSink, ParentWatch, ScannerSignals, SignalPaths, WorkerEvent, take_marker};
use crate::memory::{QueryRegions, ReadMemory, TargetProcess};
use crate::pattern::BytePattern;
use crate::scan::scanner::{RegionScanner, ScanStats};
use crate::scan::select::select_address;
use crate::scan::validate::{CandidateValidator, ValidatedAddress};

/// Result of one scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub validated: Vec<ValidatedAddress>,
    pub selected: Option<u64>,
    pub stats: ScanStats,
}

/// One scan pass over a process: every validated address is announced as it
/// is found, and the selected one is announced again last.
pub struct ScanSession<'a, S: EventSink + ?Sized> {
    config: &'a ScanConfig,
    pattern: BytePattern,
    validator: CandidateValidator,
    sink: &'a S,
}

impl<'a, S: EventSink + ?Sized> ScanSession<'a, S> {
    pub fn new(config: &'a ScanConfig, sink: &'a S) -> Self {
        let pattern = BytePattern::compile(&config.pattern);
        info!(
            "[{}] Pattern: {} bytes ({} fixed, {} wildcards)",
            config.camera,
            pattern.len(),
            pattern.fixed_count(),
            pattern.wildcard_count()
        );
        Self {
            config,
            pattern,
            validator: CandidateValidator::new(config.extent_offset, config.radius),
            sink,
        }
    }

    pub fn pattern(&self) -> &BytePattern {
        &self.pattern
    }

    pub fn run<M: ReadMemory + QueryRegions + ?Sized>(&self, memory: &M) -> ScanOutcome {
        self.run_until(memory, || false)
    }

    /// Run a pass that stops between regions once `cancel` returns true.
    pub fn run_until<M, C>(&self, memory: &M, cancel: C) -> ScanOutcome
    where
        M: ReadMemory + QueryRegions + ?Sized,
        C: Fn() -> bool,
    {
        let camera = self.config.camera;
        let mut validated: Vec<ValidatedAddress> = Vec::new();

        let scanner = RegionScanner::new(memory, &self.pattern, self.config.max_region_size)
            .heartbeat(Duration::from_secs(self.config.heartbeat_secs.max(1)))
            .label(camera.name())
            .cancel_when(cancel);

        let stats = scanner.scan(|candidate| {
            if let Some(valid) = self.validator.validate(memory, camera, candidate) {
                self.sink.emit(&WorkerEvent::AddressFound {
                    camera,
                    address: valid.address,
                });
                validated.push(valid);
            }
        });

        if stats.cancelled {
            info!("[{}] Scan interrupted, no selection made", camera);
            return ScanOutcome {
                validated,
                selected: None,
                stats,
            };
        }

        let addresses: Vec<u64> = validated.iter().map(|v| v.address).collect();
        let selected = select_address(camera, &addresses);
        match selected {
            Some(address) => {
                info!(
                    "[{}] Selected {:#x} from {} valid address(es)",
                    camera,
                    address,
                    addresses.len()
                );
                self.sink.emit(&WorkerEvent::AddressFound { camera, address });
            }
            None => warn!("[{}] No valid camera address found", camera),
        }

        ScanOutcome {
            validated,
            selected,
            stats,
        }
    }
}

/// Why a scanner worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerExit {
    Shutdown,
    ParentGone,
}

/// Long-running scanner loop driven by side-channel markers.
pub struct ScannerWorker<'a, S: EventSink + ?Sized> {
    config: ScanConfig,
    signals: SignalPaths,
    sink: &'a S,
    parent: Option<ParentWatch>,
    poll_interval: Duration,
    retry_interval: Duration,
}

impl<'a, S: EventSink + ?Sized> ScannerWorker<'a, S> {
    pub fn new(config: ScanConfig, signals: SignalPaths, sink: &'a S) -> Self {
        Self {
            config,
            signals,
            sink,
            parent: None,
            poll_interval: Duration::from_millis(timing::SCANNER_POLL_MS),
            retry_interval: Duration::from_millis(timing::ATTACH_RETRY_MS),
        }
    }

    /// Exit when the supervising process disappears.
    pub fn parent(mut self, watch: ParentWatch) -> Self {
        self.parent = Some(watch);
        self
    }

    pub fn intervals(mut self, poll: Duration, retry: Duration) -> Self {
        self.poll_interval = poll;
        self.retry_interval = retry;
        self
    }

    /// Run until shut down. `attach` is called with the target process name
    /// and retried with a fixed backoff while it fails.
    pub fn run<P, A>(&mut self, mut attach: A) -> Result<ScannerExit>
    where
        P: TargetProcess,
        A: FnMut(&str) -> Result<P>,
    {
        let camera = self.config.camera;
        info!("[{}] Scanner started (worker pid {})", camera, self.signals.pid());

        loop {
            if let Some(exit) = self.check_exit() {
                return Ok(exit);
            }

            let process = match attach(&self.config.process_name) {
                Ok(process) => process,
                Err(e) => {
                    if e.is_process_gone() {
                        info!("[{}] {} not found, waiting...", camera, self.config.process_name);
                    } else {
                        warn!("[{}] Failed to attach: {}", camera, e);
                    }
                    if let Some(exit) = self.sleep(self.retry_interval) {
                        return Ok(exit);
                    }
                    continue;
                }
            };

            info!(
                "[{}] Attached to {} (pid {})",
                camera,
                self.config.process_name,
                process.pid()
            );
            self.sink.emit(&WorkerEvent::PidFound {
                camera,
                pid: process.pid(),
            });
            self.scan(&process);

            loop {
                if let Some(exit) = self.sleep(self.poll_interval) {
                    return Ok(exit);
                }

                let signals = ScannerSignals::poll(&self.signals, camera);
                if signals.shutdown {
                    info!("[{}] Shutdown requested", camera);
                    return Ok(ScannerExit::Shutdown);
                }
                if !process.is_alive() {
                    info!("[{}] Target process exited, re-attaching", camera);
                    break;
                }
                if signals.rescan {
                    info!("[{}] Rescan requested", camera);
                    self.scan(&process);
                }
            }
        }
    }

    fn scan<P: TargetProcess>(&self, process: &P) -> ScanOutcome {
        let shutdown = self.signals.scanner_shutdown(self.config.camera);
        ScanSession::new(&self.config, self.sink).run_until(process, || shutdown.exists())
    }

    fn check_exit(&mut self) -> Option<ScannerExit> {
        if take_marker(&self.signals.scanner_shutdown(self.config.camera)) {
            info!("[{}] Shutdown requested", self.config.camera);
            return Some(ScannerExit::Shutdown);
        }
        if let Some(watch) = self.parent.as_mut()
            && !watch.parent_alive(Instant::now())
        {
            return Some(ScannerExit::ParentGone);
        }
        None
    }

    /// Sleep in short steps, waking early for shutdown or parent death.
    fn sleep(&mut self, duration: Duration) -> Option<ScannerExit> {
        let step = Duration::from_millis(50).min(duration);
        let deadline = Instant::now() + duration;
        loop {
            if let Some(watch) = self.parent.as_mut()
                && !watch.parent_alive(Instant::now())
            {
                return Some(ScannerExit::ParentGone);
            }
            if self.signals.scanner_shutdown(self.config.camera).exists() {
                // Left for the caller's poll to consume.
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(step.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraType;
    use crate::error::Error;
    use crate::ipc::{EventLog, SignalSender};
    use crate::memory::mock::{MockMemory, MockMemoryBuilder};
    use tempfile::tempdir;

    const MARKER: [u8; 4] = [0x6D, 0x40, 0x11, 0x22];

    fn place(data: &mut [u8], at: usize, extent: f32) {
        data[at..at + 4].copy_from_slice(&MARKER);
        data[at + 0x34..at + 0x38].copy_from_slice(&extent.to_le_bytes());
    }

    fn camera_memory() -> MockMemory {
        let mut data = vec![0u8; 0x1000];
        place(&mut data, 0x100, 1.0);
        place(&mut data, 0x200, 50.0);
        place(&mut data, 0x300, -2.0);
        MockMemoryBuilder::new()
            .pid(777)
            .region(0x10000, data)
            .build()
    }

    fn config() -> ScanConfig {
        ScanConfig::builder(CameraType::Cab)
            .pattern("6D 40 11 22")
            .radius(10.0)
            .build()
    }

    #[test]
    fn test_pass_announces_valid_then_selected() {
        let memory = camera_memory();
        let config = config();
        let log = EventLog::new();

        let outcome = ScanSession::new(&config, &log).run(&memory);

        assert_eq!(outcome.stats.candidates, 3);
        assert_eq!(outcome.validated.len(), 2);
        assert_eq!(outcome.selected, Some(0x10300));
        let addresses: Vec<u64> = log
            .events()
            .into_iter()
            .filter_map(|e| match e {
                WorkerEvent::AddressFound { address, .. } => Some(address),
                _ => None,
            })
            .collect();
        assert_eq!(addresses, vec![0x10100, 0x10300, 0x10300]);
    }

    #[test]
    fn test_pass_with_no_valid_candidates_announces_nothing() {
        let memory = MockMemoryBuilder::new().region(0x1000, vec![0u8; 0x100]).build();
        let config = config();
        let log = EventLog::new();

        let outcome = ScanSession::new(&config, &log).run(&memory);
        assert_eq!(outcome.selected, None);
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_interrupted_pass_selects_nothing() {
        let mut data = vec![0u8; 0x1000];
        place(&mut data, 0x100, 1.0);
        place(&mut data, 0x300, -2.0);
        let memory = MockMemoryBuilder::new()
            .region(0x10000, data)
            .region(0x20000, vec![0u8; 0x100])
            .build();
        let config = config();
        let log = EventLog::new();

        let outcome =
            ScanSession::new(&config, &log).run_until(&memory, || !log.events().is_empty());

        assert!(outcome.stats.cancelled);
        assert_eq!(outcome.selected, None);
        assert_eq!(outcome.validated.len(), 2);
        // Only the per-match announcements; no final selection line.
        assert_eq!(log.events().len(), 2);
    }

    #[test]
    fn test_worker_retries_attach_then_scans_until_shutdown() {
        let dir = tempdir().unwrap();
        let paths = SignalPaths::in_dir(dir.path(), 55);
        let memory = camera_memory();
        let log = EventLog::new();
        let mut attempts = 0;

        let exit = thread::scope(|scope| {
            scope.spawn(|| {
                let deadline = Instant::now() + Duration::from_secs(10);
                while log.events().len() < 4 && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
                SignalSender::new(paths.clone())
                    .scanner_shutdown(CameraType::Cab)
                    .unwrap();
            });

            ScannerWorker::new(config(), paths.clone(), &log)
                .intervals(Duration::from_millis(5), Duration::from_millis(5))
                .run(|name| {
                    attempts += 1;
                    if attempts < 3 {
                        Err(Error::ProcessNotFound(name.to_string()))
                    } else {
                        Ok(&memory)
                    }
                })
                .unwrap()
        });

        assert_eq!(exit, ScannerExit::Shutdown);
        assert_eq!(attempts, 3);
        let events = log.events();
        assert_eq!(
            events[0],
            WorkerEvent::PidFound {
                camera: CameraType::Cab,
                pid: 777
            }
        );
        assert_eq!(
            events[3],
            WorkerEvent::AddressFound {
                camera: CameraType::Cab,
                address: 0x10300
            }
        );
    }

    #[test]
    fn test_worker_rescans_on_marker() {
        let dir = tempdir().unwrap();
        let paths = SignalPaths::in_dir(dir.path(), 56);
        let memory = camera_memory();
        let log = EventLog::new();
        let sender = SignalSender::new(paths.clone());

        let exit = thread::scope(|scope| {
            scope.spawn(|| {
                let wait_for = |count: usize| {
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while log.events().len() < count && Instant::now() < deadline {
                        thread::sleep(Duration::from_millis(5));
                    }
                };
                wait_for(4);
                sender.scanner_rescan(CameraType::Cab).unwrap();
                wait_for(7);
                sender.scanner_shutdown(CameraType::Cab).unwrap();
            });

            ScannerWorker::new(config(), paths.clone(), &log)
                .intervals(Duration::from_millis(5), Duration::from_millis(5))
                .run(|_| Ok(&memory))
                .unwrap()
        });

        assert_eq!(exit, ScannerExit::Shutdown);
        // One PID announcement, two passes of three address lines each.
        assert_eq!(log.events().len(), 7);
    }
}
