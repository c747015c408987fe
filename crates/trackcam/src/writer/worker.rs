//! Writer worker loop.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::timing;
use crate::device::PoseSource;
use crate::error::{Error, Result};
use crate::ipc::{EventSink, ParentWatch, SignalPaths, WriterSignals, take_marker};
use crate::memory::TargetProcess;
use crate::writer::live::LiveWriter;

/// Why a writer worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    Shutdown,
    TargetExited,
    ParentGone,
}

/// Outcome of [`WriterWorker::attach`].
#[derive(Debug)]
pub enum Attach<P> {
    Attached(P),
    /// Told to stop before the target appeared.
    Exited(WriterExit),
}

/// Drives a [`LiveWriter`] until shutdown, target exit or parent loss.
pub struct WriterWorker {
    signals: SignalPaths,
    parent: Option<ParentWatch>,
    write_interval: Duration,
    idle_interval: Duration,
    retry_interval: Duration,
}

impl WriterWorker {
    pub fn new(signals: SignalPaths) -> Self {
        Self {
            signals,
            parent: None,
            write_interval: Duration::from_millis(timing::WRITE_INTERVAL_MS),
            idle_interval: Duration::from_millis(timing::IDLE_INTERVAL_MS),
            retry_interval: Duration::from_millis(timing::ATTACH_RETRY_MS),
        }
    }

    pub fn parent(mut self, watch: ParentWatch) -> Self {
        self.parent = Some(watch);
        self
    }

    pub fn intervals(mut self, write: Duration, idle: Duration) -> Self {
        self.write_interval = write;
        self.idle_interval = idle;
        self
    }

    /// Backoff between attach attempts.
    pub fn retry_interval(mut self, retry: Duration) -> Self {
        self.retry_interval = retry;
        self
    }

    /// Call `attach` with a fixed backoff until the target is found. Gives
    /// up early on shutdown or parent loss. Errors other than a missing or
    /// not yet openable process are returned.
    pub fn attach<P, A>(&mut self, process_name: &str, mut attach: A) -> Result<Attach<P>>
    where
        P: TargetProcess,
        A: FnMut(&str) -> Result<P>,
    {
        loop {
            if let Some(exit) = self.check_exit() {
                return Ok(Attach::Exited(exit));
            }

            match attach(process_name) {
                Ok(process) => {
                    info!("Attached to {} (pid {})", process_name, process.pid());
                    return Ok(Attach::Attached(process));
                }
                Err(e) if e.is_process_gone() => {
                    info!("{} not found, waiting...", process_name);
                }
                Err(Error::ProcessOpenFailed(message)) => {
                    warn!("Failed to attach to {}: {}", process_name, message);
                }
                Err(e) => return Err(e),
            }

            if let Some(exit) = self.sleep(self.retry_interval) {
                return Ok(Attach::Exited(exit));
            }
        }
    }

    /// Start the pose source and write until told to stop. The source is
    /// stopped on every exit path.
    pub fn run<M, P, S>(&mut self, writer: &mut LiveWriter<'_, M, P, S>) -> Result<WriterExit>
    where
        M: TargetProcess + ?Sized,
        P: PoseSource,
        S: EventSink + ?Sized,
    {
        writer.start()?;
        info!(
            "Writer started (worker pid {}, active camera {})",
            self.signals.pid(),
            writer.active_camera()
        );
        let exit = self.drive(writer);
        writer.stop();
        info!("Writer stopped: {:?} after {} cycles", exit, writer.write_count());
        Ok(exit)
    }

    fn drive<M, P, S>(&mut self, writer: &mut LiveWriter<'_, M, P, S>) -> WriterExit
    where
        M: TargetProcess + ?Sized,
        P: PoseSource,
        S: EventSink + ?Sized,
    {
        loop {
            let signals = WriterSignals::poll(&self.signals);
            if signals.shutdown {
                info!("Shutdown requested");
                return WriterExit::Shutdown;
            }
            writer.apply_signals(&signals);

            if !writer.memory().is_alive() {
                warn!("Target process {} exited", writer.memory().pid());
                return WriterExit::TargetExited;
            }

            let now = Instant::now();
            if let Some(watch) = self.parent.as_mut()
                && !watch.parent_alive(now)
            {
                return WriterExit::ParentGone;
            }

            let pause = if writer.cycle(now).wrote() {
                self.write_interval
            } else {
                self.idle_interval
            };
            thread::sleep(pause);
        }
    }

    fn check_exit(&mut self) -> Option<WriterExit> {
        if take_marker(&self.signals.writer_shutdown()) {
            info!("Shutdown requested");
            return Some(WriterExit::Shutdown);
        }
        if let Some(watch) = self.parent.as_mut()
            && !watch.parent_alive(Instant::now())
        {
            return Some(WriterExit::ParentGone);
        }
        None
    }

    /// Sleep in short steps, waking early for shutdown or parent death.
    fn sleep(&mut self, duration: Duration) -> Option<WriterExit> {
        let step = Duration::from_millis(50).min(duration);
        let deadline = Instant::now() + duration;
        loop {
            if let Some(exit) = self.check_exit() {
                return Some(exit);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(step.min(deadline - now));
        }
    }
}
