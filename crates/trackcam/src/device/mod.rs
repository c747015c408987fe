//! Head-pose acquisition.

mod trackir;

pub use trackir::{NpClient, find_npclient_dll};

use crate::error::Result;

/// One reading from the tracking device, in raw device units.
///
/// Rotation axes span roughly `-16383..=16383` at the device's full range.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoseSample {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub frame: u16,
}

impl PoseSample {
    pub fn rotation(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self {
            yaw,
            pitch,
            roll,
            ..Default::default()
        }
    }

    pub fn with_position(mut self, x: f32, y: f32, z: f32) -> Self {
        self.x = x;
        self.y = y;
        self.z = z;
        self
    }
}

/// A source of head-pose samples.
pub trait PoseSource {
    fn start(&mut self) -> Result<()>;

    /// Most recent sample, or `None` if the device has nothing to report.
    fn latest(&mut self) -> Option<PoseSample>;

    fn stop(&mut self);
}

impl<T: PoseSource + ?Sized> PoseSource for Box<T> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn latest(&mut self) -> Option<PoseSample> {
        (**self).latest()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Replays a fixed list of samples, then holds the last one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPoseSource {
    samples: Vec<PoseSample>,
    next: usize,
    running: bool,
}

impl ScriptedPoseSource {
    pub fn new(samples: Vec<PoseSample>) -> Self {
        Self {
            samples,
            next: 0,
            running: false,
        }
    }

    /// A source that always reports the same pose.
    pub fn constant(sample: PoseSample) -> Self {
        Self::new(vec![sample])
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl PoseSource for ScriptedPoseSource {
    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn latest(&mut self) -> Option<PoseSample> {
        if !self.running || self.samples.is_empty() {
            return None;
        }
        let index = self.next.min(self.samples.len() - 1);
        self.next = self.next.saturating_add(1);
        let mut sample = self.samples[index];
        sample.frame = index as u16;
        Some(sample)
    }

    fn stop(&mut self) {
        self.running = false;
    }
}
