//! Pose writing: transforms, per-camera sessions and the writer loop.

pub mod live;
pub mod session;
pub mod transform;
pub mod worker;

pub use live::{CycleOutcome, LiveWriter};
pub use session::{CameraSession, SessionPhase};
pub use transform::{AxisLimits, FULL_SCALE, Rotation, Translation, rotation, scale_axis, translation};
pub use worker::{Attach, WriterExit, WriterWorker};
