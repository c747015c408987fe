//! Pose -> camera value transforms.
//!
//! Raw device axes are normalised against [`FULL_SCALE`], scaled by the
//! per-axis limit and clamped to `[-limit, limit]`.

use crate::config::CameraConfig;
use crate::device::PoseSample;

/// Device value at full deflection.
pub const FULL_SCALE: f32 = 16383.0;

/// Per-axis limits taken from a camera config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub yaw: f32,
    pub pitch: f32,
    pub forward_backward: f32,
    pub up_down: f32,
    pub left_right: f32,
}

impl From<&CameraConfig> for AxisLimits {
    fn from(config: &CameraConfig) -> Self {
        Self {
            yaw: config.x_limit,
            pitch: config.y_limit,
            forward_backward: config.forward_backward_add,
            up_down: config.up_down_add,
            left_right: config.left_right_add,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rotation {
    pub yaw: f32,
    pub pitch: f32,
}

/// Translation offsets (or baseline values) along the camera axes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Translation {
    pub forward_backward: f32,
    pub up_down: f32,
    pub left_right: f32,
}

impl Translation {
    pub fn offset_by(self, delta: Translation) -> Translation {
        Translation {
            forward_backward: self.forward_backward + delta.forward_backward,
            up_down: self.up_down + delta.up_down,
            left_right: self.left_right + delta.left_right,
        }
    }
}

/// Normalise, scale and clamp one axis.
pub fn scale_axis(raw: f32, limit: f32) -> f32 {
    let limit = limit.abs();
    let value = raw / FULL_SCALE * limit;
    // max/min rather than clamp: clamp panics on a NaN bound.
    value.max(-limit).min(limit)
}

/// Yaw is inverted, pitch is not.
pub fn rotation(sample: &PoseSample, limits: &AxisLimits) -> Rotation {
    Rotation {
        yaw: scale_axis(-sample.yaw, limits.yaw),
        pitch: scale_axis(sample.pitch, limits.pitch),
    }
}

/// Forward/back follows -Z, up/down follows Y, left/right follows -X.
pub fn translation(sample: &PoseSample, limits: &AxisLimits) -> Translation {
    Translation {
        forward_backward: scale_axis(-sample.z, limits.forward_backward),
        up_down: scale_axis(sample.y, limits.up_down),
        left_right: scale_axis(-sample.x, limits.left_right),
    }
}
