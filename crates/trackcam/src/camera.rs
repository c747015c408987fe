use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// In-game camera whose rotation structure can be located and driven.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CameraType {
    Cab,
    External,
    Interior,
}

impl CameraType {
    pub const ALL: [CameraType; 3] = [Self::Cab, Self::External, Self::Interior];

    /// Lowercase name used on command lines and in side-channel files.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Uppercase tag used in worker events (`CAB`, `EXTERNAL`, `INTERIOR`).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Cab => "CAB",
            Self::External => "EXTERNAL",
            Self::Interior => "INTERIOR",
        }
    }

    /// Default AOB pattern for this camera's rotation structure.
    pub fn default_pattern(&self) -> String {
        let (head, gap) = match self {
            Self::Cab => ("6D 40", 828),
            Self::External => ("03 CC", 212),
            Self::Interior => ("B6 52", 828),
        };
        let mut tokens: Vec<&str> = head.split(' ').collect();
        tokens.extend(std::iter::repeat_n("??", gap));
        tokens.extend(CAMERA_TAIL.split(' '));
        tokens.join(" ")
    }
}

/// Shared trailing signature of every camera structure.
///
/// Eleven unknown bytes, a `0x40` marker, four unknown bytes, fourteen zero
/// bytes, then the f32 `1.0` tail (`80 3F`) and an `i32` 1.
pub const CAMERA_TAIL: &str = "?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? 40 ?? ?? ?? ?? \
00 00 00 00 00 00 00 00 00 00 00 00 00 00 80 3F 00 00 00 00 01 00 00 00";
