//! Candidate confirmation through the extent field.

use tracing::{debug, info};

use crate::camera::CameraType;
use crate::memory::ReadMemory;

/// A candidate that passed the extent check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedAddress {
    pub camera: CameraType,
    pub address: u64,
    /// Extent value measured during validation
    pub extent: f32,
}

/// Accepts candidates whose extent field is strictly inside `(-threshold, threshold)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateValidator {
    pub extent_offset: u64,
    pub threshold: f32,
}

impl CandidateValidator {
    pub fn new(extent_offset: u64, threshold: f32) -> Self {
        Self {
            extent_offset,
            threshold,
        }
    }

    /// Read and check the extent field. Read failures reject the candidate.
    pub fn validate<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        camera: CameraType,
        address: u64,
    ) -> Option<ValidatedAddress> {
        let extent = match reader.read_f32(address + self.extent_offset) {
            Ok(value) => value,
            Err(e) => {
                debug!("Could not read extent at {:#x}: {}", address, e);
                return None;
            }
        };

        // NaN compares false and is rejected here.
        if extent.abs() < self.threshold {
            info!("Valid {} camera at {:#x} (extent {:.2})", camera, address, extent);
            Some(ValidatedAddress {
                camera,
                address,
                extent,
            })
        } else {
            debug!("Rejected {:#x}: extent {:.2} outside threshold", address, extent);
            None
        }
    }
}
