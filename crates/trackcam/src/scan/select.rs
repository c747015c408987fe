//! Per-camera choice among validated addresses.

use crate::camera::CameraType;

/// Pick the most likely live structure for `camera`.
///
/// Addresses are sorted ascending first. CAB takes the largest, EXTERNAL the
/// smallest, INTERIOR the second largest (or the only one).
pub fn select_address(camera: CameraType, addresses: &[u64]) -> Option<u64> {
    let mut sorted = addresses.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    match camera {
        CameraType::Cab => sorted.last().copied(),
        CameraType::External => sorted.first().copied(),
        CameraType::Interior => match sorted.len() {
            0 => None,
            1 => Some(sorted[0]),
            n => Some(sorted[n - 2]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_rules() {
        let three = [0x300, 0x100, 0x200];
        assert_eq!(select_address(CameraType::Cab, &three), Some(0x300));
        assert_eq!(select_address(CameraType::Interior, &three), Some(0x200));
        assert_eq!(select_address(CameraType::External, &[0x200, 0x100]), Some(0x100));
    }

    #[test]
    fn test_small_inputs() {
        assert_eq!(select_address(CameraType::Cab, &[]), None);
        assert_eq!(select_address(CameraType::External, &[]), None);
        assert_eq!(select_address(CameraType::Interior, &[]), None);
        assert_eq!(select_address(CameraType::Interior, &[0x500]), Some(0x500));
        assert_eq!(select_address(CameraType::External, &[0x500]), Some(0x500));
    }
}
