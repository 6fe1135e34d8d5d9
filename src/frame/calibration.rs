//! Per-series calibration facts as reported by a backend.

use serde::Serialize;

use super::units::{Length, LengthUnit, Measure};

/// Where pixel coordinates are anchored when axes are flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginConvention {
    /// Flips pivot around the image centre
    Center,
    /// Flips pivot around pixel (0, 0, 0)
    #[default]
    Corner,
}

/// Calibration of one image series. Immutable once read from the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationRecord {
    /// Level-0 size in pixels (X, Y, Z)
    pub dimensions: [u64; 3],

    /// Physical size of one voxel along X, Y and Z
    pub voxel_size: [Measure; 3],

    /// Stage position of the series along X, Y and Z
    pub position: [Measure; 3],

    /// Per-axis flip flags
    pub flip: [bool; 3],

    pub origin: OriginConvention,

    /// Length of one reference-frame unit, for positions
    pub reference_frame_position: Length,

    /// Length of one reference-frame unit, for voxel sizes
    pub reference_frame_voxel: Length,
}

impl CalibrationRecord {
    /// A record with no calibration: unit voxels at the origin, no flips.
    pub fn uncalibrated(dimensions: [u64; 3]) -> Self {
        Self {
            dimensions,
            voxel_size: [Measure::unknown(1.0); 3],
            position: [Measure::unknown(0.0); 3],
            flip: [false; 3],
            origin: OriginConvention::Corner,
            reference_frame_position: Length::new(1.0, LengthUnit::Micrometer),
            reference_frame_voxel: Length::new(1.0, LengthUnit::Micrometer),
        }
    }
}
