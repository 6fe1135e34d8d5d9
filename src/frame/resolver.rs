//! Composition of a series' placement transform from its calibration.
//!
//! The transform maps level-0 pixel coordinates to physical coordinates in
//! the target unit. Steps are composed, not summed, in this order (rightmost
//! applied first):
//!
//! ```text
//! post ∘ position ∘ scale ∘ (+d/2) ∘ flip ∘ (-d/2) ∘ pre
//! ```
//!
//! The `±d/2` pair is only present for [`OriginConvention::Center`], so that
//! flips pivot around the image centre instead of the corner.

use serde::Serialize;

use crate::error::CalibrationError;

use super::affine::AffineTransform3D;
use super::calibration::{CalibrationRecord, OriginConvention};
use super::units::{Length, LengthUnit, Measure, UnitSpec};

/// Backend-specific corrections applied outside the calibrated transform.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameCorrection {
    /// Applied to pixel coordinates before anything else
    pub pre: Option<AffineTransform3D>,
    /// Applied after the stage position
    pub post: Option<AffineTransform3D>,
}

/// A resolved placement of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateFrame {
    /// Pixel-to-physical transform
    pub transform: AffineTransform3D,
    /// Unit of the physical side of `transform`
    pub unit: LengthUnit,
    /// Voxel size per axis in `unit`
    pub voxel_size: [f64; 3],
    /// Stage position per axis in `unit`
    pub position: [f64; 3],
}

impl CoordinateFrame {
    /// Physical coordinates of a level-0 pixel.
    pub fn pixel_to_physical(&self, pixel: [f64; 3]) -> [f64; 3] {
        self.transform.apply(pixel)
    }
}

/// Turns calibration records into coordinate frames.
///
/// Holds only the backend's fixed correction; resolving is a pure function
/// of the record and target unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateFrameResolver {
    correction: FrameCorrection,
}

impl CoordinateFrameResolver {
    pub fn new(correction: FrameCorrection) -> Self {
        Self { correction }
    }

    pub fn resolve(
        &self,
        record: &CalibrationRecord,
        target_unit: LengthUnit,
    ) -> Result<CoordinateFrame, CalibrationError> {
        resolve_with(record, target_unit, &self.correction)
    }
}

/// Resolve a record with no backend correction.
pub fn resolve(
    record: &CalibrationRecord,
    target_unit: LengthUnit,
) -> Result<CoordinateFrame, CalibrationError> {
    resolve_with(record, target_unit, &FrameCorrection::default())
}

/// Resolve a record, wrapping the result in `correction.pre` / `correction.post`.
pub fn resolve_with(
    record: &CalibrationRecord,
    target_unit: LengthUnit,
    correction: &FrameCorrection,
) -> Result<CoordinateFrame, CalibrationError> {
    let mut voxel_size = [1.0; 3];
    let mut position = [0.0; 3];

    for axis in 0..3 {
        let voxel = to_target(
            &record.voxel_size[axis],
            &record.reference_frame_voxel,
            target_unit,
        )
        .unwrap_or(1.0);
        if !voxel.is_finite() {
            return Err(CalibrationError::NonFiniteVoxelSize { axis, value: voxel });
        }
        if voxel == 0.0 {
            return Err(CalibrationError::ZeroVoxelSize { axis });
        }
        voxel_size[axis] = voxel;

        let offset = to_target(
            &record.position[axis],
            &record.reference_frame_position,
            target_unit,
        )
        .unwrap_or(0.0);
        if !offset.is_finite() {
            return Err(CalibrationError::NonFinitePosition {
                axis,
                value: offset,
            });
        }
        position[axis] = offset;
    }

    let flip = AffineTransform3D::scale(record.flip.map(|f| if f { -1.0 } else { 1.0 }));

    let mut transform = correction.pre.unwrap_or_default();
    if record.origin == OriginConvention::Center {
        let half = record.dimensions.map(|d| d as f64 / 2.0);
        transform = transform
            .then(&AffineTransform3D::translation(half.map(|h| -h)))
            .then(&flip)
            .then(&AffineTransform3D::translation(half));
    } else {
        transform = transform.then(&flip);
    }
    transform = transform
        .then(&AffineTransform3D::scale(voxel_size))
        .then(&AffineTransform3D::translation(position));
    if let Some(post) = correction.post {
        transform = transform.then(&post);
    }

    Ok(CoordinateFrame {
        transform,
        unit: target_unit,
        voxel_size,
        position,
    })
}

/// Convert one measure to the target unit, or `None` if its unit is unknown.
fn to_target(measure: &Measure, reference: &Length, target: LengthUnit) -> Option<f64> {
    match measure.unit {
        UnitSpec::Physical(unit) => Some(unit.convert(measure.value, target)),
        UnitSpec::ReferenceFrame => Some(measure.value * reference.to(target)),
        UnitSpec::Unknown => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
