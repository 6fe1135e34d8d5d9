//! Coordinate frames for image series.
//!
//! Backends describe calibration in heterogeneous ways: physical units,
//! unit-less "reference frame" scales, missing units, flipped axes and
//! centre- or corner-anchored origins. This module turns a
//! [`CalibrationRecord`] into one [`CoordinateFrame`] per series.
//!
//! ```
//! use multiscale_bridge::frame::{
//!     resolve, CalibrationRecord, LengthUnit, Measure, OriginConvention,
//! };
//!
//! let mut record = CalibrationRecord::uncalibrated([100, 100, 1]);
//! record.voxel_size = [Measure::physical(0.5, LengthUnit::Micrometer); 3];
//! record.flip = [true, false, false];
//! record.origin = OriginConvention::Center;
//!
//! let frame = resolve(&record, LengthUnit::Micrometer).unwrap();
//! assert_eq!(frame.pixel_to_physical([0.0, 0.0, 0.0])[0], 50.0);
//! ```

mod affine;
mod calibration;
mod resolver;
mod units;

pub use affine::AffineTransform3D;
pub use calibration::{CalibrationRecord, OriginConvention};
pub use resolver::{resolve, resolve_with, CoordinateFrame, CoordinateFrameResolver, FrameCorrection};
pub use units::{Length, LengthUnit, Measure, UnitSpec};
