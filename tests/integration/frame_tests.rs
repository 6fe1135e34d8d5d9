//! Coordinate frames resolved through opened images.

use multiscale_bridge::{
    AffineTransform3D, CalibrationRecord, FrameCorrection, ImageConfig, ImageError,
    ImageRegistry, Length, LengthUnit, Measure, OriginConvention, UnitSpec,
};

use super::test_utils::{descriptor, small_config, CountingFactory, TrackingSource};

fn calibrated(record: CalibrationRecord) -> TrackingSource {
    TrackingSource::new([100, 100, 1], [50, 50, 1], 1, |_, _, _, _| 0).with_calibration(record)
}

fn half_micron_flipped_x(origin: OriginConvention) -> CalibrationRecord {
    let mut record = CalibrationRecord::uncalibrated([100, 100, 1]);
    record.voxel_size = [Measure::physical(0.5, LengthUnit::Micrometer); 3];
    record.flip = [true, false, false];
    record.origin = origin;
    record
}

#[tokio::test]
async fn test_center_and_corner_flip() {
    let registry = ImageRegistry::new(small_config(1));

    let corner = registry
        .open(
            &descriptor("/corner.tif"),
            calibrated(half_micron_flipped_x(OriginConvention::Corner)),
            CountingFactory::new(),
        )
        .await
        .unwrap();
    let center = registry
        .open(
            &descriptor("/center.tif"),
            calibrated(half_micron_flipped_x(OriginConvention::Center)),
            CountingFactory::new(),
        )
        .await
        .unwrap();

    let corner_frame = corner.coordinate_frame();
    assert_eq!(corner_frame.pixel_to_physical([0.0, 0.0, 0.0])[0], 0.0);
    assert_eq!(corner_frame.pixel_to_physical([10.0, 0.0, 0.0])[0], -5.0);

    let center_frame = center.coordinate_frame();
    assert_eq!(center_frame.pixel_to_physical([0.0, 0.0, 0.0])[0], 50.0);
    assert_eq!(center_frame.pixel_to_physical([100.0, 0.0, 0.0])[0], 0.0);
    // Unflipped axes are unaffected by the origin convention
    assert_eq!(center_frame.pixel_to_physical([0.0, 10.0, 0.0])[1], 5.0);

    corner.close().await;
    center.close().await;
}

#[tokio::test]
async fn test_target_unit_and_reference_frame() {
    let registry = ImageRegistry::new(ImageConfig {
        target_unit: LengthUnit::Nanometer,
        ..small_config(1)
    });

    let mut record = CalibrationRecord::uncalibrated([100, 100, 1]);
    record.voxel_size = [
        Measure::physical(0.5, LengthUnit::Micrometer),
        Measure::new(2.0, UnitSpec::ReferenceFrame),
        Measure::unknown(3.0),
    ];
    record.position = [
        Measure::physical(1.0, LengthUnit::Millimeter),
        Measure::new(4.0, UnitSpec::ReferenceFrame),
        Measure::unknown(9.0),
    ];
    record.reference_frame_voxel = Length::new(0.25, LengthUnit::Micrometer);
    record.reference_frame_position = Length::new(1.0, LengthUnit::Micrometer);

    let image = registry
        .open(&descriptor("/units.tif"), calibrated(record), CountingFactory::new())
        .await
        .unwrap();
    let frame = image.coordinate_frame();

    assert_eq!(frame.unit, LengthUnit::Nanometer);
    assert_eq!(frame.voxel_size, [500.0, 500.0, 1.0]);
    assert_eq!(frame.position, [1_000_000.0, 4000.0, 0.0]);
    assert_eq!(
        frame.pixel_to_physical([2.0, 2.0, 2.0]),
        [1_001_000.0, 5000.0, 2.0]
    );

    image.close().await;
}

#[tokio::test]
async fn test_backend_correction_wraps_transform() {
    let registry = ImageRegistry::new(small_config(1));
    let mut record = CalibrationRecord::uncalibrated([100, 100, 1]);
    record.voxel_size = [Measure::physical(2.0, LengthUnit::Micrometer); 3];

    let source = calibrated(record).with_correction(FrameCorrection {
        pre: None,
        post: Some(AffineTransform3D::translation([10.0, 0.0, 0.0])),
    });
    let image = registry
        .open(&descriptor("/corrected.tif"), source, CountingFactory::new())
        .await
        .unwrap();

    assert_eq!(
        image.coordinate_frame().pixel_to_physical([1.0, 1.0, 0.0]),
        [12.0, 2.0, 0.0]
    );
    image.close().await;
}

#[tokio::test]
async fn test_same_calibration_same_frame() {
    let registry = ImageRegistry::new(small_config(1));
    let record = half_micron_flipped_x(OriginConvention::Center);

    let a = registry
        .open(&descriptor("/a.tif"), calibrated(record.clone()), CountingFactory::new())
        .await
        .unwrap();
    let b = registry
        .open(&descriptor("/b.tif"), calibrated(record), CountingFactory::new())
        .await
        .unwrap();

    let (ma, mb) = (
        a.coordinate_frame().transform.matrix(),
        b.coordinate_frame().transform.matrix(),
    );
    for (ra, rb) in ma.iter().zip(mb.iter()) {
        for (va, vb) in ra.iter().zip(rb.iter()) {
            assert_eq!(va.to_bits(), vb.to_bits());
        }
    }

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_zero_voxel_size_rejected() {
    let registry = ImageRegistry::new(small_config(1));
    let factory = CountingFactory::new();
    let mut record = CalibrationRecord::uncalibrated([100, 100, 1]);
    record.voxel_size[2] = Measure::physical(0.0, LengthUnit::Micrometer);

    let result = registry
        .open(&descriptor("/zero.tif"), calibrated(record), factory.clone())
        .await;
    assert!(matches!(result, Err(ImageError::Calibration(_))));
    assert_eq!(factory.created(), 0);
    assert_eq!(registry.live_count(), 0);
}
