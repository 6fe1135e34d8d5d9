//! Pyramid contents and single-flight behaviour through the public API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use multiscale_bridge::{ImageConfig, ImageRegistry, PixelKind, TileError};

use super::test_utils::{
    descriptor, reference_downsample, small_config, u16_samples, CountingFactory, TrackingSource,
};

fn gradient(t: u32, x: u64, y: u64, z: u64) -> u16 {
    (x * 1013 + y * 7919 + z * 31 + t as u64 * 65_000) as u16
}

/// Full reference planes for every level of a `TrackingSource`.
fn reference_pyramid(
    source: &TrackingSource,
    t: u32,
    dims: [u64; 3],
    levels: usize,
) -> Vec<(Vec<u16>, [u64; 3])> {
    let [w, h, d] = dims;
    let mut base = Vec::with_capacity((w * h * d) as usize);
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                base.push(source.sample(t, x, y, z));
            }
        }
    }

    let mut out = vec![(base, dims)];
    for _ in 1..levels {
        let (values, dims) = out.last().expect("level 0 present");
        out.push(reference_downsample(values, *dims));
    }
    out
}

#[tokio::test]
async fn test_every_tile_matches_reference() {
    let dims = [63, 47, 2];
    let source = TrackingSource::new(dims, [8, 8, 1], 2, gradient);
    let references: Vec<_> = (0..2)
        .map(|t| reference_pyramid(&source, t, dims, 3))
        .collect();

    let registry = ImageRegistry::new(small_config(2));
    let image = registry
        .open(&descriptor("/ref.tif"), source, CountingFactory::new())
        .await
        .unwrap();

    // 63x47 -> 32x24 -> 16x12; halving again gives 6 in Y
    assert_eq!(image.num_levels(), 3);
    assert_eq!(image.pixel_kind(), PixelKind::U16);

    for t in 0..2u32 {
        for level in 0..image.num_levels() {
            let spec = *image.level_spec(level).unwrap();
            let (plane, [w, h, _]) = &references[t as usize][level];
            assert_eq!(spec.dimensions[0], *w);
            assert_eq!(spec.dimensions[1], *h);

            for z in 0..spec.grid[2] {
                for y in 0..spec.grid[1] {
                    for x in 0..spec.grid[0] {
                        let tile = image.get_tile(t, level, [x, y, z]).await.unwrap();
                        let region = tile.region;
                        let samples = u16_samples(&tile.data);

                        let mut i = 0;
                        for rz in 0..region.size[2] as u64 {
                            for ry in 0..region.size[1] as u64 {
                                for rx in 0..region.size[0] as u64 {
                                    let px = region.min[0] + rx;
                                    let py = region.min[1] + ry;
                                    let pz = region.min[2] + rz;
                                    let expected = plane[((pz * h + py) * w + px) as usize];
                                    assert_eq!(
                                        samples[i], expected,
                                        "t={} level={} pixel=({}, {}, {})",
                                        t, level, px, py, pz
                                    );
                                    i += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    image.close().await;
}

#[tokio::test]
async fn test_concurrent_requests_decode_each_cell_once() {
    let source = TrackingSource::new([32, 32, 1], [8, 8, 1], 1, gradient)
        .with_delay(Duration::from_millis(20));
    let tracker = source.tracker();

    let registry = ImageRegistry::new(ImageConfig {
        min_level_size: 4,
        ..small_config(3)
    });
    let a = Arc::new(
        registry
            .open(&descriptor("/shared.tif"), source, CountingFactory::new())
            .await
            .unwrap(),
    );
    let b = Arc::new(
        registry
            .open(
                &descriptor("/shared.tif"),
                TrackingSource::new([32, 32, 1], [8, 8, 1], 1, gradient),
                CountingFactory::new(),
            )
            .await
            .unwrap(),
    );

    // 32 -> 16 -> 8: level 2 holds one cell built from all 16 level-0 cells
    assert_eq!(a.num_levels(), 3);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let image = if i % 2 == 0 { a.clone() } else { b.clone() };
        tasks.push(tokio::spawn(async move {
            image.get_tile(0, 2, [0, 0, 0]).await
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap().unwrap());
    }
    for tile in &results[1..] {
        assert_eq!(tile.data, results[0].data);
    }

    let reads = tracker.reads().await;
    assert_eq!(reads.len(), 16);
    let distinct: HashSet<_> = reads.into_iter().collect();
    assert_eq!(distinct.len(), 16);

    // 16 decodes + 4 level-1 tiles + 1 level-2 tile
    assert_eq!(a.cache_stats().computations, 21);

    Arc::try_unwrap(a).unwrap().close().await;
    Arc::try_unwrap(b).unwrap().close().await;
}

#[tokio::test]
async fn test_recomputation_is_bit_identical() {
    let registry = ImageRegistry::new(small_config(2));

    let first = {
        let image = registry
            .open(
                &descriptor("/again.tif"),
                TrackingSource::new([40, 40, 1], [16, 16, 1], 1, gradient),
                CountingFactory::new(),
            )
            .await
            .unwrap();
        let tile = image.get_tile(0, 1, [1, 1, 0]).await.unwrap();
        let cached = image.get_tile(0, 1, [1, 1, 0]).await.unwrap();
        assert_eq!(tile.data, cached.data);
        image.close().await;
        tile
    };

    // A fresh series recomputes from scratch
    let image = registry
        .open(
            &descriptor("/again.tif"),
            TrackingSource::new([40, 40, 1], [16, 16, 1], 1, gradient),
            CountingFactory::new(),
        )
        .await
        .unwrap();
    let second = image.get_tile(0, 1, [1, 1, 0]).await.unwrap();
    assert_eq!(image.cache_stats().hits, 0);
    assert_eq!(first.data, second.data);
    image.close().await;
}

#[tokio::test]
async fn test_out_of_range_requests() {
    let registry = ImageRegistry::new(small_config(1));
    let image = registry
        .open(
            &descriptor("/bounds.tif"),
            TrackingSource::new([32, 32, 1], [16, 16, 1], 2, gradient),
            CountingFactory::new(),
        )
        .await
        .unwrap();

    assert!(matches!(
        image.get_tile(2, 0, [0, 0, 0]).await,
        Err(TileError::InvalidTimepoint { timepoint: 2, num_timepoints: 2 })
    ));
    assert!(matches!(
        image.get_tile(0, 7, [0, 0, 0]).await,
        Err(TileError::InvalidLevel { level: 7, .. })
    ));
    assert!(matches!(
        image.get_tile(0, 1, [1, 0, 0]).await,
        Err(TileError::CellOutOfBounds { level: 1, .. })
    ));
    assert!(image.get_tile(1, 1, [0, 0, 0]).await.is_ok());

    image.close().await;
}
