//! Pool bounds as seen by a backend.

use std::sync::Arc;
use std::time::Duration;

use multiscale_bridge::{ImageConfig, ImageRegistry};

use super::test_utils::{descriptor, small_config, CountingFactory, TrackingSource};

fn slow_source() -> TrackingSource {
    TrackingSource::new([64, 64, 1], [16, 16, 1], 1, |_, x, _, _| x as u16)
        .with_delay(Duration::from_millis(20))
}

#[tokio::test]
async fn test_fixed_pool_bounds_concurrent_reads() {
    let source = slow_source();
    let tracker = source.tracker();
    let factory = CountingFactory::new();

    let registry = ImageRegistry::new(small_config(1));
    let image = Arc::new(
        registry
            .open(&descriptor("/fixed.tif"), source, factory.clone())
            .await
            .unwrap(),
    );

    let tasks: Vec<_> = (0..4u64)
        .map(|x| {
            let image = image.clone();
            tokio::spawn(async move { image.get_tile(0, 0, [x, 0, 0]).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(tracker.read_count().await, 4);
    assert_eq!(tracker.max_concurrent_reads(), 1);
    assert_eq!(factory.created(), 1);

    Arc::try_unwrap(image).unwrap().close().await;
    assert_eq!(factory.destroyed(), 1);
}

#[tokio::test]
async fn test_dynamic_pool_grows_then_shrinks() {
    let source = slow_source();
    let tracker = source.tracker();
    let factory = CountingFactory::new();

    let registry = ImageRegistry::new(ImageConfig {
        dynamic_pool: true,
        ..small_config(2)
    });
    let image = Arc::new(
        registry
            .open(&descriptor("/dynamic.tif"), source, factory.clone())
            .await
            .unwrap(),
    );

    let tasks: Vec<_> = (0..4u64)
        .map(|x| {
            let image = image.clone();
            tokio::spawn(async move { image.get_tile(0, 0, [x, 0, 0]).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(tracker.max_concurrent_reads(), 4);
    assert_eq!(factory.created(), 4);

    // Excess handles are retired as they come back
    let stats = image.pool_stats();
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(factory.destroyed(), 2);

    Arc::try_unwrap(image).unwrap().close().await;
    assert_eq!(factory.destroyed(), 4);
}
