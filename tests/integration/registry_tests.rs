//! Registry deduplication and teardown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use multiscale_bridge::{ImageConfig, ImageRegistry, RawDataKey, SourceDescriptor, TileError};

use super::test_utils::{descriptor, small_config, CountingFactory, TrackingSource};

fn source() -> TrackingSource {
    TrackingSource::new([64, 64, 1], [16, 16, 1], 1, |_, x, y, _| (x * y) as u16)
}

fn prewarmed(pool_size: usize) -> ImageConfig {
    ImageConfig {
        prewarm: true,
        ..small_config(pool_size)
    }
}

#[tokio::test]
async fn test_prewarm_creates_pool_once_per_key() {
    let registry = ImageRegistry::new(prewarmed(3));
    let factory = CountingFactory::with_delay(Duration::from_millis(5));

    let plate = descriptor("/plate.czi");
    let (a, b, c) = tokio::join!(
        registry.open(&plate, source(), factory.clone()),
        registry.open(&plate, source(), factory.clone()),
        registry.open(&plate, source(), factory.clone()),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(factory.created(), 3);
    assert_eq!(registry.live_count(), 1);
    assert_eq!(registry.openers(a.raw_data_key()), 3);
    assert_eq!(a.pool_stats().created, 3);
    assert_eq!(a.pool_stats().idle, 3);

    a.close().await;
    b.close().await;
    assert_eq!(factory.destroyed(), 0);

    c.close().await;
    assert_eq!(factory.destroyed(), 3);
    assert_eq!(registry.live_count(), 0);
}

#[tokio::test]
async fn test_channels_are_separate_series() {
    let registry = ImageRegistry::new(prewarmed(2));
    let factory = CountingFactory::new();

    let red = registry
        .open(&descriptor("/plate.czi"), source(), factory.clone())
        .await
        .unwrap();
    let green = registry
        .open(
            &SourceDescriptor {
                channel: 1,
                ..descriptor("/plate.czi")
            },
            source(),
            factory.clone(),
        )
        .await
        .unwrap();

    assert_ne!(red.raw_data_key(), green.raw_data_key());
    assert_eq!(factory.created(), 4);
    assert_eq!(registry.live_count(), 2);

    // Both series cache into the one store
    red.get_tile(0, 0, [0, 0, 0]).await.unwrap();
    green.get_tile(0, 0, [0, 0, 0]).await.unwrap();
    assert_eq!(registry.tile_store().len().await, 2);

    red.close().await;
    assert_eq!(registry.tile_store().len().await, 1);
    assert!(green.get_tile(0, 0, [0, 0, 0]).await.is_ok());
    green.close().await;
}

#[tokio::test]
async fn test_key_matches_descriptor() {
    let registry = ImageRegistry::new(small_config(1));
    let d = descriptor("/data/a.ome.tiff");

    let image = registry
        .open(&d, source(), CountingFactory::new())
        .await
        .unwrap();
    assert_eq!(image.raw_data_key(), &RawDataKey::from_descriptor(&d));
    image.close().await;
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_tiles() {
    let registry = ImageRegistry::new(small_config(1));
    let factory = CountingFactory::new();
    let slow = source().with_delay(Duration::from_secs(30));

    let image = Arc::new(
        registry
            .open(&descriptor("/slow.tif"), slow, factory.clone())
            .await
            .unwrap(),
    );

    let pending = {
        let image = image.clone();
        tokio::spawn(async move { image.get_tile(0, 1, [0, 0, 0]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), registry.shutdown())
        .await
        .expect("shutdown must not wait for the slow read");

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(TileError::Closed)));
    assert!(image.pool_stats().closed);
    assert_eq!(factory.destroyed(), factory.created());
    assert!(matches!(
        image.get_tile(0, 0, [1, 1, 0]).await,
        Err(TileError::Closed)
    ));
}

#[tokio::test]
async fn test_slow_open_does_not_block_other_keys() {
    let registry = ImageRegistry::new(prewarmed(2));
    let other = registry
        .open(&descriptor("/fast.tif"), source(), CountingFactory::new())
        .await
        .unwrap();
    let slow = CountingFactory::with_delay(Duration::from_millis(500));

    let remote = descriptor("/remote.czi");
    let (opened, close_took) = tokio::join!(
        registry.open(&remote, source(), slow.clone()),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(registry.live_count(), 1);
            let started = Instant::now();
            other.close().await;
            started.elapsed()
        },
    );

    assert!(close_took < Duration::from_millis(250), "close waited {:?}", close_took);
    let opened = opened.unwrap();
    assert_eq!(slow.created(), 2);
    assert_eq!(registry.live_count(), 1);
    opened.close().await;
}

#[tokio::test]
async fn test_cancelled_open_hands_over_to_waiter() {
    let registry = ImageRegistry::new(prewarmed(2));
    let slow = CountingFactory::with_delay(Duration::from_millis(100));
    let fast = CountingFactory::new();

    let plate = descriptor("/plate.czi");
    let (cancelled, waiter) = tokio::join!(
        tokio::time::timeout(
            Duration::from_millis(50),
            registry.open(&plate, source(), slow.clone()),
        ),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            registry
                .open(&descriptor("/plate.czi"), source(), fast.clone())
                .await
        },
    );

    assert!(cancelled.is_err());
    let image = waiter.unwrap();
    assert_eq!(fast.created(), 2);
    assert_eq!(registry.openers(image.raw_data_key()), 1);
    image.close().await;
    assert_eq!(fast.destroyed(), 2);
}

#[tokio::test]
async fn test_failed_open_leaves_key_free() {
    let registry = ImageRegistry::new(prewarmed(1));
    let factory = CountingFactory::with_delay(Duration::from_millis(20));
    let empty = || TrackingSource::new([0, 64, 1], [16, 16, 1], 1, |_, _, _, _| 0);

    let empty_tif = descriptor("/empty.tif");
    let (a, b) = tokio::join!(
        registry.open(&empty_tif, empty(), factory.clone()),
        registry.open(&empty_tif, empty(), factory.clone()),
    );

    assert!(a.is_err());
    assert!(b.is_err());
    assert_eq!(registry.live_count(), 0);

    let image = registry
        .open(&descriptor("/empty.tif"), source(), factory.clone())
        .await
        .unwrap();
    assert_eq!(registry.openers(image.raw_data_key()), 1);
    image.close().await;
}
