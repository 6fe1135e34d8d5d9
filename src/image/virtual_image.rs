//! The per-opener handle onto a shared series.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::TileError;
use crate::frame::CoordinateFrame;
use crate::pixel::PixelKind;
use crate::pool::PoolStats;
use crate::pyramid::{CacheStats, PyramidCache, PyramidLevelSpec, TileBuffer};
use crate::source::RawTileSource;

use super::key::RawDataKey;
use super::registry::RegistryInner;

/// Everything shared by the openers of one [`RawDataKey`].
pub(crate) struct SharedSeries<S: RawTileSource> {
    pub(crate) key: RawDataKey,
    pub(crate) cache: PyramidCache<S>,
    pub(crate) frame: CoordinateFrame,
}

impl<S: RawTileSource> SharedSeries<S> {
    /// Stop tile computations, then retire every decode handle.
    pub(crate) async fn shut_down(&self) {
        self.cache.shutdown().await;
        self.cache.pool().drain_and_close().await;
        debug!(key = %self.key, "Series torn down");
    }
}

/// A multi-resolution view of one series/channel.
///
/// Obtained from [`ImageRegistry::open`](super::ImageRegistry::open). Handles
/// opened with equal [`RawDataKey`]s share one decode pool and one pyramid
/// cache, so a tile computed through one is a hit through the other.
///
/// Call [`close`](Self::close) when done. A handle dropped without closing
/// still releases its opener; if it was the last one, the teardown runs as a
/// task on the current tokio runtime.
pub struct VirtualImage<S: RawTileSource> {
    series: Arc<SharedSeries<S>>,
    registry: Arc<RegistryInner<S>>,
    released: bool,
}

impl<S: RawTileSource> VirtualImage<S> {
    pub(crate) fn new(series: Arc<SharedSeries<S>>, registry: Arc<RegistryInner<S>>) -> Self {
        Self {
            series,
            registry,
            released: false,
        }
    }

    /// Dimensions (X, Y, Z) of a level, or `None` past the last level.
    pub fn dimensions(&self, level: usize) -> Option<[u64; 3]> {
        self.level_spec(level).map(|spec| spec.dimensions)
    }

    /// Geometry of a level.
    pub fn level_spec(&self, level: usize) -> Option<&PyramidLevelSpec> {
        self.series.cache.levels().get(level)
    }

    pub fn num_levels(&self) -> usize {
        self.series.cache.levels().len()
    }

    pub fn num_timepoints(&self) -> u32 {
        self.series.cache.num_timepoints()
    }

    pub fn pixel_kind(&self) -> PixelKind {
        self.series.cache.pixel_kind()
    }

    /// Level-0 pixel to physical transform, resolved once at open.
    pub fn coordinate_frame(&self) -> &CoordinateFrame {
        &self.series.frame
    }

    pub fn raw_data_key(&self) -> &RawDataKey {
        &self.series.key
    }

    /// Fetch one tile, computing it on demand.
    pub async fn get_tile(
        &self,
        timepoint: u32,
        level: usize,
        cell: [u64; 3],
    ) -> Result<TileBuffer, TileError> {
        self.series.cache.get_tile(timepoint, level, cell).await
    }

    /// Counters of the shared pyramid cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.series.cache.stats()
    }

    /// Counters of the shared decode pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.series.cache.pool().stats()
    }

    /// Release this opener.
    ///
    /// The last opener of a key tears the series down: the registry entry
    /// is removed, in-flight tiles fail with [`TileError::Closed`] and the
    /// pool is drained.
    pub async fn close(mut self) {
        self.released = true;
        let last = self.registry.release(&self.series.key);
        if let Some(series) = last {
            info!(key = %series.key, "Closing series");
            series.shut_down().await;
        } else {
            debug!(key = %self.series.key, "Released image handle");
        }
    }
}

impl<S: RawTileSource> Drop for VirtualImage<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Some(series) = self.registry.release(&self.series.key) else {
            debug!(key = %self.series.key, "Released dropped image handle");
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(key = %series.key, "Last image handle dropped without close, tearing down in background");
                runtime.spawn(async move { series.shut_down().await });
            }
            Err(_) => {
                warn!(key = %series.key, "Last image handle dropped outside a runtime, decode handles not retired");
            }
        }
    }
}

impl<S: RawTileSource> std::fmt::Debug for VirtualImage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualImage")
            .field("key", &self.series.key.canonical())
            .field("levels", &self.num_levels())
            .field("pixel_kind", &self.pixel_kind())
            .finish()
    }
}
