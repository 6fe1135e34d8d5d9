//! Deduplicating registry of live series.
//!
//! The registry is an explicit context object: create one per application
//! (or per test) and open every image through it. It owns the tile store
//! shared by all series and maps each [`RawDataKey`] to its live series and
//! opener count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ImageConfig;
use crate::error::{ImageError, TileError};
use crate::frame::CoordinateFrameResolver;
use crate::pool::ResourcePool;
use crate::pyramid::{level_specs, num_levels, PyramidCache, TileStore};
use crate::source::{RawTileSource, ResourceFactory};

use super::key::{RawDataKey, SourceDescriptor};
use super::virtual_image::{SharedSeries, VirtualImage};

type OpenResult = Result<(), ImageError>;

/// Outcome of an open in progress, watched by concurrent openers of the key.
type OpenSlot = watch::Receiver<Option<OpenResult>>;

struct LiveSeries<S: RawTileSource> {
    series: Arc<SharedSeries<S>>,
    openers: usize,
}

struct RegistryState<S: RawTileSource> {
    live: HashMap<RawDataKey, LiveSeries<S>>,
    opening: HashMap<RawDataKey, OpenSlot>,
    closed: bool,
}

pub(crate) struct RegistryInner<S: RawTileSource> {
    config: ImageConfig,
    store: Arc<TileStore>,
    /// Never held across an await
    state: Mutex<RegistryState<S>>,
}

impl<S: RawTileSource> RegistryInner<S> {
    /// Drop one opener of `key`. Returns the series if it was the last one.
    pub(crate) fn release(&self, key: &RawDataKey) -> Option<Arc<SharedSeries<S>>> {
        let mut state = self.lock_state();
        let entry = state.live.get_mut(key)?;
        entry.openers -= 1;
        if entry.openers > 0 {
            return None;
        }
        state.live.remove(key).map(|live| live.series)
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState<S>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Opens [`VirtualImage`]s, sharing pools and caches between equal keys.
///
/// Concurrent opens of one key build the series once: the first becomes the
/// leader and builds without holding the registry lock, the others wait for
/// its outcome. Opens and closes of other keys are never held up by a build.
pub struct ImageRegistry<S: RawTileSource> {
    inner: Arc<RegistryInner<S>>,
}

impl<S: RawTileSource> ImageRegistry<S> {
    pub fn new(config: ImageConfig) -> Self {
        let store = Arc::new(TileStore::with_capacity(config.cache_capacity));
        Self {
            inner: Arc::new(RegistryInner {
                config,
                store,
                state: Mutex::new(RegistryState {
                    live: HashMap::new(),
                    opening: HashMap::new(),
                    closed: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.inner.config
    }

    /// The tile store shared by every series of this registry.
    pub fn tile_store(&self) -> &Arc<TileStore> {
        &self.inner.store
    }

    /// Open a series.
    ///
    /// If a live series has the same [`RawDataKey`], the new handle attaches
    /// to it and `source` and `factory` are dropped unused. If another open
    /// of the key is in progress, this waits for it and shares its outcome.
    ///
    /// # Errors
    ///
    /// - [`ImageError::RegistryClosed`] after [`shutdown`](Self::shutdown)
    /// - [`ImageError::UnsupportedPixelKind`] if the pixels cannot be downsampled
    /// - [`ImageError::InvalidDimensions`] for empty images or cells
    /// - [`ImageError::Calibration`] for corrupt calibration
    /// - [`ImageError::Pool`] if pre-warming fails
    pub async fn open<F>(
        &self,
        descriptor: &SourceDescriptor,
        source: S,
        factory: F,
    ) -> Result<VirtualImage<S>, ImageError>
    where
        F: ResourceFactory<Resource = S::Handle> + 'static,
    {
        let key = RawDataKey::from_descriptor(descriptor);

        let tx = loop {
            let slot = {
                let mut state = self.inner.lock_state();
                if state.closed {
                    return Err(ImageError::RegistryClosed);
                }

                if let Some(live) = state.live.get_mut(&key) {
                    live.openers += 1;
                    info!(key = %key, openers = live.openers, "Attached to live series");
                    return Ok(VirtualImage::new(live.series.clone(), self.inner.clone()));
                }

                match state.opening.get(&key) {
                    Some(slot) => slot.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.opening.insert(key.clone(), rx);
                        break tx;
                    }
                }
            };

            debug!(key = %key, "Waiting for concurrent open");
            if let Some(Err(e)) = wait_for_open(slot).await {
                return Err(e);
            }
            // Opened (attach on the next pass) or abandoned (take over)
        };

        let guard = OpeningGuard {
            inner: &self.inner,
            key: Some(key.clone()),
            tx,
        };

        let series = match self.build(key.clone(), source, factory).await {
            Ok(series) => Arc::new(series),
            Err(e) => {
                guard.finish(Err(e.clone()));
                return Err(e);
            }
        };

        let registered = {
            let mut state = self.inner.lock_state();
            if state.closed {
                false
            } else {
                state.live.insert(
                    key.clone(),
                    LiveSeries {
                        series: series.clone(),
                        openers: 1,
                    },
                );
                true
            }
        };

        if !registered {
            series.shut_down().await;
            guard.finish(Err(ImageError::RegistryClosed));
            return Err(ImageError::RegistryClosed);
        }

        info!(
            key = %key,
            levels = series.cache.levels().len(),
            pixel_kind = ?series.cache.pixel_kind(),
            "Opened series"
        );
        guard.finish(Ok(()));
        Ok(VirtualImage::new(series, self.inner.clone()))
    }

    /// Tear down every live series and refuse further opens.
    ///
    /// Outstanding [`VirtualImage`]s stay valid objects but their tile
    /// requests fail with [`TileError::Closed`]. Opens still building fail
    /// with [`ImageError::RegistryClosed`] once their build completes.
    pub async fn shutdown(&self) {
        let live: Vec<_> = {
            let mut state = self.inner.lock_state();
            state.closed = true;
            state.live.drain().map(|(_, live)| live).collect()
        };

        if !live.is_empty() {
            info!(series = live.len(), "Shutting down image registry");
        }
        for entry in live {
            if entry.openers > 0 {
                warn!(key = %entry.series.key, openers = entry.openers, "Series still open at shutdown");
            }
            entry.series.shut_down().await;
        }
    }

    /// Number of live series.
    pub fn live_count(&self) -> usize {
        self.inner.lock_state().live.len()
    }

    /// Opener count of a key, zero if it is not live.
    pub fn openers(&self, key: &RawDataKey) -> usize {
        self.inner
            .lock_state()
            .live
            .get(key)
            .map_or(0, |live| live.openers)
    }

    async fn build<F>(
        &self,
        key: RawDataKey,
        source: S,
        factory: F,
    ) -> Result<SharedSeries<S>, ImageError>
    where
        F: ResourceFactory<Resource = S::Handle> + 'static,
    {
        let config = &self.inner.config;

        let kind = source.pixel_kind();
        if !kind.is_downsamplable() {
            return Err(ImageError::UnsupportedPixelKind(kind));
        }

        let dimensions = source.series_dimensions();
        let cell_shape = source.cell_shape();
        if dimensions.contains(&0) {
            return Err(ImageError::InvalidDimensions(format!(
                "series dimensions {:?} contain zero",
                dimensions
            )));
        }
        if cell_shape.contains(&0) {
            return Err(ImageError::InvalidDimensions(format!(
                "cell shape {:?} contains zero",
                cell_shape
            )));
        }
        if source.num_timepoints() == 0 {
            return Err(ImageError::InvalidDimensions(
                "series has no timepoints".to_string(),
            ));
        }

        let frame = CoordinateFrameResolver::new(source.frame_correction())
            .resolve(&source.calibration(), config.target_unit)?;

        let count = num_levels(dimensions, config.max_levels, config.min_level_size);
        let levels = level_specs(dimensions, cell_shape, count);

        let pool = Arc::new(ResourcePool::new(
            config.pool_size,
            config.dynamic_pool,
            factory,
        ));
        if config.prewarm {
            if let Err(e) = pool.prewarm().await {
                pool.drain_and_close().await;
                return Err(e.into());
            }
        }

        let cache = PyramidCache::new(
            key.digest(),
            Arc::new(source),
            pool.clone(),
            self.inner.store.clone(),
            levels,
        )
        .map_err(|e| match e {
            TileError::UnsupportedPixelKind(kind) => ImageError::UnsupportedPixelKind(kind),
            other => ImageError::InvalidDimensions(other.to_string()),
        });
        let cache = match cache {
            Ok(cache) => cache,
            Err(e) => {
                pool.drain_and_close().await;
                return Err(e);
            }
        };

        Ok(SharedSeries { key, cache, frame })
    }
}

/// Held by the task building a key.
///
/// Dropping it without [`finish`](Self::finish) (the open was cancelled)
/// frees the key, and waiters take over the build.
struct OpeningGuard<'a, S: RawTileSource> {
    inner: &'a RegistryInner<S>,
    key: Option<RawDataKey>,
    tx: watch::Sender<Option<OpenResult>>,
}

impl<S: RawTileSource> OpeningGuard<'_, S> {
    fn finish(mut self, result: OpenResult) {
        if let Some(key) = self.key.take() {
            self.inner.lock_state().opening.remove(&key);
        }
        self.tx.send_replace(Some(result));
    }
}

impl<S: RawTileSource> Drop for OpeningGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.lock_state().opening.remove(&key);
        }
    }
}

/// The outcome of another task's open, or `None` if it was abandoned.
async fn wait_for_open(mut slot: OpenSlot) -> Option<OpenResult> {
    loop {
        let current = slot.borrow_and_update().clone();
        if current.is_some() {
            return current;
        }
        if slot.changed().await.is_err() {
            return slot.borrow().clone();
        }
    }
}
