//! Lazy pyramid cache for one series.
//!
//! Level-0 tiles are decoded through the [`RawTileSource`] with a handle
//! borrowed from the [`ResourcePool`]. Level-N tiles are synthesized from up
//! to four level-(N-1) tiles with the 2×2 box filter.
//!
//! # Single-flight
//!
//! Each [`TileKey`] is computed at most once at a time:
//!
//! ```text
//!   get_tile(k) ──► store hit? ──yes──► return
//!                        │ no
//!                        ▼
//!                 in-flight for k? ──yes──► wait on its watch channel
//!                        │ no
//!                        ▼
//!                 spawn computation, wait on its watch channel
//! ```
//!
//! The computation runs on its own task, so it belongs to no caller: a
//! request that times out or is dropped stops waiting, and everyone else
//! still gets the result. Level-N computations request their children
//! through the same path, so nested reads race safely. A failed computation
//! is published to every waiter and not stored; the next request retries.
//! Shutting the cache down stops in-flight computations with
//! [`TileError::Closed`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::TileError;
use crate::pixel::{downsample_2x, PixelKind};
use crate::pool::ResourcePool;
use crate::source::RawTileSource;

use super::level::{CellRegion, PyramidLevelSpec};
use super::store::{TileBuffer, TileKey, TileStore};

type TileResult = Result<TileBuffer, TileError>;
type TileFuture = Pin<Box<dyn Future<Output = TileResult> + Send>>;

/// Channel through which a computation publishes its result.
type Slot = watch::Receiver<Option<TileResult>>;

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served from the store
    pub hits: u64,
    /// Requests that joined another task's computation
    pub joined: u64,
    /// Computations performed (decodes plus downsamples)
    pub computations: u64,
    /// Computations that failed
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    joined: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

/// Per-series tile cache with on-demand level synthesis.
pub struct PyramidCache<S: RawTileSource> {
    inner: Arc<CacheInner<S>>,
}

struct CacheInner<S: RawTileSource> {
    series_id: Arc<str>,
    source: Arc<S>,
    pool: Arc<ResourcePool<S::Handle>>,
    store: Arc<TileStore>,
    levels: Vec<PyramidLevelSpec>,
    kind: PixelKind,
    bytes_per_pixel: usize,
    num_timepoints: u32,
    in_flight: Mutex<HashMap<TileKey, Slot>>,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

impl<S: RawTileSource> PyramidCache<S> {
    /// Create a cache for one series.
    ///
    /// # Errors
    ///
    /// [`TileError::UnsupportedPixelKind`] if the source's pixel kind cannot
    /// be carried or downsampled.
    pub fn new(
        series_id: impl Into<Arc<str>>,
        source: Arc<S>,
        pool: Arc<ResourcePool<S::Handle>>,
        store: Arc<TileStore>,
        levels: Vec<PyramidLevelSpec>,
    ) -> Result<Self, TileError> {
        let kind = source.pixel_kind();
        let bytes_per_pixel = kind.checked_bytes_per_pixel()?;
        let num_timepoints = source.num_timepoints();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(CacheInner {
                series_id: series_id.into(),
                source,
                pool,
                store,
                levels,
                kind,
                bytes_per_pixel,
                num_timepoints,
                in_flight: Mutex::new(HashMap::new()),
                shutdown,
                counters: Counters::default(),
            }),
        })
    }

    /// Get one tile, computing it (and any missing lower tiles) if needed.
    ///
    /// Must be called from within a tokio runtime; computations are spawned
    /// onto it.
    pub async fn get_tile(&self, timepoint: u32, level: usize, cell: [u64; 3]) -> TileResult {
        self.inner.fetch(timepoint, level, cell).await
    }

    /// Geometry of every level.
    pub fn levels(&self) -> &[PyramidLevelSpec] {
        &self.inner.levels
    }

    pub fn series_id(&self) -> &str {
        &self.inner.series_id
    }

    pub fn pixel_kind(&self) -> PixelKind {
        self.inner.kind
    }

    pub fn num_timepoints(&self) -> u32 {
        self.inner.num_timepoints
    }

    /// The pool this cache decodes through.
    pub fn pool(&self) -> &Arc<ResourcePool<S::Handle>> {
        &self.inner.pool
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            computations: counters.computations.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop all in-flight computations and reject further requests.
    ///
    /// Waiters on stopped computations receive [`TileError::Closed`].
    /// Stored tiles of this series are dropped from the shared store, and
    /// computations finishing afterwards do not store theirs.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let removed = self.inner.store.remove_series(&self.inner.series_id).await;
        debug!(series = %self.inner.series_id, removed, "Pyramid cache shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl<S: RawTileSource> CacheInner<S> {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Boxed so that level-N computations can recurse into level N-1.
    fn fetch(self: &Arc<Self>, timepoint: u32, level: usize, cell: [u64; 3]) -> TileFuture {
        let this = Arc::clone(self);
        Box::pin(async move {
            if this.is_shut_down() {
                return Err(TileError::Closed);
            }
            let region = this.region(timepoint, level, cell)?;
            let key = TileKey::new(this.series_id.clone(), timepoint, level, cell);

            if let Some(tile) = this.store.get(&key).await {
                this.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(tile);
            }

            let (slot, leader) = {
                let mut in_flight = this.lock_in_flight();
                match in_flight.get(&key) {
                    Some(slot) => {
                        this.counters.joined.fetch_add(1, Ordering::Relaxed);
                        (slot.clone(), None)
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(key.clone(), rx.clone());
                        (rx, Some(tx))
                    }
                }
            };

            if let Some(tx) = leader {
                let guard = InFlightGuard {
                    cache: Arc::clone(&this),
                    key: Some(key.clone()),
                    tx,
                };
                tokio::spawn(Arc::clone(&this).lead(guard, key, region));
            }

            wait_for_result(slot).await
        })
    }

    /// Runs on its own task; publishes to every waiter of `key`.
    async fn lead(self: Arc<Self>, guard: InFlightGuard<S>, key: TileKey, region: CellRegion) {
        // A previous computation may have stored the tile between our lookup
        // and our registration.
        if let Some(tile) = self.store.get(&key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            guard.publish(Ok(tile));
            return;
        }

        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        let shutdown = self.shutdown.subscribe();
        let result = tokio::select! {
            result = self.compute(key.timepoint, key.level, region) => result,
            _ = wait_for_shutdown(shutdown) => Err(TileError::Closed),
        };

        match &result {
            Ok(tile) => {
                debug!(
                    series = %self.series_id,
                    timepoint = key.timepoint,
                    level = key.level,
                    cell = ?key.cell,
                    bytes = tile.len(),
                    "Computed tile"
                );
                // Checked under the store lock so a concurrent shutdown's
                // remove_series cannot miss this tile.
                self.store
                    .put_if(key, tile.clone(), || !self.is_shut_down())
                    .await;
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    series = %self.series_id,
                    timepoint = key.timepoint,
                    level = key.level,
                    cell = ?key.cell,
                    error = %e,
                    "Tile computation failed"
                );
            }
        }

        guard.publish(result);
    }

    fn region(&self, timepoint: u32, level: usize, cell: [u64; 3]) -> Result<CellRegion, TileError> {
        if timepoint >= self.num_timepoints {
            return Err(TileError::InvalidTimepoint {
                timepoint,
                num_timepoints: self.num_timepoints,
            });
        }
        let spec = self.levels.get(level).ok_or(TileError::InvalidLevel {
            level,
            num_levels: self.levels.len(),
        })?;
        spec.cell_region(cell).ok_or(TileError::CellOutOfBounds {
            level,
            cell,
            grid: spec.grid,
        })
    }

    // -------------------------------------------------------------------------
    // Computation
    // -------------------------------------------------------------------------

    async fn compute(
        self: &Arc<Self>,
        timepoint: u32,
        level: usize,
        region: CellRegion,
    ) -> TileResult {
        if level == 0 {
            self.decode(timepoint, region).await
        } else {
            self.downsample(timepoint, level, region).await
        }
    }

    /// Read a level-0 cell through a pooled handle.
    async fn decode(&self, timepoint: u32, region: CellRegion) -> TileResult {
        let data = {
            let mut handle = self.pool.acquire().await?;
            self.source
                .read_tile(&mut *handle, timepoint, &region)
                .await
                .map_err(|source| TileError::Decode {
                    timepoint,
                    cell: region.cell,
                    source,
                })?
        };

        let expected = region.num_pixels() * self.bytes_per_pixel;
        if data.len() != expected {
            return Err(TileError::BufferSize {
                expected,
                actual: data.len(),
            });
        }

        Ok(TileBuffer {
            kind: self.kind,
            level: 0,
            region,
            data,
        })
    }

    /// Build a level-N cell from the four level-(N-1) cells beneath it.
    async fn downsample(
        self: &Arc<Self>,
        timepoint: u32,
        level: usize,
        region: CellRegion,
    ) -> TileResult {
        let lower = self.levels[level - 1];
        let [cx, cy, cz] = region.cell;

        let (c00, c10, c01, c11) = tokio::try_join!(
            self.child(timepoint, &lower, [2 * cx, 2 * cy, cz]),
            self.child(timepoint, &lower, [2 * cx + 1, 2 * cy, cz]),
            self.child(timepoint, &lower, [2 * cx, 2 * cy + 1, cz]),
            self.child(timepoint, &lower, [2 * cx + 1, 2 * cy + 1, cz]),
        )?;

        let src_min = [2 * region.min[0], 2 * region.min[1], region.min[2]];
        let src_dims = [
            (2 * region.size[0] as u64).min(lower.dimensions[0] - src_min[0]) as usize,
            (2 * region.size[1] as u64).min(lower.dimensions[1] - src_min[1]) as usize,
            region.size[2] as usize,
        ];

        let bpp = self.bytes_per_pixel;
        let [src_w, src_h, src_d] = src_dims;
        let mut assembled = vec![0u8; src_w * src_h * src_d * bpp];

        for child in [c00, c10, c01, c11].into_iter().flatten() {
            let [w, h, d] = child.region.size_usize();
            let ox = (child.region.min[0] - src_min[0]) as usize;
            let oy = (child.region.min[1] - src_min[1]) as usize;
            let row = w * bpp;

            for z in 0..d {
                for y in 0..h {
                    let src = (z * h + y) * row;
                    let dst = ((z * src_h + oy + y) * src_w + ox) * bpp;
                    assembled[dst..dst + row].copy_from_slice(&child.data[src..src + row]);
                }
            }
        }

        let data = downsample_2x(self.kind, &assembled, src_dims)?;

        Ok(TileBuffer {
            kind: self.kind,
            level,
            region,
            data: data.into(),
        })
    }

    /// A child tile, or `None` where the parent hangs over the lower level's edge.
    async fn child(
        self: &Arc<Self>,
        timepoint: u32,
        lower: &PyramidLevelSpec,
        cell: [u64; 3],
    ) -> Result<Option<TileBuffer>, TileError> {
        if (0..3).any(|axis| cell[axis] >= lower.grid[axis]) {
            return Ok(None);
        }
        self.fetch(timepoint, lower.level, cell).await.map(Some)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<TileKey, Slot>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// In-flight bookkeeping
// =============================================================================

/// Owned by the task computing a key.
///
/// Dropping it unregisters the key and closes the channel. Waiters that saw
/// no result (the task panicked or the runtime shut down) get
/// [`TileError::Abandoned`].
struct InFlightGuard<S: RawTileSource> {
    cache: Arc<CacheInner<S>>,
    key: Option<TileKey>,
    tx: watch::Sender<Option<TileResult>>,
}

impl<S: RawTileSource> InFlightGuard<S> {
    fn publish(&self, result: TileResult) {
        self.tx.send_replace(Some(result));
    }
}

impl<S: RawTileSource> Drop for InFlightGuard<S> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.lock_in_flight().remove(&key);
        }
    }
}

async fn wait_for_result(mut slot: Slot) -> TileResult {
    loop {
        let current = slot.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if slot.changed().await.is_err() {
            let last = slot.borrow().clone();
            return last.unwrap_or(Err(TileError::Abandoned));
        }
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        let closed = *shutdown.borrow_and_update();
        if closed {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
