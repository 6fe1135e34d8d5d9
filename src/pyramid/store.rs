//! Size-bounded LRU store for Ready tiles.
//!
//! Tiles are kept by [`TileKey`] and evicted least-recently-used first once
//! the total byte size exceeds capacity. Buffers are reference-counted
//! [`Bytes`], so evicting a tile only drops the store's reference: callers
//! still holding a [`TileBuffer`] keep reading valid data.
//!
//! One store is shared by every series opened through the same
//! [`ImageRegistry`](crate::image::ImageRegistry), giving a single memory
//! budget across images.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::pixel::PixelKind;

use super::level::CellRegion;

/// Default store capacity: 256MB
pub const DEFAULT_TILE_STORE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 100_000;

// =============================================================================
// Tile Key
// =============================================================================

/// Identifies one tile of one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Digest of the series' raw data key
    pub series_id: Arc<str>,

    pub timepoint: u32,

    /// Pyramid level (0 = full resolution)
    pub level: usize,

    /// Cell coordinate within the level's grid
    pub cell: [u64; 3],
}

impl TileKey {
    pub fn new(series_id: impl Into<Arc<str>>, timepoint: u32, level: usize, cell: [u64; 3]) -> Self {
        Self {
            series_id: series_id.into(),
            timepoint,
            level,
            cell,
        }
    }
}

// =============================================================================
// Tile Buffer
// =============================================================================

/// Pixels of one tile. Immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBuffer {
    /// Pixel kind of `data`
    pub kind: PixelKind,

    /// Level the tile belongs to
    pub level: usize,

    /// Region of the level covered by `data`
    pub region: CellRegion,

    /// Little-endian samples, X-fastest
    pub data: Bytes,
}

impl TileBuffer {
    /// Size of the pixel data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Region size (X, Y, Z).
    pub fn dimensions(&self) -> [u32; 3] {
        self.region.size
    }
}

// =============================================================================
// Tile Store
// =============================================================================

struct StoreInner {
    entries: LruCache<TileKey, TileBuffer>,
    current_size: usize,
}

/// LRU store for tiles with size-based capacity.
///
/// # Example
///
/// ```
/// use multiscale_bridge::pyramid::{CellRegion, TileBuffer, TileKey, TileStore};
/// use multiscale_bridge::PixelKind;
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let store = TileStore::with_capacity(1024 * 1024);
///
///     let key = TileKey::new("series-a", 0, 0, [0, 0, 0]);
///     let tile = TileBuffer {
///         kind: PixelKind::U8,
///         level: 0,
///         region: CellRegion { cell: [0, 0, 0], min: [0, 0, 0], size: [2, 2, 1] },
///         data: Bytes::from(vec![1, 2, 3, 4]),
///     };
///
///     store.put(key.clone(), tile.clone()).await;
///     assert_eq!(store.get(&key).await, Some(tile));
/// }
/// ```
pub struct TileStore {
    inner: Mutex<StoreInner>,
    max_size: usize,
}

impl TileStore {
    /// Create a store with the default capacity (256MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_STORE_CAPACITY)
    }

    /// Create a store holding at most `max_size` bytes of tile data.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a store bounded both in bytes and in number of entries.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(StoreInner {
                entries: LruCache::new(max_entries),
                current_size: 0,
            }),
            max_size,
        }
    }

    /// Get a tile, marking it recently used.
    pub async fn get(&self, key: &TileKey) -> Option<TileBuffer> {
        let mut inner = self.inner.lock().await;
        inner.entries.get(key).cloned()
    }

    /// Check for a tile without updating LRU order.
    pub async fn contains(&self, key: &TileKey) -> bool {
        let inner = self.inner.lock().await;
        inner.entries.contains(key)
    }

    /// Store a tile, evicting least-recently-used entries while over capacity.
    pub async fn put(&self, key: TileKey, tile: TileBuffer) {
        let mut inner = self.inner.lock().await;
        self.insert(&mut inner, key, tile);
    }

    /// Store a tile only if `admit` still holds once the store is locked.
    ///
    /// Returns whether the tile was stored. A concurrent
    /// [`remove_series`](Self::remove_series) is ordered entirely before or
    /// after the check.
    pub async fn put_if<F>(&self, key: TileKey, tile: TileBuffer, admit: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut inner = self.inner.lock().await;
        if !admit() {
            return false;
        }
        self.insert(&mut inner, key, tile);
        true
    }

    fn insert(&self, inner: &mut StoreInner, key: TileKey, tile: TileBuffer) {
        let tile_size = tile.len();

        if let Some(old) = inner.entries.peek(&key) {
            let old_size = old.len();
            inner.current_size = inner.current_size.saturating_sub(old_size);
        }

        // Entry-count eviction happens inside the LRU itself
        if let Some((evicted_key, evicted)) = inner.entries.push(key.clone(), tile) {
            if evicted_key != key {
                inner.current_size = inner.current_size.saturating_sub(evicted.len());
            }
        }
        inner.current_size += tile_size;

        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
    }

    /// Remove one tile.
    pub async fn remove(&self, key: &TileKey) -> Option<TileBuffer> {
        let mut inner = self.inner.lock().await;
        let removed = inner.entries.pop(key);
        if let Some(ref tile) = removed {
            inner.current_size = inner.current_size.saturating_sub(tile.len());
        }
        removed
    }

    /// Remove every tile of one series. Returns the number removed.
    pub async fn remove_series(&self, series_id: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let keys: Vec<TileKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| &*key.series_id == series_id)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(tile) = inner.entries.pop(key) {
                inner.current_size = inner.current_size.saturating_sub(tile.len());
            }
        }
        keys.len()
    }

    /// Remove all tiles.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.current_size = 0;
    }

    /// Number of stored tiles.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Total stored bytes.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.current_size
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for TileStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
