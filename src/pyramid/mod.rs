//! Multi-resolution tile access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              VirtualImage               │
//! └────────────────────┬────────────────────┘
//!                      │ get_tile(t, level, cell)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              PyramidCache               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileStore   │  │   Box filter    │  │
//! │  │  (LRU, bytes │  │  (level N from  │  │
//! │  │   budget)    │  │   level N-1)    │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ level 0 only
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   ResourcePool  ──►  RawTileSource      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`PyramidCache`]: single-flight tile computation for one series
//! - [`TileStore`]: shared LRU of Ready tiles with size-based eviction
//! - [`TileKey`] / [`TileBuffer`]: tile identity and pixel data
//! - [`PyramidLevelSpec`] / [`CellRegion`]: level and cell geometry

mod cache;
mod level;
mod store;

pub use cache::{CacheStats, PyramidCache};
pub use level::{
    level_specs, num_levels, CellRegion, PyramidLevelSpec, DEFAULT_MAX_LEVELS,
    DEFAULT_MIN_LEVEL_SIZE,
};
pub use store::{TileBuffer, TileKey, TileStore, DEFAULT_TILE_STORE_CAPACITY};
