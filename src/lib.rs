//! # Multiscale Bridge
//!
//! Lazy multi-resolution access to multi-series microscopy images.
//!
//! A backend exposes each series/channel as full-resolution cells through
//! [`RawTileSource`]. This crate turns it into a [`VirtualImage`] with:
//!
//! - **Pooled decoding**: backend handles are expensive, so a bounded
//!   [`ResourcePool`] lends them to concurrent readers
//! - **Lazy pyramid**: lower resolutions are synthesized on demand with a 2×2
//!   box filter and cached, with single-flight per tile
//! - **Coordinate frames**: calibration metadata is resolved into one affine
//!   pixel-to-physical transform
//! - **Deduplication**: openers of the same raw data share one pool and cache
//!   through the [`ImageRegistry`]
//!
//! ## Architecture
//!
//! - [`source`] - Backend traits and the in-memory backend
//! - [`pool`] - Bounded pool of decode handles
//! - [`pixel`] - Pixel kinds and the box filter
//! - [`pyramid`] - Level planning, tile store and the single-flight cache
//! - [`frame`] - Units, affine transforms and calibration resolution
//! - [`image`] - Raw data keys, the registry and virtual images
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust
//! use multiscale_bridge::{
//!     BackendKind, ImageConfig, ImageRegistry, InMemoryHandleFactory, InMemorySource,
//!     SourceDescriptor,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = InMemorySource::synthetic_u8([512, 512, 1], [128, 128, 1], 1, |_, x, y, _| {
//!         (x ^ y) as u8
//!     })
//!     .unwrap();
//!
//!     let registry = ImageRegistry::new(ImageConfig::default());
//!     let descriptor = SourceDescriptor::new(BackendKind::InMemory, "demo");
//!     let image = registry
//!         .open(&descriptor, source, InMemoryHandleFactory::new())
//!         .await
//!         .unwrap();
//!
//!     // 512 -> 256 -> 128; another halving would reach the 64 pixel floor
//!     assert_eq!(image.num_levels(), 3);
//!     let tile = image.get_tile(0, 2, [0, 0, 0]).await.unwrap();
//!     assert_eq!(tile.len(), 128 * 128);
//!
//!     image.close().await;
//! }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod image;
pub mod pixel;
pub mod pool;
pub mod pyramid;
pub mod source;

// Re-export commonly used types
pub use config::{Config, ImageConfig, DEFAULT_POOL_SIZE};
pub use error::{CalibrationError, ImageError, PoolError, SourceError, TileError};
pub use frame::{
    AffineTransform3D, CalibrationRecord, CoordinateFrame, CoordinateFrameResolver,
    FrameCorrection, Length, LengthUnit, Measure, OriginConvention, UnitSpec,
};
pub use image::{BackendKind, ImageRegistry, RawDataKey, SourceDescriptor, VirtualImage};
pub use pixel::{downsample_2x, downsampled_dims, PixelKind};
pub use pool::{PoolStats, PooledResource, ResourcePool};
pub use pyramid::{
    level_specs, num_levels, CacheStats, CellRegion, PyramidCache, PyramidLevelSpec, TileBuffer,
    TileKey, TileStore, DEFAULT_MAX_LEVELS, DEFAULT_MIN_LEVEL_SIZE, DEFAULT_TILE_STORE_CAPACITY,
};
pub use source::{InMemoryHandle, InMemoryHandleFactory, InMemorySource, RawTileSource, ResourceFactory};
