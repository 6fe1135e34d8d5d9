//! Backend interfaces consumed by the virtual image layer.
//!
//! A backend (file decoder, image server, in-memory array) supplies:
//!
//! - a [`RawTileSource`] describing one series/channel and reading level-0
//!   cells as raw little-endian bytes, and
//! - a [`ResourceFactory`] producing the decode handles that reads borrow
//!   from the [`ResourcePool`](crate::pool::ResourcePool).
//!
//! Everything above this layer (pool, pyramid cache, virtual image) is
//! backend-agnostic.

mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SourceError;
use crate::frame::{CalibrationRecord, FrameCorrection};
use crate::pixel::PixelKind;
use crate::pyramid::CellRegion;

pub use memory::{InMemoryHandle, InMemoryHandleFactory, InMemorySource};

/// Creates and retires pooled decode handles.
///
/// Creation is assumed to be expensive (opening a file or a session).
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    /// The handle type
    type Resource: Send + 'static;

    /// Produce a ready-to-use handle.
    async fn create(&self) -> Result<Self::Resource, SourceError>;

    /// Retire a handle that will not be pooled again.
    fn destroy(&self, resource: Self::Resource) {
        drop(resource);
    }
}

/// One series/channel of a multi-series container, read at full resolution.
#[async_trait]
pub trait RawTileSource: Send + Sync + 'static {
    /// Decode handle borrowed from the pool for each read
    type Handle: Send + 'static;

    /// Level-0 size in pixels (X, Y, Z).
    fn series_dimensions(&self) -> [u64; 3];

    /// Number of timepoints.
    fn num_timepoints(&self) -> u32;

    /// Preferred cell (tile) shape (X, Y, Z).
    fn cell_shape(&self) -> [u32; 3];

    /// Declared pixel kind.
    fn pixel_kind(&self) -> PixelKind;

    /// Calibration of this series.
    fn calibration(&self) -> CalibrationRecord;

    /// Backend-specific transform correction.
    fn frame_correction(&self) -> FrameCorrection {
        FrameCorrection::default()
    }

    /// Read the raw bytes of one level-0 cell.
    ///
    /// The result must hold exactly `region.num_pixels()` samples of
    /// [`pixel_kind`](Self::pixel_kind), X-fastest, little-endian.
    async fn read_tile(
        &self,
        handle: &mut Self::Handle,
        timepoint: u32,
        region: &CellRegion,
    ) -> Result<Bytes, SourceError>;
}
