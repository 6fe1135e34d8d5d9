use thiserror::Error;

use crate::pixel::PixelKind;

/// Errors reported by a raw tile backend or its handle factory.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Local or remote I/O failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Image container or series not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Raw bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Errors returned by the resource pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The factory could not produce a decode handle
    #[error("Failed to create pooled resource: {0}")]
    ResourceCreation(#[source] SourceError),

    /// The pool is draining or closed
    #[error("Resource pool is shut down")]
    Shutdown,
}

/// Errors found while resolving a coordinate frame from calibration data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    /// A voxel size is NaN or infinite
    #[error("Non-finite voxel size on axis {axis}: {value}")]
    NonFiniteVoxelSize { axis: usize, value: f64 },

    /// A voxel size resolved to zero, which would collapse the axis
    #[error("Zero voxel size on axis {axis}")]
    ZeroVoxelSize { axis: usize },

    /// A stage position is NaN or infinite
    #[error("Non-finite stage position on axis {axis}: {value}")]
    NonFinitePosition { axis: usize, value: f64 },
}

/// Errors that can occur while serving a tile.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The backend failed to produce raw bytes for a level-0 tile
    #[error("Failed to decode tile t={timepoint} cell={cell:?}: {source}")]
    Decode {
        timepoint: u32,
        cell: [u64; 3],
        #[source]
        source: SourceError,
    },

    /// Downsampling or buffer wrapping does not handle this pixel kind
    #[error("Unsupported pixel kind: {0:?}")]
    UnsupportedPixelKind(PixelKind),

    /// Backend returned a buffer that does not match the cell
    #[error("Tile buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    /// Requested level does not exist
    #[error("Invalid level {level}: image has {num_levels} levels")]
    InvalidLevel { level: usize, num_levels: usize },

    /// Requested timepoint does not exist
    #[error("Invalid timepoint {timepoint}: image has {num_timepoints} timepoints")]
    InvalidTimepoint { timepoint: u32, num_timepoints: u32 },

    /// Requested cell lies outside the level's grid
    #[error("Cell {cell:?} out of bounds at level {level} (grid {grid:?})")]
    CellOutOfBounds {
        level: usize,
        cell: [u64; 3],
        grid: [u64; 3],
    },

    /// Could not obtain a decode handle
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// The task computing this tile went away before finishing
    #[error("Tile computation was abandoned")]
    Abandoned,

    /// The image was closed while the tile was requested
    #[error("Image is closed")]
    Closed,
}

/// Fatal errors raised while constructing a virtual image.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// The series declares a pixel kind that cannot be downsampled
    #[error("Unsupported pixel kind: {0:?}")]
    UnsupportedPixelKind(PixelKind),

    /// The series calibration is corrupt
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// The series reports empty dimensions or cells
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Pre-warming the decode handles failed
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// The registry has been shut down
    #[error("Image registry is shut down")]
    RegistryClosed,
}
