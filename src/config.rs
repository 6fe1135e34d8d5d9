//! Configuration for the bridge and its demo binary.
//!
//! Settings come from command-line arguments or from environment variables
//! with the `MSB_` prefix, with defaults for everything:
//!
//! - `MSB_POOL_SIZE` - Decode handles per series (default: 4)
//! - `MSB_DYNAMIC_POOL` - Let the pool grow past its size under load (default: false)
//! - `MSB_PREWARM` - Create all handles when a series is opened (default: false)
//! - `MSB_CACHE_BYTES` - Tile store capacity in bytes (default: 256MB)
//! - `MSB_MAX_LEVELS` - Upper bound on pyramid levels (default: 6)
//! - `MSB_MIN_LEVEL_SIZE` - Smallest X/Y extent that still gets a level (default: 64)
//! - `MSB_TARGET_UNIT` - Physical unit of coordinate frames (default: µm)
//!
//! The library itself only sees [`ImageConfig`], produced by
//! [`Config::image_config`].

use clap::Parser;
use serde::Serialize;

use crate::frame::LengthUnit;
use crate::pyramid::{DEFAULT_MAX_LEVELS, DEFAULT_MIN_LEVEL_SIZE, DEFAULT_TILE_STORE_CAPACITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of decode handles per series.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default demo image width and height.
pub const DEFAULT_DEMO_EXTENT: u64 = 2048;

/// Default demo cell edge.
pub const DEFAULT_DEMO_CELL: u32 = 256;

/// Default number of concurrent demo workers.
pub const DEFAULT_DEMO_WORKERS: usize = 8;

// =============================================================================
// Library configuration
// =============================================================================

/// Settings shared by every image opened through one registry.
///
/// Built once and passed by value; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageConfig {
    /// Decode handles per series
    pub pool_size: usize,
    /// Whether the pool may create handles past `pool_size`
    pub dynamic_pool: bool,
    /// Create `pool_size` handles when a series is first opened
    pub prewarm: bool,
    /// Tile store capacity in bytes, shared by all series
    pub cache_capacity: usize,
    /// Upper bound on pyramid levels
    pub max_levels: usize,
    /// Levels stop once X or Y would drop to this size
    pub min_level_size: u64,
    /// Unit of resolved coordinate frames
    pub target_unit: LengthUnit,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            dynamic_pool: false,
            prewarm: false,
            cache_capacity: DEFAULT_TILE_STORE_CAPACITY,
            max_levels: DEFAULT_MAX_LEVELS,
            min_level_size: DEFAULT_MIN_LEVEL_SIZE,
            target_unit: LengthUnit::Micrometer,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Multiscale Bridge - lazy pyramids over multi-series microscopy images.
///
/// Runs a synthetic in-memory series through the pool, pyramid cache and
/// registry and prints a JSON summary.
#[derive(Parser, Debug, Clone)]
#[command(name = "multiscale-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Pool Configuration
    // =========================================================================
    /// Number of decode handles per series.
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, env = "MSB_POOL_SIZE")]
    pub pool_size: usize,

    /// Allow the pool to create extra handles instead of queueing.
    #[arg(long, default_value_t = false, env = "MSB_DYNAMIC_POOL")]
    pub dynamic_pool: bool,

    /// Create every handle up front when a series is opened.
    #[arg(long, default_value_t = false, env = "MSB_PREWARM")]
    pub prewarm: bool,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Tile store capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_STORE_CAPACITY, env = "MSB_CACHE_BYTES")]
    pub cache_bytes: usize,

    // =========================================================================
    // Pyramid Configuration
    // =========================================================================
    /// Maximum number of pyramid levels, level 0 included.
    #[arg(long, default_value_t = DEFAULT_MAX_LEVELS, env = "MSB_MAX_LEVELS")]
    pub max_levels: usize,

    /// Stop adding levels once X or Y would shrink to this size.
    #[arg(long, default_value_t = DEFAULT_MIN_LEVEL_SIZE, env = "MSB_MIN_LEVEL_SIZE")]
    pub min_level_size: u64,

    /// Unit of resolved coordinate frames (m, mm, um, nm, angstrom, pm).
    #[arg(long, default_value = "um", env = "MSB_TARGET_UNIT")]
    pub target_unit: LengthUnit,

    // =========================================================================
    // Demo Workload
    // =========================================================================
    /// Width of the synthetic series in pixels.
    #[arg(long, default_value_t = DEFAULT_DEMO_EXTENT)]
    pub width: u64,

    /// Height of the synthetic series in pixels.
    #[arg(long, default_value_t = DEFAULT_DEMO_EXTENT)]
    pub height: u64,

    /// Number of Z planes.
    #[arg(long, default_value_t = 1)]
    pub depth: u64,

    /// Number of timepoints.
    #[arg(long, default_value_t = 1)]
    pub timepoints: u32,

    /// Edge of the square level-0 cells.
    #[arg(long, default_value_t = DEFAULT_DEMO_CELL)]
    pub cell_size: u32,

    /// Number of concurrent tile workers.
    #[arg(short, long, default_value_t = DEFAULT_DEMO_WORKERS)]
    pub workers: usize,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".to_string());
        }
        if self.cache_bytes == 0 {
            return Err("cache_bytes must be greater than 0".to_string());
        }
        if self.max_levels == 0 {
            return Err("max_levels must be at least 1".to_string());
        }
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err("width, height and depth must be greater than 0".to_string());
        }
        if self.timepoints == 0 {
            return Err("timepoints must be greater than 0".to_string());
        }
        if self.cell_size == 0 {
            return Err("cell_size must be greater than 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }

        // The demo keeps every timepoint in RAM as u8
        let volume = self
            .width
            .checked_mul(self.height)
            .and_then(|v| v.checked_mul(self.depth))
            .and_then(|v| v.checked_mul(self.timepoints as u64));
        match volume {
            Some(v) if v <= 1 << 32 => {}
            _ => return Err("synthetic series is larger than 4GiB".to_string()),
        }

        Ok(())
    }

    /// The library-facing part of the configuration.
    pub fn image_config(&self) -> ImageConfig {
        ImageConfig {
            pool_size: self.pool_size,
            dynamic_pool: self.dynamic_pool,
            prewarm: self.prewarm,
            cache_capacity: self.cache_bytes,
            max_levels: self.max_levels,
            min_level_size: self.min_level_size,
            target_unit: self.target_unit,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
