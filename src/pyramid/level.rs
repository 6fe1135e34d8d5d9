//! Level geometry: how many levels a series gets and how each is tiled.

use serde::Serialize;

/// Default cap on the number of pyramid levels.
pub const DEFAULT_MAX_LEVELS: usize = 6;

/// Default minimum X/Y size of the coarsest synthesized level.
pub const DEFAULT_MIN_LEVEL_SIZE: u64 = 64;

/// Geometry of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PyramidLevelSpec {
    /// Level index (0 = full resolution)
    pub level: usize,

    /// `2^level`, applied to X and Y only
    pub downsample_factor: u64,

    /// Size in pixels (X, Y, Z)
    pub dimensions: [u64; 3],

    /// Cell shape (X, Y, Z), identical at every level
    pub cell_shape: [u32; 3],

    /// Number of cells along each axis
    pub grid: [u64; 3],
}

/// The pixel region covered by one cell of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CellRegion {
    /// Cell coordinate in the level's grid
    pub cell: [u64; 3],

    /// First pixel covered (X, Y, Z)
    pub min: [u64; 3],

    /// Extent in pixels, clipped at the level border
    pub size: [u32; 3],
}

impl CellRegion {
    pub fn num_pixels(&self) -> usize {
        self.size.iter().map(|&s| s as usize).product()
    }

    pub(crate) fn size_usize(&self) -> [usize; 3] {
        self.size.map(|s| s as usize)
    }
}

impl PyramidLevelSpec {
    fn new(level: usize, dimensions: [u64; 3], cell_shape: [u32; 3]) -> Self {
        let grid = [0, 1, 2].map(|axis| dimensions[axis].div_ceil(cell_shape[axis] as u64));
        Self {
            level,
            downsample_factor: 1 << level,
            dimensions,
            cell_shape,
            grid,
        }
    }

    /// Region covered by `cell`, or `None` if the cell lies outside the grid.
    pub fn cell_region(&self, cell: [u64; 3]) -> Option<CellRegion> {
        if (0..3).any(|axis| cell[axis] >= self.grid[axis]) {
            return None;
        }

        let min = [0, 1, 2].map(|axis| cell[axis] * self.cell_shape[axis] as u64);
        let size = [0, 1, 2].map(|axis| {
            let remaining = self.dimensions[axis] - min[axis];
            remaining.min(self.cell_shape[axis] as u64) as u32
        });

        Some(CellRegion { cell, min, size })
    }

    /// Total number of cells in this level.
    pub fn num_cells(&self) -> u64 {
        self.grid.iter().product()
    }
}

/// Number of levels for a series of level-0 size `dimensions`.
///
/// A level is added while both halved X and Y stay above `min_level_size`
/// and fewer than `max_levels` exist. Level 0 always exists.
pub fn num_levels(dimensions: [u64; 3], max_levels: usize, min_level_size: u64) -> usize {
    let mut levels = 1;
    let (mut x, mut y) = (dimensions[0], dimensions[1]);

    while levels < max_levels {
        let (nx, ny) = (x.div_ceil(2), y.div_ceil(2));
        if nx <= min_level_size || ny <= min_level_size {
            break;
        }
        x = nx;
        y = ny;
        levels += 1;
    }

    levels
}

/// Specs for levels `0..num_levels`. X and Y halve (rounding up) per level.
pub fn level_specs(
    dimensions: [u64; 3],
    cell_shape: [u32; 3],
    num_levels: usize,
) -> Vec<PyramidLevelSpec> {
    let mut specs = Vec::with_capacity(num_levels);
    let mut dims = dimensions;

    for level in 0..num_levels {
        specs.push(PyramidLevelSpec::new(level, dims, cell_shape));
        dims = [dims[0].div_ceil(2), dims[1].div_ceil(2), dims[2]];
    }

    specs
}
