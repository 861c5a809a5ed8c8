//! Two-level grid addressing
//!
//! The world is a 32768 x 32768 fine grid; 32 x 32 fine cells collapse
//! into one coarse cell, giving a 1024 x 1024 coarse directory that fits
//! in 4 MiB of RAM. A fine cell id encodes `row * 32768 + column`; a
//! coarse cell id encodes `row * 1024 + column`.

use crate::coord::{Coordinate, COORDINATE_SCALE};

/// Fine cells per axis
pub const FINE_CELLS_PER_AXIS: u32 = 32_768;

/// Total number of fine cells (2^30)
pub const FINE_CELL_COUNT: u64 = (FINE_CELLS_PER_AXIS as u64) * (FINE_CELLS_PER_AXIS as u64);

/// Coarse cells per axis
pub const COARSE_CELLS_PER_AXIS: u32 = 1_024;

/// Total number of coarse cells, and entries in the RAM directory
pub const COARSE_CELL_COUNT: usize = (COARSE_CELLS_PER_AXIS as usize) * (COARSE_CELLS_PER_AXIS as usize);

/// Fine cells per coarse cell along one axis
pub const FINE_PER_COARSE_AXIS: u32 = 32;

/// Fine cells per coarse cell, and entries in a block's inner directory
pub const LOCAL_CELL_COUNT: usize = (FINE_PER_COARSE_AXIS * FINE_PER_COARSE_AXIS) as usize;

/// Sentinel for an empty directory entry and for slab termination
pub const NO_ENTRY: u32 = u32::MAX;

/// Longitude mapped to [0, 1] across the world
pub fn unit_x(lon: i32) -> f64 {
    (lon as f64 / COORDINATE_SCALE + 180.0) / 360.0
}

/// Latitude mapped to [0, 1] across the world
pub fn unit_y(lat: i32) -> f64 {
    (lat as f64 / COORDINATE_SCALE + 90.0) / 180.0
}

/// Fine cell id of a coordinate.
///
/// The row base is computed as a 30-bit product masked down to a multiple
/// of the axis length, which is exact in `f64` and avoids a separate
/// multiply of row by axis width. Total over valid coordinates: the
/// extremes (lat 90, lon 180) land in the last row and column.
pub fn fine_cell_index(coord: &Coordinate) -> u32 {
    let mut row_base = (1_073_741_824.0 * unit_y(coord.lat)) as u32;
    row_base -= row_base % FINE_CELLS_PER_AXIS;
    row_base = row_base.min((FINE_CELLS_PER_AXIS - 1) * FINE_CELLS_PER_AXIS);

    let column =
        ((FINE_CELLS_PER_AXIS as f64 * unit_x(coord.lon)) as u32).min(FINE_CELLS_PER_AXIS - 1);

    row_base + column
}

/// Coarse cell owning a fine cell
pub fn coarse_cell_index(fine: u32) -> u32 {
    let row = fine / FINE_CELLS_PER_AXIS / FINE_PER_COARSE_AXIS;
    let column = fine % FINE_CELLS_PER_AXIS / FINE_PER_COARSE_AXIS;
    row * COARSE_CELLS_PER_AXIS + column
}

/// Position of a fine cell inside its coarse cell's 32 x 32 block.
///
/// The fine cells of a coarse cell form a dense arithmetic subset, so the
/// slot is pure arithmetic; no lookup table is needed.
pub fn local_cell_index(fine: u32) -> u32 {
    let row = fine / FINE_CELLS_PER_AXIS % FINE_PER_COARSE_AXIS;
    let column = fine % FINE_CELLS_PER_AXIS % FINE_PER_COARSE_AXIS;
    row * FINE_PER_COARSE_AXIS + column
}
