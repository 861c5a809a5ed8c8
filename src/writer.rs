//! Build pipeline: rasterized edges to bucket file plus RAM directory
//!
//! Edges are rasterized as they arrive and buffered as `(coarse, fine,
//! edge)` records in the external sorter. `build` drains the sorted
//! stream, groups it into one block per populated coarse cell and writes
//! the two on-disk artifacts:
//!
//! - the bucket file: per coarse cell, a 1024-entry inner directory of
//!   absolute slab offsets followed by the sentinel-terminated slabs
//! - the RAM index: 1 Mi little-endian offsets, one per coarse cell
//!
//! The build is deterministic: identical input edge sets produce
//! byte-identical files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::coord::Edge;
use crate::error::{Error, Result};
use crate::grid::{self, COARSE_CELL_COUNT, LOCAL_CELL_COUNT, NO_ENTRY};
use crate::raster;
use crate::sort::{ExternalSorter, GridEntry};

/// Serialized size of one edge record in a slab
pub const EDGE_RECORD_LEN: usize = 24;

/// Serialized size of a block's inner directory
const INNER_DIRECTORY_LEN: usize = LOCAL_CELL_COUNT * 4;

/// One-shot builder for the on-disk grid index
pub struct GridWriter {
    entries: ExternalSorter,
    cells: Vec<(u32, u32)>,
    built: bool,
}

impl GridWriter {
    pub fn new() -> Self {
        Self {
            entries: ExternalSorter::new(),
            cells: Vec::new(),
            built: false,
        }
    }

    /// Bound the in-memory run of the external sort to `run_capacity`
    /// records; smaller runs spill to temp files earlier
    pub fn with_run_capacity(run_capacity: usize) -> Self {
        Self {
            entries: ExternalSorter::with_run_capacity(run_capacity),
            cells: Vec::new(),
            built: false,
        }
    }

    /// Register an edge. Duplicates are allowed and collapse during the
    /// build; coordinates must be inside the legal lat/lon range.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if self.built {
            return Err(Error::AlreadyBuilt);
        }
        for coord in [edge.start_coord, edge.target_coord] {
            if !coord.is_valid() {
                return Err(Error::InvalidCoordinate(coord));
            }
        }

        self.cells.clear();
        raster::rasterize_edge(&edge.start_coord, &edge.target_coord, &mut self.cells);
        for &(fine, coarse) in &self.cells {
            self.entries.push(GridEntry { coarse, fine, edge })?;
        }
        Ok(())
    }

    /// Sort, group and serialize all registered edges. Terminal: the
    /// writer rejects further use afterwards, even if the build failed.
    pub fn build(&mut self, ram_path: impl AsRef<Path>, bucket_path: impl AsRef<Path>) -> Result<()> {
        if self.built {
            return Err(Error::AlreadyBuilt);
        }
        self.built = true;

        let entries = std::mem::take(&mut self.entries);
        let record_count = entries.len();
        info!("sorting {record_count} rasterized edge records");

        let mut directory = vec![NO_ENTRY; COARSE_CELL_COUNT];
        let mut bucket = BufWriter::new(File::create(bucket_path)?);
        let mut cursor: u64 = 0;
        let mut used_cells: u64 = 0;

        let mut group: Vec<GridEntry> = Vec::new();
        for entry in entries.into_sorted()? {
            let entry = entry?;
            if group.last().is_some_and(|last| last.coarse != entry.coarse) {
                cursor = flush_block(&mut bucket, &mut group, cursor, &mut directory)?;
                used_cells += 1;
            }
            group.push(entry);
        }
        if !group.is_empty() {
            cursor = flush_block(&mut bucket, &mut group, cursor, &mut directory)?;
            used_cells += 1;
        }
        bucket.flush()?;

        let mut ram = BufWriter::new(File::create(ram_path)?);
        for &offset in &directory {
            ram.write_all(&offset.to_le_bytes())?;
        }
        ram.flush()?;

        info!("grid built: {record_count} records in {used_cells} coarse cells, {cursor} bucket bytes");
        Ok(())
    }
}

impl Default for GridWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one coarse-cell block and clear the group. Returns the file
/// cursor after the block.
fn flush_block<W: Write>(
    out: &mut W,
    group: &mut Vec<GridEntry>,
    block_base: u64,
    directory: &mut [u32],
) -> Result<u64> {
    let coarse = group[0].coarse;
    debug_assert!(group.iter().all(|entry| entry.coarse == coarse));

    // Slab order and exact-duplicate suppression. The merge already
    // yields key order, but re-sorting keeps this step independent of
    // how the stream was produced.
    group.sort_unstable();
    group.dedup();

    let mut inner = [NO_ENTRY; LOCAL_CELL_COUNT];
    let mut slabs: Vec<u8> = Vec::with_capacity(group.len() * EDGE_RECORD_LEN);
    let mut current_fine = None;

    for entry in group.iter() {
        if current_fine != Some(entry.fine) {
            if current_fine.is_some() {
                slabs.extend_from_slice(&NO_ENTRY.to_le_bytes());
            }
            let slab_start = block_base + (INNER_DIRECTORY_LEN + slabs.len()) as u64;
            inner[grid::local_cell_index(entry.fine) as usize] = checked_offset(slab_start)?;
            current_fine = Some(entry.fine);
        }
        encode_edge(&entry.edge, &mut slabs);
    }
    slabs.extend_from_slice(&NO_ENTRY.to_le_bytes());

    directory[coarse as usize] = checked_offset(block_base)?;

    for &offset in &inner {
        out.write_all(&offset.to_le_bytes())?;
    }
    out.write_all(&slabs)?;

    group.clear();
    Ok(block_base + (INNER_DIRECTORY_LEN + slabs.len()) as u64)
}

fn encode_edge(edge: &Edge, out: &mut Vec<u8>) {
    out.extend_from_slice(&edge.start.to_le_bytes());
    out.extend_from_slice(&edge.target.to_le_bytes());
    out.extend_from_slice(&edge.start_coord.lat.to_le_bytes());
    out.extend_from_slice(&edge.start_coord.lon.to_le_bytes());
    out.extend_from_slice(&edge.target_coord.lat.to_le_bytes());
    out.extend_from_slice(&edge.target_coord.lon.to_le_bytes());
}

/// Directory offsets are 32-bit on disk; a bucket file past 4 GiB cannot
/// be addressed
fn checked_offset(offset: u64) -> Result<u32> {
    if offset >= NO_ENTRY as u64 {
        return Err(Error::Io(std::io::Error::other(
            "bucket file exceeds the 4 GiB offset limit",
        )));
    }
    Ok(offset as u32)
}
