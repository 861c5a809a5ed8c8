//! Read side: RAM directory, bucket decoding and nearest-edge queries
//!
//! `open` pulls the full 4 MiB directory into memory and memory-maps the
//! bucket file. Queries only touch the map through bounds-checked
//! positional slices, so a reader can serve concurrent queries from
//! shared references.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;
use memmap2::Mmap;

use crate::coord::{project_onto_segment, Coordinate, Edge, Projection};
use crate::error::{Error, Result};
use crate::grid::{self, COARSE_CELL_COUNT, FINE_CELLS_PER_AXIS, FINE_CELL_COUNT, NO_ENTRY};
use crate::writer::EDGE_RECORD_LEN;

/// Exact size of the RAM index file
const RAM_INDEX_LEN: usize = COARSE_CELL_COUNT * 4;

/// A virtual node a fraction of the way along an edge
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhantomNode {
    pub edge_start: u32,
    pub edge_target: u32,
    /// Position along the edge, in [0, 1]
    pub ratio: f64,
    /// Projection of the query point onto the edge
    pub coord: Coordinate,
}

/// Attachment points for a route's source and target coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhantomNodes {
    pub source: PhantomNode,
    pub target: PhantomNode,
}

/// Read-only handle on a built grid index
pub struct GridReader {
    directory: Vec<u32>,
    bucket: Option<Mmap>,
}

impl GridReader {
    /// Open the RAM index and bucket file written by a `GridWriter`
    pub fn open(ram_path: impl AsRef<Path>, bucket_path: impl AsRef<Path>) -> Result<Self> {
        let mut ram = File::open(ram_path)?;
        let mut raw = Vec::with_capacity(RAM_INDEX_LEN);
        ram.read_to_end(&mut raw)?;
        if raw.len() != RAM_INDEX_LEN {
            return Err(Error::Corrupt(format!(
                "RAM index is {} bytes, expected {RAM_INDEX_LEN}",
                raw.len()
            )));
        }
        let directory: Vec<u32> = raw
            .chunks_exact(4)
            .map(|entry| u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]))
            .collect();

        let bucket_file = File::open(bucket_path)?;
        let bucket = if bucket_file.metadata()?.len() == 0 {
            // An index built from zero edges has an empty bucket file,
            // which cannot be mapped
            None
        } else {
            // The files are immutable once built; nothing remaps or
            // truncates them while the reader is alive
            Some(unsafe { Mmap::map(&bucket_file)? })
        };

        let populated = directory.iter().filter(|&&offset| offset != NO_ENTRY).count();
        debug!("opened grid index with {populated} populated coarse cells");

        Ok(Self { directory, bucket })
    }

    /// Decode the slab of one fine cell. Ids outside the fine grid and
    /// cells without edges yield an empty vector.
    pub fn edges_in_cell(&self, fine: u32) -> Result<Vec<Edge>> {
        let mut edges = Vec::new();
        if fine as u64 >= FINE_CELL_COUNT {
            return Ok(edges);
        }

        let base = self.directory[grid::coarse_cell_index(fine) as usize];
        if base == NO_ENTRY {
            return Ok(edges);
        }
        let bucket = self.bucket.as_deref().ok_or_else(|| {
            Error::Corrupt("RAM index references a block but the bucket file is empty".into())
        })?;

        let entry_position = base as usize + grid::local_cell_index(fine) as usize * 4;
        let slab = read_u32(bucket, entry_position)?;
        if slab == NO_ENTRY {
            return Ok(edges);
        }

        let mut position = slab as usize;
        loop {
            // A slab holds at least a sentinel, so running out of file
            // before the first word of a record is corruption
            let start = read_u32(bucket, position)?;
            if start == NO_ENTRY {
                break;
            }
            if position + EDGE_RECORD_LEN > bucket.len() {
                return Err(Error::Corrupt(format!(
                    "edge record at offset {position} is truncated"
                )));
            }
            edges.push(decode_edge(&bucket[position..position + EDGE_RECORD_LEN]));
            position += EDGE_RECORD_LEN;
            if position >= bucket.len() {
                // Records may run to the end of the file without a sentinel
                break;
            }
        }
        Ok(edges)
    }

    /// Project the query point onto the nearest indexed edge
    pub fn find_nearest_point_on_edge(&self, input: &Coordinate) -> Result<Coordinate> {
        self.nearest_match(input)
            .map(|(_, projection)| projection.nearest)
    }

    /// Attach both endpoints of a route request to the road network
    pub fn find_routing_starts(
        &self,
        source: &Coordinate,
        target: &Coordinate,
    ) -> Result<PhantomNodes> {
        Ok(PhantomNodes {
            source: self.phantom_node(source)?,
            target: self.phantom_node(target)?,
        })
    }

    fn phantom_node(&self, input: &Coordinate) -> Result<PhantomNode> {
        let (edge, projection) = self.nearest_match(input)?;
        Ok(PhantomNode {
            edge_start: edge.start,
            edge_target: edge.target,
            ratio: projection.ratio,
            coord: projection.nearest,
        })
    }

    /// Scan the 3x3 fine-cell neighborhood of the query point and rank
    /// every candidate edge by squared planar distance.
    fn nearest_match(&self, input: &Coordinate) -> Result<(Edge, Projection)> {
        if !input.is_valid() {
            return Err(Error::InvalidCoordinate(*input));
        }

        let center = grid::fine_cell_index(input) as i64;
        let mut candidates = Vec::new();
        for row_offset in [-(FINE_CELLS_PER_AXIS as i64), 0, FINE_CELLS_PER_AXIS as i64] {
            for column_offset in [-1i64, 0, 1] {
                let fine = center + row_offset + column_offset;
                if (0..FINE_CELL_COUNT as i64).contains(&fine) {
                    candidates.extend(self.edges_in_cell(fine as u32)?);
                }
            }
        }

        let mut best: Option<(Edge, Projection)> = None;
        for edge in candidates {
            let projection = project_onto_segment(input, &edge.start_coord, &edge.target_coord);
            // Strictly closer only: on ties the first candidate in
            // bucket order wins, which is stable across rebuilds
            let closer = match &best {
                Some((_, current)) => projection.distance_sq < current.distance_sq,
                None => true,
            };
            if closer {
                best = Some((edge, projection));
            }
        }
        best.ok_or(Error::NoNearestFound)
    }
}

fn read_u32(bucket: &[u8], position: usize) -> Result<u32> {
    if position + 4 > bucket.len() {
        return Err(Error::Corrupt(format!(
            "offset {position} is past the end of the bucket file"
        )));
    }
    Ok(u32::from_le_bytes([
        bucket[position],
        bucket[position + 1],
        bucket[position + 2],
        bucket[position + 3],
    ]))
}

fn decode_edge(record: &[u8]) -> Edge {
    Edge {
        start: u32::from_le_bytes([record[0], record[1], record[2], record[3]]),
        target: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
        start_coord: Coordinate {
            lat: i32::from_le_bytes([record[8], record[9], record[10], record[11]]),
            lon: i32::from_le_bytes([record[12], record[13], record[14], record[15]]),
        },
        target_coord: Coordinate {
            lat: i32::from_le_bytes([record[16], record[17], record[18], record[19]]),
            lon: i32::from_le_bytes([record[20], record[21], record[22], record[23]]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_bounds() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0xFF];
        assert_eq!(read_u32(&bytes, 0).unwrap(), 1);
        assert!(matches!(read_u32(&bytes, 2), Err(Error::Corrupt(_))));
        assert!(matches!(read_u32(&bytes, 5), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_decode_edge_little_endian() {
        let mut record = [0u8; EDGE_RECORD_LEN];
        record[0] = 0x2A; // start = 42
        record[4] = 0x2B; // target = 43
        record[8..12].copy_from_slice(&(-5i32).to_le_bytes());
        record[12..16].copy_from_slice(&1_000_000i32.to_le_bytes());
        record[16..20].copy_from_slice(&7i32.to_le_bytes());
        record[20..24].copy_from_slice(&(-9i32).to_le_bytes());

        let edge = decode_edge(&record);
        assert_eq!(edge.start, 42);
        assert_eq!(edge.target, 43);
        assert_eq!(edge.start_coord, Coordinate::new(-5, 1_000_000));
        assert_eq!(edge.target_coord, Coordinate::new(7, -9));
    }
}
