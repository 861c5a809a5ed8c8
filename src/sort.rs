//! Out-of-core buffer for rasterized edge records
//!
//! Continent-scale graphs produce more `(cell, edge)` records than fit in
//! memory. Records accumulate in a bounded in-memory run; full runs are
//! sorted and spilled to anonymous temp files, and the final sorted stream
//! is a k-way merge over all runs. Anonymous temp files are unlinked by
//! the OS as soon as the handles drop, on success and failure alike.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use log::debug;
use rayon::prelude::*;

use crate::coord::{Coordinate, Edge};
use crate::error::Result;

/// Serialized size of one grid entry in a spill run
const ENCODED_ENTRY_LEN: usize = 32;

/// Entries per in-memory run before spilling (256 MiB of records)
const DEFAULT_RUN_CAPACITY: usize = 8 * 1024 * 1024;

/// One rasterized occurrence of an edge in a fine cell.
///
/// Field order is the sort key: coarse cell first, fine cell second, then
/// the full edge record so that equal keys collapse deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GridEntry {
    pub coarse: u32,
    pub fine: u32,
    pub edge: Edge,
}

impl GridEntry {
    fn encode(&self, buf: &mut [u8; ENCODED_ENTRY_LEN]) {
        buf[0..4].copy_from_slice(&self.coarse.to_le_bytes());
        buf[4..8].copy_from_slice(&self.fine.to_le_bytes());
        buf[8..12].copy_from_slice(&self.edge.start.to_le_bytes());
        buf[12..16].copy_from_slice(&self.edge.target.to_le_bytes());
        buf[16..20].copy_from_slice(&self.edge.start_coord.lat.to_le_bytes());
        buf[20..24].copy_from_slice(&self.edge.start_coord.lon.to_le_bytes());
        buf[24..28].copy_from_slice(&self.edge.target_coord.lat.to_le_bytes());
        buf[28..32].copy_from_slice(&self.edge.target_coord.lon.to_le_bytes());
    }

    fn decode(buf: &[u8; ENCODED_ENTRY_LEN]) -> Self {
        Self {
            coarse: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            fine: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            edge: Edge {
                start: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
                target: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
                start_coord: Coordinate {
                    lat: i32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
                    lon: i32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
                },
                target_coord: Coordinate {
                    lat: i32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
                    lon: i32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]),
                },
            },
        }
    }
}

/// Spillable accumulation buffer with a sorted drain
pub struct ExternalSorter {
    run_capacity: usize,
    pending: Vec<GridEntry>,
    runs: Vec<File>,
    total: u64,
}

impl ExternalSorter {
    pub fn new() -> Self {
        Self::with_run_capacity(DEFAULT_RUN_CAPACITY)
    }

    /// `run_capacity` is the number of entries held in memory per run
    pub fn with_run_capacity(run_capacity: usize) -> Self {
        assert!(run_capacity > 0, "run capacity must be positive");
        Self {
            run_capacity,
            pending: Vec::new(),
            runs: Vec::new(),
            total: 0,
        }
    }

    pub fn push(&mut self, entry: GridEntry) -> Result<()> {
        self.pending.push(entry);
        self.total += 1;
        if self.pending.len() >= self.run_capacity {
            self.spill_run()?;
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn spill_run(&mut self) -> Result<()> {
        self.pending.par_sort_unstable();

        let mut file = tempfile::tempfile()?;
        {
            let mut writer = BufWriter::new(&mut file);
            let mut buf = [0u8; ENCODED_ENTRY_LEN];
            for entry in &self.pending {
                entry.encode(&mut buf);
                writer.write_all(&buf)?;
            }
            writer.flush()?;
        }
        file.seek(SeekFrom::Start(0))?;

        debug!("spilled sorted run of {} grid entries", self.pending.len());
        self.runs.push(file);
        self.pending.clear();
        Ok(())
    }

    /// Drain the buffer as a globally sorted stream. Pure in-memory sort
    /// when nothing was spilled, otherwise a heap merge over all runs.
    pub fn into_sorted(mut self) -> Result<SortedEntries> {
        if self.runs.is_empty() {
            self.pending.par_sort_unstable();
            return Ok(SortedEntries::Memory(self.pending.into_iter()));
        }

        if !self.pending.is_empty() {
            self.spill_run()?;
        }

        let mut readers = Vec::with_capacity(self.runs.len());
        let mut heap = BinaryHeap::with_capacity(self.runs.len());
        for (run, file) in self.runs.into_iter().enumerate() {
            let mut reader = BufReader::with_capacity(1 << 20, file);
            if let Some(entry) = read_entry(&mut reader)? {
                heap.push(Reverse((entry, run)));
            }
            readers.push(reader);
        }
        Ok(SortedEntries::Merge { readers, heap })
    }
}

impl Default for ExternalSorter {
    fn default() -> Self {
        Self::new()
    }
}

/// Sorted drain of an [`ExternalSorter`]
pub enum SortedEntries {
    Memory(std::vec::IntoIter<GridEntry>),
    Merge {
        readers: Vec<BufReader<File>>,
        // Run index breaks ties so the merge order is deterministic
        heap: BinaryHeap<Reverse<(GridEntry, usize)>>,
    },
}

impl Iterator for SortedEntries {
    type Item = Result<GridEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SortedEntries::Memory(entries) => entries.next().map(Ok),
            SortedEntries::Merge { readers, heap } => {
                let Reverse((entry, run)) = heap.pop()?;
                match read_entry(&mut readers[run]) {
                    Ok(Some(next)) => heap.push(Reverse((next, run))),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err)),
                }
                Some(Ok(entry))
            }
        }
    }
}

fn read_entry(reader: &mut BufReader<File>) -> Result<Option<GridEntry>> {
    let mut buf = [0u8; ENCODED_ENTRY_LEN];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(GridEntry::decode(&buf))),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err.into()),
    }
}
