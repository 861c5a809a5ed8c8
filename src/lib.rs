//! Roadgrid: two-level on-disk spatial index for road-network edges
//!
//! Answers "which edge of the road graph is nearest to this coordinate"
//! against graphs too large to index in memory during construction:
//!
//! - Build: every edge is rasterized onto a 32768 x 32768 fine grid, the
//!   resulting `(cell, edge)` records are sorted out-of-core, and the
//!   grouped result is serialized as one block per coarse cell into a
//!   bucket file plus a 4 MiB RAM-resident directory
//! - Query: the directory is loaded into memory, the bucket file is
//!   memory-mapped, and the 3x3 fine-cell neighborhood of the query
//!   point supplies the candidates ranked by planar point-to-segment
//!   distance
//!
//! The index is immutable once built. Coordinates are fixed-point
//! degrees (1e-5 resolution); distances are planar equirectangular and
//! only meaningful for ranking nearby candidates.

pub mod coord;
pub mod error;
pub mod grid;
pub mod raster;
pub mod reader;
pub mod sort;
pub mod writer;

pub use coord::{project_onto_segment, Coordinate, Edge, Projection};
pub use error::{Error, Result};
pub use reader::{GridReader, PhantomNode, PhantomNodes};
pub use writer::GridWriter;
