//! End-to-end build and query tests against real on-disk indexes

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use roadgrid::{grid, project_onto_segment, Coordinate, Edge, Error, GridReader, GridWriter};

fn edge(start: u32, target: u32, a: (i32, i32), b: (i32, i32)) -> Edge {
    Edge::new(
        start,
        target,
        Coordinate::new(a.0, a.1),
        Coordinate::new(b.0, b.1),
    )
}

fn build_index(edges: &[Edge], dir: &Path) -> (PathBuf, PathBuf) {
    let ram = dir.join("ram.idx");
    let bucket = dir.join("file.idx");
    let mut writer = GridWriter::new();
    for e in edges {
        writer.add_edge(*e).unwrap();
    }
    writer.build(&ram, &bucket).unwrap();
    (ram, bucket)
}

#[test]
fn test_empty_build_produces_empty_index() {
    let dir = tempfile::tempdir().unwrap();
    let (ram, bucket) = build_index(&[], dir.path());

    let ram_bytes = fs::read(&ram).unwrap();
    assert_eq!(ram_bytes.len(), 4 * 1024 * 1024);
    assert!(ram_bytes.iter().all(|&byte| byte == 0xFF));
    assert_eq!(fs::metadata(&bucket).unwrap().len(), 0);

    let reader = GridReader::open(&ram, &bucket).unwrap();
    let result = reader.find_nearest_point_on_edge(&Coordinate::new(0, 0));
    assert!(matches!(result, Err(Error::NoNearestFound)));
}

#[test]
fn test_nearest_point_on_horizontal_edge() {
    let dir = tempfile::tempdir().unwrap();
    let (ram, bucket) = build_index(&[edge(1, 2, (0, 0), (0, 1000))], dir.path());
    let reader = GridReader::open(&ram, &bucket).unwrap();

    let nearest = reader
        .find_nearest_point_on_edge(&Coordinate::new(0, 500))
        .unwrap();
    assert_eq!(nearest, Coordinate::new(0, 500));

    let query = Coordinate::new(0, 500);
    let starts = reader.find_routing_starts(&query, &query).unwrap();
    assert_eq!(starts.source.edge_start, 1);
    assert_eq!(starts.source.edge_target, 2);
    assert!((starts.source.ratio - 0.5).abs() < 1e-9);
    assert_eq!(starts.source, starts.target);
}

#[test]
fn test_query_clamps_to_nearest_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (ram, bucket) = build_index(&[edge(1, 2, (0, 0), (0, 1000))], dir.path());
    let reader = GridReader::open(&ram, &bucket).unwrap();

    let query = Coordinate::new(0, -1000);
    let nearest = reader.find_nearest_point_on_edge(&query).unwrap();
    assert_eq!(nearest, Coordinate::new(0, 0));

    let starts = reader.find_routing_starts(&query, &query).unwrap();
    assert_eq!(starts.source.ratio, 0.0);
    assert_eq!(starts.source.coord, Coordinate::new(0, 0));
}

#[test]
fn test_tie_break_prefers_first_edge_in_bucket_order() {
    // Two parallel edges in the same fine cell, equidistant from the
    // query point between them. Bucket order sorts by node ids here, so
    // the edge (1, 2) must win regardless of insertion order.
    let first = edge(1, 2, (300, 0), (300, 1000));
    let second = edge(3, 4, (100, 0), (100, 1000));
    let query = Coordinate::new(200, 500);

    for edges in [vec![first, second], vec![second, first]] {
        let dir = tempfile::tempdir().unwrap();
        let (ram, bucket) = build_index(&edges, dir.path());
        let reader = GridReader::open(&ram, &bucket).unwrap();

        let starts = reader.find_routing_starts(&query, &query).unwrap();
        assert_eq!(starts.source.edge_start, 1);
        assert_eq!(starts.source.edge_target, 2);
    }
}

#[test]
fn test_build_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let edges: Vec<Edge> = (0..300u32)
        .map(|i| {
            let lat = rng.gen_range(-1_000_000..1_000_000);
            let lon = rng.gen_range(-1_000_000..1_000_000);
            edge(
                i * 2,
                i * 2 + 1,
                (lat, lon),
                (lat + rng.gen_range(-2_000..2_000), lon + rng.gen_range(-2_000..2_000)),
            )
        })
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let mut outputs = Vec::new();
    for round in 0..2 {
        let ram = dir.path().join(format!("ram{round}.idx"));
        let bucket = dir.path().join(format!("file{round}.idx"));
        // Tiny runs force the spill-and-merge path
        let mut writer = GridWriter::with_run_capacity(64);
        for e in &edges {
            writer.add_edge(*e).unwrap();
        }
        writer.build(&ram, &bucket).unwrap();
        outputs.push((fs::read(&ram).unwrap(), fs::read(&bucket).unwrap()));
    }

    assert_eq!(outputs[0].0, outputs[1].0);
    assert_eq!(outputs[0].1, outputs[1].1);
    assert!(!outputs[0].1.is_empty());
}

#[test]
fn test_cross_cell_edge_appears_once_per_slab() {
    // One fine column is ~1099 longitude units at this scale, so this
    // edge crosses five cells along the equator row
    let spanning = edge(7, 8, (0, 0), (0, 4_500));
    let dir = tempfile::tempdir().unwrap();
    let (ram, bucket) = build_index(&[spanning], dir.path());
    let reader = GridReader::open(&ram, &bucket).unwrap();

    let base = grid::fine_cell_index(&Coordinate::new(0, 0));
    for step in 0..5 {
        let slab = reader.edges_in_cell(base + step).unwrap();
        assert_eq!(slab, vec![spanning], "cell {step} of the span");
    }
    assert!(reader.edges_in_cell(base + 5).unwrap().is_empty());
}

#[test]
fn test_duplicate_add_collapses_to_single_record() {
    let repeated = edge(11, 12, (0, 0), (0, 2_500));
    let dir = tempfile::tempdir().unwrap();
    let edges = vec![repeated; 5];
    let (ram, bucket) = build_index(&edges, dir.path());
    let reader = GridReader::open(&ram, &bucket).unwrap();

    let base = grid::fine_cell_index(&Coordinate::new(0, 0));
    for step in 0..3 {
        let slab = reader.edges_in_cell(base + step).unwrap();
        assert_eq!(slab, vec![repeated], "cell {step} of the span");
    }
}

#[test]
fn test_random_edges_round_trip() {
    let mut rng = StdRng::seed_from_u64(0xB00F);
    let mut edges = HashMap::new();
    let mut writer = GridWriter::with_run_capacity(4_096);

    for i in 0..10_000u32 {
        let lat = rng.gen_range(-8_000_000..8_000_000);
        let lon = rng.gen_range(-17_000_000..17_000_000);
        // Even deltas keep the integer midpoint exactly on the segment
        let d_lat = 2 * rng.gen_range(-250..=250);
        let d_lon = 2 * rng.gen_range(-250..=250);

        let e = edge(i * 2, i * 2 + 1, (lat, lon), (lat + d_lat, lon + d_lon));
        writer.add_edge(e).unwrap();
        edges.insert((e.start, e.target), e);
    }

    let dir = tempfile::tempdir().unwrap();
    let ram = dir.path().join("ram.idx");
    let bucket = dir.path().join("file.idx");
    writer.build(&ram, &bucket).unwrap();
    let reader = GridReader::open(&ram, &bucket).unwrap();

    for e in edges.values() {
        let midpoint = Coordinate::new(
            (e.start_coord.lat + e.target_coord.lat) / 2,
            (e.start_coord.lon + e.target_coord.lon) / 2,
        );
        let starts = reader.find_routing_starts(&midpoint, &midpoint).unwrap();
        let found = &starts.source;

        // The winning edge must be a registered edge passing through the
        // midpoint, and the projected point must land on it
        let winner = edges
            .get(&(found.edge_start, found.edge_target))
            .expect("query returned an unknown edge");
        let check = project_onto_segment(&midpoint, &winner.start_coord, &winner.target_coord);
        assert!(check.distance_sq < 1e-6);

        assert!((found.coord.lat - midpoint.lat).abs() <= 1);
        assert!((found.coord.lon - midpoint.lon).abs() <= 1);
    }
}

#[test]
fn test_invalid_coordinates_are_rejected() {
    let mut writer = GridWriter::new();
    let bad = edge(1, 2, (9_000_001, 0), (0, 0));
    assert!(matches!(
        writer.add_edge(bad),
        Err(Error::InvalidCoordinate(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    let (ram, bucket) = build_index(&[edge(1, 2, (0, 0), (0, 1000))], dir.path());
    let reader = GridReader::open(&ram, &bucket).unwrap();
    let result = reader.find_nearest_point_on_edge(&Coordinate::new(0, 18_000_001));
    assert!(matches!(result, Err(Error::InvalidCoordinate(_))));
}

#[test]
fn test_writer_is_single_shot() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = GridWriter::new();
    writer.add_edge(edge(1, 2, (0, 0), (0, 1000))).unwrap();
    writer
        .build(dir.path().join("ram.idx"), dir.path().join("file.idx"))
        .unwrap();

    let again = writer.build(dir.path().join("ram2.idx"), dir.path().join("file2.idx"));
    assert!(matches!(again, Err(Error::AlreadyBuilt)));
    assert!(matches!(
        writer.add_edge(edge(3, 4, (0, 0), (0, 1000))),
        Err(Error::AlreadyBuilt)
    ));
}

#[test]
fn test_short_ram_index_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let ram = dir.path().join("ram.idx");
    let bucket = dir.path().join("file.idx");
    fs::write(&ram, vec![0xFF; 100]).unwrap();
    fs::write(&bucket, b"").unwrap();

    assert!(matches!(
        GridReader::open(&ram, &bucket),
        Err(Error::Corrupt(_))
    ));
}

#[test]
fn test_truncated_bucket_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let (ram, bucket) = build_index(&[edge(1, 2, (0, 0), (0, 1000))], dir.path());

    // Keep the inner directory but cut into the first edge record
    let bytes = fs::read(&bucket).unwrap();
    fs::write(&bucket, &bytes[..4096 + 10]).unwrap();

    let reader = GridReader::open(&ram, &bucket).unwrap();
    let result = reader.find_nearest_point_on_edge(&Coordinate::new(0, 500));
    assert!(matches!(result, Err(Error::Corrupt(_))));
}

#[test]
fn test_directory_offset_past_eof_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let ram = dir.path().join("ram.idx");
    let bucket = dir.path().join("file.idx");

    // Hand-build a directory whose entry for the query cell points into
    // a bucket file that is far too small to hold a block
    let query = Coordinate::new(0, 0);
    let coarse = grid::coarse_cell_index(grid::fine_cell_index(&query)) as usize;
    let mut ram_bytes = vec![0xFF; 4 * 1024 * 1024];
    ram_bytes[coarse * 4..coarse * 4 + 4].copy_from_slice(&8u32.to_le_bytes());
    fs::write(&ram, &ram_bytes).unwrap();
    fs::write(&bucket, vec![0x01; 16]).unwrap();

    let reader = GridReader::open(&ram, &bucket).unwrap();
    let result = reader.find_nearest_point_on_edge(&query);
    assert!(matches!(result, Err(Error::Corrupt(_))));
}
