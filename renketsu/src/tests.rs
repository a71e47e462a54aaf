//! コンパイルから照会までを通す結合テスト

use std::fs;
use std::sync::Arc;

use crate::connector::{
    ConnectionDataBuilder, Connector, ConnectorCost, INVALID_COST, LoadMode, SparseConnector,
    encode_key,
};
use crate::sparse_map::{SparseMap, SparseMapBuilder, ValueWidth};

/// 再現可能な疑似乱数列(線形合同法)
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }
}

fn compile_matrix(matrix: &str, id_count: usize, special: usize, resolution: u32) -> Vec<u8> {
    ConnectionDataBuilder::new(id_count, special, resolution)
        .unwrap()
        .compile(matrix.as_bytes())
        .unwrap()
}

#[test]
fn sparse_map_roundtrip_after_reload() {
    let entries = [
        (0u32, 10u16),
        (10, 20),
        (100, 30),
        (131071, 40),
        (4294901761, 50),
    ];
    let mut builder = SparseMapBuilder::new(ValueWidth::Wide);
    for &(k, v) in &entries {
        builder.insert(k, v).unwrap();
    }
    let image = builder.build();

    // Write and reload through a file, as the offline pipeline does.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sparse.img");
    fs::write(&path, &image).unwrap();
    let reloaded = fs::read(&path).unwrap();

    let map = SparseMap::from_image(&reloaded, ValueWidth::Wide).unwrap();
    for &(k, v) in &entries {
        assert_eq!(map.value(map.peek(k).unwrap()), v);
    }
    assert_eq!(map.peek(1), None);
    assert_eq!(map.peek(99), None);
}

#[test]
fn three_by_three_matrix_defaults() {
    let matrix = "3 3\n0 0 0\n0 1 5\n0 2 5\n1 0 5\n1 1 0\n1 2 5\n2 0 5\n2 1 5\n2 2 0\n";
    let data = compile_matrix(matrix, 3, 0, 1);
    let conn = SparseConnector::from_bytes(&data).unwrap();
    assert_eq!(conn.cost(0, 0), 0);
    assert_eq!(conn.cost(0, 1), 5);
    assert_eq!(conn.cost(1, 0), 5);
    assert_eq!(conn.cost(2, 2), 0);
}

#[test]
fn quantized_resolution_bounds_the_error() {
    let matrix = "2 2\n0 0 130\n0 1 200\n1 0 70\n1 1 640\n";
    let data = compile_matrix(matrix, 2, 0, 64);
    let conn = SparseConnector::from_bytes(&data).unwrap();
    assert_eq!(conn.resolution(), 64);
    let sources = [(0u16, 0u16, 130i32), (0, 1, 200), (1, 0, 70), (1, 1, 640)];
    for (r, l, want) in sources {
        let got = conn.cost(r, l);
        assert!(
            (got - want).abs() < 64,
            "cell ({r}, {l}): want {want} +/- 64, got {got}"
        );
    }
}

#[test]
fn facade_matches_the_bare_reader() {
    let matrix = "4 4\n0 0 0\n0 1 100\n0 2 -50\n0 3 30\n1 0 100\n1 1 0\n1 2 25\n1 3 100\n\
                  2 0 -10\n2 1 100\n2 2 0\n2 3 100\n3 0 100\n3 1 60\n3 2 100\n3 3 0\n";
    let data = compile_matrix(matrix, 4, 1, 1);
    let bare = SparseConnector::from_bytes(&data).unwrap();
    let facade = Connector::from_reader(data.as_slice(), LoadMode::Validate).unwrap();

    assert_eq!(facade.num_categories(), 5);
    // Every cell, twice, so both the miss path and the hit path are
    // compared against the undecorated reader.
    for _ in 0..2 {
        for right_id in 0..5u16 {
            for left_id in 0..5u16 {
                assert_eq!(facade.cost(right_id, left_id), bare.cost(right_id, left_id));
            }
        }
    }
    facade.clear_cache();
    assert_eq!(facade.cost(0, 2), -50);
}

#[test]
fn new_handle_shares_the_image() {
    let matrix = "2 2\n0 0 0\n0 1 5\n1 0 5\n1 1 0\n";
    let data = compile_matrix(matrix, 2, 0, 1);
    let facade = Connector::from_reader(data.as_slice(), LoadMode::Trust).unwrap();
    let handle = facade.new_handle();
    assert_eq!(handle.num_categories(), facade.num_categories());
    for right_id in 0..2u16 {
        for left_id in 0..2u16 {
            assert_eq!(
                handle.cost(right_id, left_id),
                facade.cost(right_id, left_id)
            );
        }
    }
}

#[test]
fn compile_to_path_then_load_both_modes() {
    let matrix = "3 3\n0 0 0\n0 1 863\n0 2 120\n1 0 -3689\n1 1 0\n1 2 11\n2 0 40\n2 1 9\n2 2 0\n";
    let builder = ConnectionDataBuilder::new(3, 2, 1).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("connection.bin");
    builder.compile_to_path(matrix.as_bytes(), &path).unwrap();

    for mode in [LoadMode::Validate, LoadMode::Trust] {
        let conn = Connector::from_path(&path, mode).unwrap();
        assert_eq!(conn.num_categories(), 5);
        assert_eq!(conn.cost(0, 1), 863);
        assert_eq!(conn.cost(1, 0), -3689);
        assert_eq!(conn.cost(3, 3), INVALID_COST);
        assert_eq!(conn.cost(4, 0), INVALID_COST);
    }
}

#[test]
fn randomized_matrix_fidelity() {
    // A 50x50 matrix with pseudo-random costs, verified cell by cell in
    // both storage modes.
    const N: usize = 50;
    let mut rng = Lcg(0x5EED);
    let mut costs = vec![0i32; N * N];
    let mut matrix = format!("{N} {N}\n");
    for right_id in 0..N {
        for left_id in 0..N {
            let cost = (rng.next() % 8000) as i32;
            costs[right_id * N + left_id] = cost;
            matrix.push_str(&format!("{right_id} {left_id} {cost}\n"));
        }
    }

    for resolution in [1u32, 64] {
        let data = compile_matrix(&matrix, N, 0, resolution);
        let conn = SparseConnector::from_bytes(&data).unwrap();
        for right_id in 0..N {
            for left_id in 0..N {
                let want = costs[right_id * N + left_id];
                let got = conn.cost(right_id as u16, left_id as u16);
                assert!(
                    (i64::from(got) - i64::from(want)).unsigned_abs() < u64::from(resolution),
                    "resolution {resolution}, cell ({right_id}, {left_id}): \
                     want {want}, got {got}"
                );
            }
        }
    }
}

#[test]
fn shared_image_is_usable_from_many_threads() {
    let matrix = "2 2\n0 0 0\n0 1 5\n1 0 5\n1 1 0\n";
    let data = compile_matrix(matrix, 2, 0, 1);
    let inner = Arc::new(SparseConnector::from_bytes(&data).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || {
                // Each thread owns its cache-bearing facade; only the
                // immutable image is shared.
                let conn = Connector::new(inner);
                for _ in 0..1000 {
                    assert_eq!(conn.cost(0, 1), 5);
                    assert_eq!(conn.cost(1, 1), 0);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn out_of_range_pair_is_unreachable_even_on_a_cold_cache() {
    let matrix = "2 2\n0 0 0\n0 1 5\n1 0 5\n1 1 0\n";
    let data = compile_matrix(matrix, 2, 0, 1);
    let bare = SparseConnector::from_bytes(&data).unwrap();
    let facade = Connector::from_reader(data.as_slice(), LoadMode::Validate).unwrap();
    // (u16::MAX, u16::MAX) encodes to the same key as an empty cache
    // slot and must still resolve through the reader.
    assert_eq!(facade.cost(u16::MAX, u16::MAX), INVALID_COST);
    assert_eq!(facade.cost(u16::MAX, u16::MAX), bare.cost(u16::MAX, u16::MAX));
}

#[test]
fn key_encoding_packs_right_high_left_low() {
    assert_eq!(encode_key(0, 0), 0);
    assert_eq!(encode_key(1, 0), 1 << 16);
    assert_eq!(encode_key(0xFFFF, 1), 4294901761);
    assert_eq!(encode_key(2, 3), 0x0002_0003);
}
