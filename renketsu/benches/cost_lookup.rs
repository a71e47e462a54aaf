//! 接続コスト参照のベンチマーク
//!
//! 疎マップ読み取り器の生の参照速度と、ダイレクトマップキャッシュを
//! 通した参照速度を比較します。

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use renketsu::{ConnectionDataBuilder, Connector, ConnectorCost, LoadMode, SparseConnector};

const N: usize = 300;

/// 再現可能な疑似乱数列(線形合同法)
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }
}

fn build_connection_data() -> Vec<u8> {
    let mut rng = Lcg(0xBEEF);
    let mut matrix = format!("{N} {N}\n");
    for right_id in 0..N {
        for left_id in 0..N {
            let cost = (rng.next() % 6000) as i32;
            matrix.push_str(&format!("{right_id} {left_id} {cost}\n"));
        }
    }
    ConnectionDataBuilder::new(N, 0, 1)
        .unwrap()
        .compile(matrix.as_bytes())
        .unwrap()
}

fn benchmark_cost_lookup(c: &mut Criterion) {
    let data = build_connection_data();
    let bare = SparseConnector::from_bytes(&data).unwrap();
    let cached = Connector::from_reader(data.as_slice(), LoadMode::Trust).unwrap();

    // A Zipf-ish probe sequence: a few hot pairs dominate, as in a real
    // lattice search.
    let mut rng = Lcg(0xF00D);
    let probes: Vec<(u16, u16)> = (0..4096)
        .map(|_| {
            let limit = if rng.next() % 4 == 0 { N } else { 16 };
            (
                (rng.next() as usize % limit) as u16,
                (rng.next() as usize % limit) as u16,
            )
        })
        .collect();

    let mut group = c.benchmark_group("cost_lookup");
    group.bench_function("sparse_connector", |b| {
        b.iter(|| {
            let mut acc = 0i64;
            for &(right_id, left_id) in &probes {
                acc += i64::from(bare.cost(black_box(right_id), black_box(left_id)));
            }
            acc
        });
    });
    group.bench_function("cached_connector", |b| {
        b.iter(|| {
            let mut acc = 0i64;
            for &(right_id, left_id) in &probes {
                acc += i64::from(cached.cost(black_box(right_id), black_box(left_id)));
            }
            acc
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_cost_lookup);
criterion_main!(benches);
