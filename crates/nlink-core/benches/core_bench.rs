//! Criterion benchmarks for nlink-core.
//!
//! Graphs are synthetic and seeded, so runs are comparable across machines.
//!
//! ## Benchmark groups
//!
//! 1. **graph_store**: building the CSR store from page/link records.
//! 2. **functional_build**: applying the Nth-link rule to every page.
//! 3. **basin_labeling**: cycle detection and basin labeling.
//! 4. **branch_index**: reverse adjacency and subtree aggregation.
//! 5. **chase**: dominant-upstream chase from the largest basin.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/nlink-core/Cargo.toml
//! # Run only the labeling group:
//! cargo bench --manifest-path crates/nlink-core/Cargo.toml -- basin_labeling
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use _nlink_core::analysis::branches::BranchIndex;
use _nlink_core::analysis::chase::{ChaseEngine, ChaseSeed};
use _nlink_core::config::{FallbackPolicy, RuleParams};
use _nlink_core::engine::basins::BasinSnapshot;
use _nlink_core::engine::functional::FunctionalGraph;
use _nlink_core::engine::graph_store::GraphStore;
use _nlink_core::models::{LinkRecord, PageRecord};

const SIZES: &[usize] = &[10_000, 100_000];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

/// Pages with 0..=8 ordered links each, biased towards low page ids so a
/// few large basins form.
fn synthetic_records(pages: usize) -> (Vec<PageRecord>, Vec<LinkRecord>) {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    let page_records = (0..pages as i64)
        .map(|id| PageRecord::article(id, format!("Page_{id}")))
        .collect();
    let mut links = Vec::with_capacity(pages * 4);
    for source in 0..pages as i64 {
        let degree = rng.next() % 9;
        for rank in 1..=degree as i64 {
            let r = rng.next() % pages as u64;
            let target = if rng.next() % 4 == 0 { r } else { r / 16 };
            links.push(LinkRecord::new(source, rank, target as i64));
        }
    }
    (page_records, links)
}

fn synthetic_store(pages: usize) -> GraphStore {
    let (p, l) = synthetic_records(pages);
    GraphStore::build(p, l).unwrap()
}

fn rule() -> RuleParams {
    RuleParams::new(2).with_fallback(FallbackPolicy::Clamp)
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

fn bench_graph_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_store");
    group.sample_size(10);
    for &size in SIZES {
        let (pages, links) = synthetic_records(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| GraphStore::build(black_box(pages.clone()), black_box(links.clone())).unwrap())
        });
    }
    group.finish();
}

fn bench_functional_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("functional_build");
    for &size in SIZES {
        let store = synthetic_store(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| FunctionalGraph::build(black_box(store), rule()).unwrap())
        });
    }
    group.finish();
}

fn bench_basin_labeling(c: &mut Criterion) {
    let mut group = c.benchmark_group("basin_labeling");
    for &size in SIZES {
        let store = synthetic_store(size);
        let graph = FunctionalGraph::build(&store, rule()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &graph, |b, graph| {
            b.iter(|| BasinSnapshot::label(black_box(graph), &store))
        });
    }
    group.finish();
}

fn bench_branch_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_index");
    for &size in SIZES {
        let store = synthetic_store(size);
        let graph = FunctionalGraph::build(&store, rule()).unwrap();
        let snapshot = BasinSnapshot::label(&graph, &store);
        group.bench_with_input(BenchmarkId::from_parameter(size), &snapshot, |b, snapshot| {
            b.iter(|| BranchIndex::build(black_box(&graph), snapshot))
        });
    }
    group.finish();
}

fn bench_chase(c: &mut Criterion) {
    let mut group = c.benchmark_group("chase");
    for &size in SIZES {
        let store = synthetic_store(size);
        let graph = FunctionalGraph::build(&store, rule()).unwrap();
        let snapshot = BasinSnapshot::label(&graph, &store);
        let index = BranchIndex::build(&graph, &snapshot);
        let largest = (0..snapshot.basin_count() as u32)
            .max_by_key(|&b| snapshot.mass(b))
            .unwrap();
        let engine = ChaseEngine::new(&graph, &snapshot, &index);
        group.bench_with_input(BenchmarkId::from_parameter(size), &largest, |b, &basin| {
            b.iter(|| {
                engine
                    .run(black_box(ChaseSeed::Basin(basin)), 0.5, 1000)
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_graph_store,
    bench_functional_build,
    bench_basin_labeling,
    bench_branch_index,
    bench_chase,
);
criterion_main!(benches);
