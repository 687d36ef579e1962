//! Decomposition pipeline orchestration with Rayon-based parallelism.
//!
//! Labeling itself is single-threaded (it is linear and every node is
//! written exactly once); the per-node rule evaluation, per-basin analysis,
//! and multi-N sweeps run in parallel over already-immutable inputs.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::analysis::branches::BranchIndex;
use crate::analysis::cache::DecompositionCache;
use crate::analysis::dashboard::DashboardContext;
use crate::analysis::signal::StopSignal;
use crate::analysis::tunneling::{TunnelComparison, TunnelSummary};
use crate::config::{EngineConfig, RuleParams};
use crate::engine::basins::BasinSnapshot;
use crate::engine::functional::FunctionalGraph;
use crate::engine::graph_store::{GraphStore, StoreStats};
use crate::errors::NLinkResult;
use crate::models::BasinSummary;
use crate::store::database::Database;

/// Timings and counts for one decomposition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecompositionStats {
    pub rule_tag: String,
    pub nodes: usize,
    pub basins: usize,
    pub self_loops: usize,
    pub largest_basin: u64,
    pub build_ms: u64,
    pub label_ms: u64,
    pub index_ms: u64,
}

/// Functional graph, basin partition, and branch index for one rule.
/// Immutable once computed; a different rule means a new decomposition.
pub struct Decomposition {
    pub graph: FunctionalGraph,
    pub snapshot: BasinSnapshot,
    pub index: BranchIndex,
    pub stats: DecompositionStats,
}

impl Decomposition {
    pub fn compute(store: &GraphStore, params: RuleParams) -> NLinkResult<Self> {
        let started = Instant::now();
        let graph = FunctionalGraph::build(store, params)?;
        let build_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let snapshot = BasinSnapshot::label(&graph, store);
        let label_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let index = BranchIndex::build(&graph, &snapshot);
        let index_ms = started.elapsed().as_millis() as u64;

        let stats = DecompositionStats {
            rule_tag: params.tag(),
            nodes: graph.len(),
            basins: snapshot.basin_count(),
            self_loops: snapshot.cycles().iter().filter(|c| c.len() == 1).count(),
            largest_basin: snapshot.masses().iter().copied().max().unwrap_or(0),
            build_ms,
            label_ms,
            index_ms,
        };
        info!(
            rule = %stats.rule_tag,
            nodes = stats.nodes,
            basins = stats.basins,
            largest_basin = stats.largest_basin,
            "decomposition complete"
        );
        Ok(Self {
            graph,
            snapshot,
            index,
            stats,
        })
    }

    pub fn context<'a>(&'a self, store: &'a GraphStore) -> DashboardContext<'a> {
        DashboardContext {
            store,
            graph: &self.graph,
            snapshot: &self.snapshot,
            index: &self.index,
        }
    }
}

/// Decompose the same store under several N values.
///
/// Each N is independent, so they are computed on a dedicated pool of
/// `workers` threads; results come back in the order of `ns`.
pub fn sweep(
    store: &GraphStore,
    cache: &DecompositionCache,
    base: RuleParams,
    ns: &[u32],
    workers: usize,
) -> NLinkResult<Vec<Arc<Decomposition>>> {
    let job = |n: &u32| cache.get_or_compute(store, RuleParams { n: *n, ..base });
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();
    match pool {
        Ok(pool) => pool.install(|| ns.par_iter().map(job).collect()),
        // Fallback to sequential
        Err(_) => ns.iter().map(job).collect(),
    }
}

/// Tunneling summaries between consecutive N values of a sweep.
pub fn sweep_tunneling(
    store: &GraphStore,
    cache: &DecompositionCache,
    base: RuleParams,
    ns: &[u32],
    workers: usize,
    max_transitions: usize,
) -> NLinkResult<Vec<TunnelSummary>> {
    let decompositions = sweep(store, cache, base, ns, workers)?;
    let snapshots: Vec<&BasinSnapshot> = decompositions.iter().map(|d| &d.snapshot).collect();
    crate::analysis::tunneling::sweep_summaries(&snapshots, max_transitions)
}

/// Outcome of a persisted decomposition run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub store: StoreStats,
    pub decomposition: DecompositionStats,
    pub fingerprint: String,
    pub largest_basins: Vec<BasinSummary>,
    pub trunkiness_rows: usize,
    pub chase_rows: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Load the page/link tables, decompose under `config`, and persist the
/// basin table plus both dashboards.  Validation happens before any
/// computation; integrity errors abort before anything is written.
pub fn run_decomposition(
    db: &Database,
    config: &EngineConfig,
    min_mass: u64,
    signal: &StopSignal,
) -> NLinkResult<RunReport> {
    config.validate()?;
    let started = Instant::now();
    let store = db.load_graph_store()?;
    let decomposition = Decomposition::compute(&store, config.rule())?;
    let ctx = decomposition.context(&store);

    let trunkiness = ctx.trunkiness_dashboard(config, min_mass, signal);
    let chases = ctx.chase_dashboard(config, min_mass, signal)?;

    let params = config.rule();
    db.write_basin_table(&params, &decomposition.snapshot, &store)?;
    db.write_trunkiness(&params, &trunkiness.rows)?;
    db.write_chase_runs(&params, config.collapse_threshold, &chases.rows)?;

    let mut largest_basins = decomposition.snapshot.summaries();
    largest_basins.truncate(10);
    let report = RunReport {
        store: store.stats(),
        fingerprint: decomposition.snapshot.fingerprint(&store),
        decomposition: decomposition.stats.clone(),
        largest_basins,
        trunkiness_rows: trunkiness.rows.len(),
        chase_rows: chases.rows.len(),
        cancelled: trunkiness.cancelled || chases.cancelled,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        rule = %report.decomposition.rule_tag,
        elapsed_ms = report.elapsed_ms,
        "decomposition run persisted"
    );
    Ok(report)
}

/// Decompose under N1 and N2 and persist the tunneling table.
pub fn run_tunneling(
    db: &Database,
    config: &EngineConfig,
    n1: u32,
    n2: u32,
    max_transitions: usize,
) -> NLinkResult<TunnelSummary> {
    let first = config.with_n(n1);
    let second = config.with_n(n2);
    first.validate()?;
    second.validate()?;
    let store = db.load_graph_store()?;
    let (a, b) = rayon::join(
        || Decomposition::compute(&store, first.rule()),
        || Decomposition::compute(&store, second.rule()),
    );
    let (a, b) = (a?, b?);
    let comparison = TunnelComparison::compare(&a.snapshot, &b.snapshot)?;
    db.write_tunneling(&first.rule(), &second.rule(), &comparison, &store)?;
    Ok(comparison.summary(max_transitions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use crate::models::{LinkRecord, PageRecord};

    /// Ring of `n` pages where page i links to i+1, i+2, i+3 (mod n) plus a
    /// few dead ends.
    fn ring_store(n: i64) -> GraphStore {
        let pages = (0..n)
            .map(|id| PageRecord::article(id, format!("Ring_{id}")))
            .collect();
        let mut links = Vec::new();
        for id in 0..n {
            if id % 7 == 0 {
                continue;
            }
            for rank in 1..=3 {
                links.push(LinkRecord::new(id, rank, (id * rank + 1) % n));
            }
        }
        GraphStore::build(pages, links).unwrap()
    }

    #[test]
    fn test_compute_is_deterministic() {
        let store = ring_store(500);
        let params = RuleParams::new(2).with_fallback(FallbackPolicy::Clamp);
        let a = Decomposition::compute(&store, params).unwrap();
        let b = Decomposition::compute(&store, params).unwrap();
        assert_eq!(
            a.snapshot.fingerprint(&store),
            b.snapshot.fingerprint(&store)
        );
        let rows_a: Vec<_> = a.snapshot.rows(&store).collect();
        let rows_b: Vec<_> = b.snapshot.rows(&store).collect();
        assert_eq!(rows_a, rows_b);
        assert_eq!(a.stats.nodes, 500);
        assert_eq!(
            a.snapshot.masses().iter().sum::<u64>(),
            store.len() as u64
        );
    }

    #[test]
    fn test_sweep_preserves_order_and_uses_cache() {
        let store = ring_store(300);
        let cache = DecompositionCache::new(8);
        let base = RuleParams::new(1);
        let results = sweep(&store, &cache, base, &[3, 1, 2], 2).unwrap();
        let ns: Vec<u32> = results.iter().map(|d| d.graph.params().n).collect();
        assert_eq!(ns, vec![3, 1, 2]);
        assert_eq!(cache.len(), 3);

        let again = sweep(&store, &cache, base, &[1], 1).unwrap();
        assert!(Arc::ptr_eq(&again[0], &results[1]));
    }

    #[test]
    fn test_sweep_tunneling_pairs() {
        let store = ring_store(200);
        let cache = DecompositionCache::new(8);
        let summaries =
            sweep_tunneling(&store, &cache, RuleParams::new(1), &[1, 2, 3], 2, 5).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!((summaries[1].n1, summaries[1].n2), (2, 3));
        assert!(summaries.iter().all(|s| s.nodes == 200));
    }

    #[test]
    fn test_run_decomposition_persists_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("nlink.db")).unwrap();
        db.init_schema().unwrap();
        db.insert_pages(&[
            PageRecord::article(1, "A"),
            PageRecord::article(2, "B"),
            PageRecord::article(3, "C"),
        ])
        .unwrap();
        db.insert_links(&[
            LinkRecord::new(1, 1, 2),
            LinkRecord::new(2, 1, 1),
            LinkRecord::new(3, 1, 1),
        ])
        .unwrap();

        let config = EngineConfig::default();
        let report = run_decomposition(&db, &config, 1, &StopSignal::new()).unwrap();
        assert_eq!(report.decomposition.basins, 1);
        assert_eq!(report.trunkiness_rows, 1);
        assert_eq!(report.chase_rows, 1);
        assert!(!report.cancelled);

        let rows = db.basin_table(&config.rule()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.cycle_key == "1__2"));

        // Recomputing replaces rows and yields the same fingerprint.
        let again = run_decomposition(&db, &config, 1, &StopSignal::new()).unwrap();
        assert_eq!(again.fingerprint, report.fingerprint);
        assert_eq!(db.basin_table(&config.rule()).unwrap(), rows);
    }

    #[test]
    fn test_run_decomposition_fails_fast_on_bad_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("bad.db")).unwrap();
        db.init_schema().unwrap();
        db.insert_pages(&[PageRecord::article(1, "A"), PageRecord::article(2, "B")])
            .unwrap();
        db.insert_links(&[LinkRecord::new(1, 2, 2)]).unwrap();
        let err = run_decomposition(&db, &EngineConfig::default(), 1, &StopSignal::new())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::NLinkError::DataIntegrity { node_id: 1, .. }
        ));
        assert!(db.basin_table(&EngineConfig::default().rule()).unwrap().is_empty());
    }

    #[test]
    fn test_run_tunneling_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("tunnel.db")).unwrap();
        db.init_schema().unwrap();
        db.insert_pages(&[
            PageRecord::article(1, "A"),
            PageRecord::article(2, "B"),
            PageRecord::article(3, "C"),
        ])
        .unwrap();
        // N=1: 3 -> 1 <-> 2.  N=2: 3 -> 3 (its second link).
        db.insert_links(&[
            LinkRecord::new(1, 1, 2),
            LinkRecord::new(2, 1, 1),
            LinkRecord::new(3, 1, 1),
            LinkRecord::new(3, 2, 3),
        ])
        .unwrap();
        let config = EngineConfig {
            fallback_policy: FallbackPolicy::Clamp,
            ..EngineConfig::default()
        };
        let summary = run_tunneling(&db, &config, 1, 2, 10).unwrap();
        assert_eq!(summary.tunneled, 1);
        let tunneled = db.tunneled_nodes(&config.with_n(1).rule(), &config.with_n(2).rule())
            .unwrap();
        assert_eq!(tunneled, vec![3]);
    }
}
