//! Batch trunkiness and chase/collapse dashboards.
//!
//! Basins of one snapshot are independent, so both dashboards fan out over
//! basins with rayon.  The stop signal is checked once per basin and charged
//! with the basin's node count.

use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::branches::BranchIndex;
use crate::analysis::chase::{ChaseEngine, ChaseRun, ChaseSeed};
use crate::analysis::signal::StopSignal;
use crate::config::EngineConfig;
use crate::engine::basins::BasinSnapshot;
use crate::engine::functional::FunctionalGraph;
use crate::engine::graph_store::GraphStore;
use crate::errors::{NLinkError, NLinkResult};
use crate::models::{BranchSummary, ChaseRow, TrunkinessRow};

/// Rows from a batch run.  `cancelled` is set when the stop signal fired
/// before every basin was processed; `rows` then holds a subset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DashboardOutput<T> {
    pub rows: Vec<T>,
    pub cancelled: bool,
}

/// Everything a dashboard needs from one decomposition.
#[derive(Clone, Copy)]
pub struct DashboardContext<'a> {
    pub store: &'a GraphStore,
    pub graph: &'a FunctionalGraph,
    pub snapshot: &'a BasinSnapshot,
    pub index: &'a BranchIndex,
}

impl<'a> DashboardContext<'a> {
    /// Cycle members' titles in loop order, e.g. `Massachusetts__Gulf_of_Maine`.
    pub fn cycle_label(&self, basin: u32) -> String {
        self.snapshot
            .cycle(basin)
            .members
            .iter()
            .map(|&m| self.store.title(m))
            .collect::<Vec<_>>()
            .join("__")
    }

    /// Basins with at least `min_mass` nodes, largest first (ties by key).
    fn selected_basins(&self, min_mass: u64) -> Vec<u32> {
        let mut basins: Vec<u32> = (0..self.snapshot.basin_count() as u32)
            .filter(|&b| self.snapshot.mass(b) >= min_mass)
            .collect();
        basins.sort_by(|&a, &b| {
            self.snapshot
                .mass(b)
                .cmp(&self.snapshot.mass(a))
                .then(a.cmp(&b))
        });
        basins
    }

    pub fn trunkiness_row(&self, basin: u32, top_k: usize) -> TrunkinessRow {
        let profile = self.index.basin_profile(self.snapshot, basin, top_k);
        let total = profile.total_basin_nodes;
        TrunkinessRow {
            cycle_key: self.snapshot.cycle(basin).key.to_string(),
            cycle_label: self.cycle_label(basin),
            total_basin_nodes: total,
            top1_share_total: profile.top1_share_total,
            effective_branches: profile.metrics.effective_branches,
            gini_branch_sizes: profile.metrics.gini,
            dominant_entry_title: profile
                .dominant_entry
                .map(|b| self.store.title(b.root).to_string()),
            entry_branches: profile.metrics.branches,
            top_branches: profile
                .top_branches
                .iter()
                .map(|b| BranchSummary {
                    root_id: self.store.page_id(b.root),
                    root_title: self.store.title(b.root).to_string(),
                    size: b.size,
                    share: b.size as f64 / total as f64,
                })
                .collect(),
        }
    }

    pub fn trunkiness_dashboard(
        &self,
        config: &EngineConfig,
        min_mass: u64,
        signal: &StopSignal,
    ) -> DashboardOutput<TrunkinessRow> {
        let started = Instant::now();
        let basins = self.selected_basins(min_mass);
        let results: Vec<Option<TrunkinessRow>> = basins
            .par_iter()
            .map(|&b| {
                if signal.should_stop() {
                    return None;
                }
                signal.charge(self.snapshot.mass(b));
                Some(self.trunkiness_row(b, config.top_k_branches))
            })
            .collect();
        let output = collect_output(results);
        if output.cancelled {
            warn!(
                processed = output.rows.len(),
                selected = basins.len(),
                "trunkiness dashboard stopped early"
            );
        }
        info!(
            basins = output.rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trunkiness dashboard built"
        );
        output
    }

    fn chase_row(&self, seed_title: String, basin: u32, run: &ChaseRun) -> ChaseRow {
        ChaseRow {
            seed_title,
            cycle_key: self.snapshot.cycle(basin).key.to_string(),
            hops_executed: run.hops_executed(),
            min_share: run.min_share(),
            first_below_threshold_hop: run.first_below_threshold_hop(),
            stop_reason: run.stop_reason,
        }
    }

    /// Chase every selected basin from its cycle split.  The seed title is
    /// the basin's dominant entry (or the cycle label when it has none).
    pub fn chase_dashboard(
        &self,
        config: &EngineConfig,
        min_mass: u64,
        signal: &StopSignal,
    ) -> NLinkResult<DashboardOutput<ChaseRow>> {
        config.validate()?;
        let started = Instant::now();
        let engine = ChaseEngine::new(self.graph, self.snapshot, self.index);
        let basins = self.selected_basins(min_mass);
        let results: Vec<NLinkResult<Option<ChaseRow>>> = basins
            .par_iter()
            .map(|&b| {
                if signal.should_stop() {
                    return Ok(None);
                }
                signal.charge(self.snapshot.mass(b));
                let run = engine.run(
                    ChaseSeed::Basin(b),
                    config.collapse_threshold,
                    config.max_chase_hops,
                )?;
                let seed_title = self
                    .index
                    .entry_branches(self.snapshot, b)
                    .first()
                    .map(|d| self.store.title(d.root).to_string())
                    .unwrap_or_else(|| self.cycle_label(b));
                Ok(Some(self.chase_row(seed_title, b, &run)))
            })
            .collect();
        let results = results.into_iter().collect::<NLinkResult<Vec<_>>>()?;
        let output = collect_output(results);
        info!(
            basins = output.rows.len(),
            cancelled = output.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chase dashboard built"
        );
        Ok(output)
    }

    /// Chase upstream from a specific page, looked up by title.
    pub fn chase_from_title(&self, title: &str, config: &EngineConfig) -> NLinkResult<ChaseRow> {
        config.validate()?;
        let node = self
            .store
            .find_title(title)
            .ok_or_else(|| NLinkError::config(format!("unknown seed title {title:?}")))?;
        let engine = ChaseEngine::new(self.graph, self.snapshot, self.index);
        let run = engine.run(
            ChaseSeed::Node(node),
            config.collapse_threshold,
            config.max_chase_hops,
        )?;
        Ok(self.chase_row(title.to_string(), self.snapshot.basin_of(node), &run))
    }
}

fn collect_output<T>(results: Vec<Option<T>>) -> DashboardOutput<T> {
    let cancelled = results.iter().any(|r| r.is_none());
    DashboardOutput {
        rows: results.into_iter().flatten().collect(),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackPolicy, RuleParams};
    use crate::models::{LinkRecord, PageRecord, StopReason};

    struct Fixture {
        store: GraphStore,
        graph: FunctionalGraph,
        snapshot: BasinSnapshot,
        index: BranchIndex,
    }

    impl Fixture {
        /// Two basins: cycle Alpha <-> Beta fed by a trunk (Gamma <- Delta <-
        /// Epsilon) and a twig Zeta; and Omega, a dead end reached by Psi.
        fn new() -> Self {
            let titles = [
                (1, "Alpha"),
                (2, "Beta"),
                (3, "Gamma"),
                (4, "Delta"),
                (5, "Epsilon"),
                (6, "Zeta"),
                (7, "Omega"),
                (8, "Psi"),
            ];
            let pages = titles
                .iter()
                .map(|&(id, t)| PageRecord::article(id, t))
                .collect();
            let links = vec![
                LinkRecord::new(1, 1, 2),
                LinkRecord::new(2, 1, 1),
                LinkRecord::new(3, 1, 1),
                LinkRecord::new(4, 1, 3),
                LinkRecord::new(5, 1, 4),
                LinkRecord::new(6, 1, 2),
                LinkRecord::new(8, 1, 7),
            ];
            let store = GraphStore::build(pages, links).unwrap();
            let graph = FunctionalGraph::build(
                &store,
                RuleParams::new(1).with_fallback(FallbackPolicy::SelfLoop),
            )
            .unwrap();
            let snapshot = BasinSnapshot::label(&graph, &store);
            let index = BranchIndex::build(&graph, &snapshot);
            Self {
                store,
                graph,
                snapshot,
                index,
            }
        }

        fn ctx(&self) -> DashboardContext<'_> {
            DashboardContext {
                store: &self.store,
                graph: &self.graph,
                snapshot: &self.snapshot,
                index: &self.index,
            }
        }
    }

    #[test]
    fn test_trunkiness_rows() {
        let fx = Fixture::new();
        let out = fx
            .ctx()
            .trunkiness_dashboard(&EngineConfig::default(), 1, &StopSignal::new());
        assert!(!out.cancelled);
        assert_eq!(out.rows.len(), 2);
        let main = &out.rows[0];
        assert_eq!(main.cycle_key, "1__2");
        assert_eq!(main.cycle_label, "Alpha__Beta");
        assert_eq!(main.total_basin_nodes, 6);
        assert_eq!(main.dominant_entry_title.as_deref(), Some("Gamma"));
        assert!((main.top1_share_total.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(main.entry_branches, 2);
        assert_eq!(main.top_branches[0].root_id, 3);

        let dead_end = &out.rows[1];
        assert_eq!(dead_end.cycle_label, "Omega");
        assert_eq!(dead_end.dominant_entry_title.as_deref(), Some("Psi"));
        assert_eq!(dead_end.gini_branch_sizes, Some(0.0));
    }

    #[test]
    fn test_min_mass_filters_basins() {
        let fx = Fixture::new();
        let out = fx
            .ctx()
            .trunkiness_dashboard(&EngineConfig::default(), 3, &StopSignal::new());
        assert_eq!(out.rows.len(), 1);
    }

    #[test]
    fn test_cancelled_dashboard_is_flagged() {
        let fx = Fixture::new();
        let signal = StopSignal::new();
        signal.cancel();
        let out = fx
            .ctx()
            .trunkiness_dashboard(&EngineConfig::default(), 1, &signal);
        assert!(out.cancelled);
        assert!(out.rows.is_empty());
    }

    #[test]
    fn test_chase_dashboard() {
        let fx = Fixture::new();
        let config = EngineConfig {
            collapse_threshold: 0.6,
            ..EngineConfig::default()
        };
        let out = fx
            .ctx()
            .chase_dashboard(&config, 1, &StopSignal::new())
            .unwrap();
        assert_eq!(out.rows.len(), 2);
        let main = &out.rows[0];
        assert_eq!(main.seed_title, "Gamma");
        // Hop 0 split is 3/6, below 0.6.
        assert_eq!(main.stop_reason, StopReason::ThresholdBreached);
        assert_eq!(main.first_below_threshold_hop, Some(0));
        assert_eq!(main.hops_executed, 1);
    }

    #[test]
    fn test_chase_from_title() {
        let fx = Fixture::new();
        let row = fx
            .ctx()
            .chase_from_title("Gamma", &EngineConfig::default())
            .unwrap();
        // Gamma <- Delta <- Epsilon: shares 2/3, 1/2, then a leaf.
        assert_eq!(row.hops_executed, 2);
        assert_eq!(row.stop_reason, StopReason::NoPredecessor);
        assert!((row.min_share.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(row.first_below_threshold_hop, None);

        assert!(fx
            .ctx()
            .chase_from_title("Nowhere", &EngineConfig::default())
            .is_err());
    }
}
