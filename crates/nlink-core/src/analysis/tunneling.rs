//! Cross-rule basin comparison ("tunneling").
//!
//! A pure diff over two independently labeled snapshots of the same page
//! set.  Basins are matched by cycle key, never by index, since indices are
//! only meaningful within one snapshot.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::engine::basins::BasinSnapshot;
use crate::engine::graph_store::GraphStore;
use crate::errors::{NLinkError, NLinkResult};
use crate::models::TunnelRow;

/// Node-level comparison between two snapshots.
pub struct TunnelComparison<'a> {
    first: &'a BasinSnapshot,
    second: &'a BasinSnapshot,
    tunneled: Vec<bool>,
}

/// Count of nodes moving from one basin to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BasinTransition {
    pub from_cycle_key: String,
    pub to_cycle_key: String,
    pub nodes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TunnelSummary {
    pub n1: u32,
    pub n2: u32,
    pub nodes: usize,
    pub tunneled: u64,
    pub transitions: Vec<BasinTransition>,
}

impl<'a> TunnelComparison<'a> {
    /// Compare two snapshots built from the same page set under different
    /// rule parameters.
    pub fn compare(first: &'a BasinSnapshot, second: &'a BasinSnapshot) -> NLinkResult<Self> {
        if first.node_count() != second.node_count() {
            return Err(NLinkError::config(format!(
                "snapshots cover different node sets ({} vs {} nodes)",
                first.node_count(),
                second.node_count()
            )));
        }
        if first.params() == second.params() {
            return Err(NLinkError::config(format!(
                "tunneling needs two different rules, both are {}",
                first.params().tag()
            )));
        }

        let matching: Vec<Option<u32>> = first
            .cycles()
            .iter()
            .map(|c| second.basin_index(&c.key))
            .collect();
        let tunneled: Vec<bool> = (0..first.node_count() as u32)
            .into_par_iter()
            .map(|v| matching[first.basin_of(v) as usize] != Some(second.basin_of(v)))
            .collect();

        let comparison = Self {
            first,
            second,
            tunneled,
        };
        info!(
            n1 = first.params().n,
            n2 = second.params().n,
            nodes = first.node_count(),
            tunneled = comparison.tunneled_count(),
            "tunneling comparison done"
        );
        Ok(comparison)
    }

    pub fn is_tunneled(&self, node: u32) -> bool {
        self.tunneled[node as usize]
    }

    pub fn tunneled_count(&self) -> u64 {
        self.tunneled.iter().filter(|&&t| t).count() as u64
    }

    pub fn tunneled_nodes(&self) -> Vec<u32> {
        self.tunneled
            .iter()
            .enumerate()
            .filter(|(_, &t)| t)
            .map(|(v, _)| v as u32)
            .collect()
    }

    /// Tunneling table rows in node order.
    pub fn rows<'s>(&'s self, store: &'s GraphStore) -> impl Iterator<Item = TunnelRow> + 's {
        (0..self.tunneled.len() as u32).map(move |v| TunnelRow {
            node_id: store.page_id(v),
            basin_under_n1: self.first.cycle_key_of(v).to_string(),
            basin_under_n2: self.second.cycle_key_of(v).to_string(),
            tunneled: self.tunneled[v as usize],
        })
    }

    /// Basin-to-basin flows of tunneled nodes, largest first.
    pub fn transitions(&self) -> Vec<BasinTransition> {
        let mut counts: HashMap<(u32, u32), u64> = HashMap::new();
        for (v, &t) in self.tunneled.iter().enumerate() {
            if t {
                let v = v as u32;
                *counts
                    .entry((self.first.basin_of(v), self.second.basin_of(v)))
                    .or_default() += 1;
            }
        }
        let mut flows: Vec<((u32, u32), u64)> = counts.into_iter().collect();
        flows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        flows
            .into_iter()
            .map(|((from, to), nodes)| BasinTransition {
                from_cycle_key: self.first.cycle(from).key.to_string(),
                to_cycle_key: self.second.cycle(to).key.to_string(),
                nodes,
            })
            .collect()
    }

    pub fn summary(&self, max_transitions: usize) -> TunnelSummary {
        let mut transitions = self.transitions();
        transitions.truncate(max_transitions);
        TunnelSummary {
            n1: self.first.params().n,
            n2: self.second.params().n,
            nodes: self.tunneled.len(),
            tunneled: self.tunneled_count(),
            transitions,
        }
    }
}

/// Summaries for consecutive pairs of an ordered snapshot sequence, e.g. the
/// snapshots for N = 3, 4, 5, 6.
pub fn sweep_summaries(
    snapshots: &[&BasinSnapshot],
    max_transitions: usize,
) -> NLinkResult<Vec<TunnelSummary>> {
    snapshots
        .windows(2)
        .map(|pair| Ok(TunnelComparison::compare(pair[0], pair[1])?.summary(max_transitions)))
        .collect()
}
