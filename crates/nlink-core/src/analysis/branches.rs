//! Predecessor trees, subtree sizes, and branch inequality metrics.
//!
//! The reverse tree of a basin is rooted at its cycle: every non-cycle node
//! hangs under its successor, and cycle-to-cycle edges are left out.  One
//! linear pass builds the predecessor lists for all basins and one bottom-up
//! pass aggregates subtree sizes, visiting nodes deepest-first so a child is
//! always folded into its parent before the parent is folded further.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::basins::BasinSnapshot;
use crate::engine::functional::FunctionalGraph;

/// Inequality metrics over a set of sibling branch sizes.
///
/// All ratios are `None` when there are no branches (an undefined metric,
/// not an error).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BranchMetrics {
    pub branches: usize,
    pub total: u64,
    pub top1_share: Option<f64>,
    pub effective_branches: Option<f64>,
    pub gini: Option<f64>,
}

impl BranchMetrics {
    pub fn from_sizes(sizes: &[u64]) -> Self {
        let branches = sizes.len();
        let total: u64 = sizes.iter().sum();
        if branches == 0 || total == 0 {
            return Self {
                branches,
                total,
                top1_share: None,
                effective_branches: None,
                gini: None,
            };
        }
        let max = sizes.iter().copied().max().unwrap_or(0);
        let total_f = total as f64;
        let sum_sq: f64 = sizes.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let effective = (total_f * total_f / sum_sq).clamp(1.0, branches as f64);
        Self {
            branches,
            total,
            top1_share: Some(max as f64 / total_f),
            effective_branches: Some(effective),
            gini: Some(gini(sizes)),
        }
    }
}

/// Gini coefficient with the sorted-rank formula, computed in integers so
/// equal sizes give exactly zero.
pub fn gini(sizes: &[u64]) -> f64 {
    let n = sizes.len() as i128;
    let total: i128 = sizes.iter().map(|&s| s as i128).sum();
    if n == 0 || total == 0 {
        return 0.0;
    }
    let mut sorted = sizes.to_vec();
    sorted.sort_unstable();
    let weighted: i128 = sorted
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as i128 + 1) * s as i128)
        .sum();
    let numerator = 2 * weighted - (n + 1) * total;
    (numerator as f64 / (n * total) as f64).clamp(0.0, 1.0)
}

/// One child branch of a branch point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub root: u32,
    pub size: u64,
}

/// Branch structure of a whole basin, split at its cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BasinBranchProfile {
    pub basin: u32,
    pub total_basin_nodes: u64,
    /// Largest entry branch over the whole basin, cycle included.
    pub top1_share_total: Option<f64>,
    pub metrics: BranchMetrics,
    pub dominant_entry: Option<Branch>,
    pub top_branches: Vec<Branch>,
}

/// Reverse adjacency and subtree sizes for every node of one snapshot.
pub struct BranchIndex {
    child_offsets: Vec<usize>,
    children: Vec<u32>,
    subtree: Vec<u64>,
}

impl BranchIndex {
    pub fn build(graph: &FunctionalGraph, snapshot: &BasinSnapshot) -> Self {
        let started = Instant::now();
        let n = graph.len();
        let depths = snapshot.depths();

        let mut child_offsets = vec![0usize; n + 1];
        for v in 0..n {
            if depths[v] > 0 {
                child_offsets[graph.successor(v as u32) as usize + 1] += 1;
            }
        }
        for i in 1..child_offsets.len() {
            child_offsets[i] += child_offsets[i - 1];
        }
        let mut cursor = child_offsets.clone();
        let mut children = vec![0u32; child_offsets[n]];
        for v in 0..n {
            if depths[v] > 0 {
                let parent = graph.successor(v as u32) as usize;
                children[cursor[parent]] = v as u32;
                cursor[parent] += 1;
            }
        }

        // Deepest-first order via counting sort on hop distance.
        let max_depth = depths.iter().copied().max().unwrap_or(0) as usize;
        let mut depth_offsets = vec![0usize; max_depth + 2];
        for &d in depths {
            depth_offsets[d as usize + 1] += 1;
        }
        for i in 1..depth_offsets.len() {
            depth_offsets[i] += depth_offsets[i - 1];
        }
        let mut order = vec![0u32; n];
        for (v, &d) in depths.iter().enumerate() {
            order[depth_offsets[d as usize]] = v as u32;
            depth_offsets[d as usize] += 1;
        }

        let mut subtree = vec![1u64; n];
        for &v in order.iter().rev() {
            if depths[v as usize] > 0 {
                let parent = graph.successor(v) as usize;
                subtree[parent] += subtree[v as usize];
            }
        }

        info!(
            nodes = n,
            tree_edges = children.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "branch index built"
        );
        Self {
            child_offsets,
            children,
            subtree,
        }
    }

    /// Immediate tree predecessors of `node`, in ascending node order.
    pub fn children(&self, node: u32) -> &[u32] {
        let i = node as usize;
        &self.children[self.child_offsets[i]..self.child_offsets[i + 1]]
    }

    /// Size of the tree hanging under `node`, itself included.  For a cycle
    /// node this counts the node and every tree attached to it.
    pub fn subtree_size(&self, node: u32) -> u64 {
        self.subtree[node as usize]
    }

    /// Child branches of `node`, largest first (ties by node index).
    pub fn branches(&self, node: u32) -> Vec<Branch> {
        let mut branches: Vec<Branch> = self
            .children(node)
            .iter()
            .map(|&c| Branch {
                root: c,
                size: self.subtree[c as usize],
            })
            .collect();
        sort_branches(&mut branches);
        branches
    }

    /// The child with the largest subtree; ties go to the smallest index.
    pub fn dominant_child(&self, node: u32) -> Option<Branch> {
        self.children(node)
            .iter()
            .map(|&c| Branch {
                root: c,
                size: self.subtree[c as usize],
            })
            .reduce(|best, b| if b.size > best.size { b } else { best })
    }

    /// Every branch entering a basin's cycle from outside it.
    pub fn entry_branches(&self, snapshot: &BasinSnapshot, basin: u32) -> Vec<Branch> {
        let mut branches: Vec<Branch> = snapshot
            .cycle(basin)
            .members
            .iter()
            .flat_map(|&m| self.children(m).iter())
            .map(|&c| Branch {
                root: c,
                size: self.subtree[c as usize],
            })
            .collect();
        sort_branches(&mut branches);
        branches
    }

    /// Metrics at the cycle split of one basin.
    pub fn basin_profile(
        &self,
        snapshot: &BasinSnapshot,
        basin: u32,
        top_k: usize,
    ) -> BasinBranchProfile {
        let entries = self.entry_branches(snapshot, basin);
        let sizes: Vec<u64> = entries.iter().map(|b| b.size).collect();
        let metrics = BranchMetrics::from_sizes(&sizes);
        let total_basin_nodes = snapshot.mass(basin);
        if entries.is_empty() {
            warn!(
                cycle_key = %snapshot.cycle(basin).key,
                "empty basin: no branches beyond the cycle, metrics undefined"
            );
        }
        let dominant_entry = entries.first().copied();
        BasinBranchProfile {
            basin,
            total_basin_nodes,
            top1_share_total: dominant_entry.map(|b| b.size as f64 / total_basin_nodes as f64),
            metrics,
            dominant_entry,
            top_branches: entries.into_iter().take(top_k).collect(),
        }
    }

    /// Metrics over all sibling subtrees rooted at hop distance `level`
    /// (level 1 is the cycle split) within one basin's member list.
    pub fn level_metrics(
        &self,
        snapshot: &BasinSnapshot,
        members: &[u32],
        level: u32,
    ) -> BranchMetrics {
        let sizes: Vec<u64> = members
            .iter()
            .filter(|&&v| level > 0 && snapshot.depth(v) == level)
            .map(|&v| self.subtree[v as usize])
            .collect();
        BranchMetrics::from_sizes(&sizes)
    }
}

fn sort_branches(branches: &mut [Branch]) {
    branches.sort_by(|a, b| b.size.cmp(&a.size).then(a.root.cmp(&b.root)));
}
