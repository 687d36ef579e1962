//! Terminal-cycle detection and basin labeling on a functional graph.
//!
//! Every node is pushed onto the walk stack once, labeled once, and never
//! revisited, so labeling is linear in the node count no matter how long the
//! chains feeding a cycle are.

use std::time::Instant;

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::RuleParams;
use crate::engine::functional::FunctionalGraph;
use crate::engine::graph_store::GraphStore;
use crate::models::{BasinRow, BasinSummary, CycleKey};

const UNVISITED: u32 = u32::MAX;
const ON_PATH: u32 = u32::MAX - 1;

/// A terminal cycle.  `members` is in successor order, starting from the
/// member with the smallest page id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    pub key: CycleKey,
    pub members: Vec<u32>,
}

impl Cycle {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Immutable basin partition for one rule.
///
/// Cycles are stored in ascending key order, so basin indices are canonical
/// for a given (dataset, rule).
#[derive(Clone, Debug)]
pub struct BasinSnapshot {
    params: RuleParams,
    cycles: Vec<Cycle>,
    basin_of: Vec<u32>,
    depth: Vec<u32>,
    masses: Vec<u64>,
}

/// Basin members grouped by basin, in ascending node order.
pub struct BasinMembers {
    offsets: Vec<usize>,
    nodes: Vec<u32>,
}

impl BasinMembers {
    pub fn of(&self, basin: u32) -> &[u32] {
        let b = basin as usize;
        &self.nodes[self.offsets[b]..self.offsets[b + 1]]
    }
}

impl BasinSnapshot {
    /// Label a functional graph whose nodes come from `store`.
    pub fn label(graph: &FunctionalGraph, store: &GraphStore) -> Self {
        Self::label_with(graph, |node| store.page_id(node))
    }

    /// Label a functional graph, deriving cycle keys through `page_id`.
    /// `page_id` must be strictly increasing in the node index.
    pub fn label_with<F>(graph: &FunctionalGraph, page_id: F) -> Self
    where
        F: Fn(u32) -> i64,
    {
        let started = Instant::now();
        let n = graph.len();
        let mut basin_of = vec![UNVISITED; n];
        // While a node is on the walk stack, `depth` holds its stack position.
        let mut depth = vec![0u32; n];
        let mut path: Vec<u32> = Vec::new();
        let mut raw_cycles: Vec<Vec<u32>> = Vec::new();

        for start in 0..n as u32 {
            if basin_of[start as usize] != UNVISITED {
                continue;
            }
            path.clear();
            let mut v = start;
            while basin_of[v as usize] == UNVISITED {
                basin_of[v as usize] = ON_PATH;
                depth[v as usize] = path.len() as u32;
                path.push(v);
                v = graph.successor(v);
            }

            let (basin, base_depth, tail_len) = if basin_of[v as usize] == ON_PATH {
                let pos = depth[v as usize] as usize;
                let id = raw_cycles.len() as u32;
                let members = path[pos..].to_vec();
                for &m in &members {
                    basin_of[m as usize] = id;
                    depth[m as usize] = 0;
                }
                raw_cycles.push(members);
                (id, 0, pos)
            } else {
                (basin_of[v as usize], depth[v as usize], path.len())
            };

            for (i, &u) in path[..tail_len].iter().rev().enumerate() {
                basin_of[u as usize] = basin;
                depth[u as usize] = base_depth + i as u32 + 1;
            }
        }

        let mut cycles: Vec<(u32, Cycle)> = raw_cycles
            .into_iter()
            .enumerate()
            .map(|(id, members)| (id as u32, canonical_cycle(members, &page_id)))
            .collect();
        cycles.sort_by(|a, b| a.1.key.cmp(&b.1.key));

        let mut remap = vec![0u32; cycles.len()];
        for (new_id, (old_id, _)) in cycles.iter().enumerate() {
            remap[*old_id as usize] = new_id as u32;
        }
        basin_of
            .par_iter_mut()
            .for_each(|b| *b = remap[*b as usize]);

        let mut masses = vec![0u64; cycles.len()];
        for &b in &basin_of {
            masses[b as usize] += 1;
        }

        let cycles: Vec<Cycle> = cycles.into_iter().map(|(_, c)| c).collect();
        info!(
            n = graph.params().n,
            nodes = n,
            cycles = cycles.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "basins labeled"
        );
        debug!(
            self_loops = cycles.iter().filter(|c| c.len() == 1).count(),
            "cycle length breakdown"
        );

        Self {
            params: graph.params(),
            cycles,
            basin_of,
            depth,
            masses,
        }
    }

    pub fn params(&self) -> RuleParams {
        self.params
    }

    pub fn node_count(&self) -> usize {
        self.basin_of.len()
    }

    pub fn basin_count(&self) -> usize {
        self.cycles.len()
    }

    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    pub fn cycle(&self, basin: u32) -> &Cycle {
        &self.cycles[basin as usize]
    }

    pub fn basin_of(&self, node: u32) -> u32 {
        self.basin_of[node as usize]
    }

    pub fn cycle_key_of(&self, node: u32) -> &CycleKey {
        &self.cycles[self.basin_of(node) as usize].key
    }

    pub fn depth(&self, node: u32) -> u32 {
        self.depth[node as usize]
    }

    pub fn depths(&self) -> &[u32] {
        &self.depth
    }

    pub fn is_cycle_node(&self, node: u32) -> bool {
        self.depth[node as usize] == 0
    }

    pub fn mass(&self, basin: u32) -> u64 {
        self.masses[basin as usize]
    }

    pub fn masses(&self) -> &[u64] {
        &self.masses
    }

    /// Basin index for a cycle key, if that cycle exists under this rule.
    pub fn basin_index(&self, key: &CycleKey) -> Option<u32> {
        self.cycles
            .binary_search_by(|c| c.key.cmp(key))
            .ok()
            .map(|i| i as u32)
    }

    /// Group nodes by basin with one counting pass.
    pub fn members(&self) -> BasinMembers {
        let mut offsets = vec![0usize; self.cycles.len() + 1];
        for &b in &self.basin_of {
            offsets[b as usize + 1] += 1;
        }
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }
        let mut cursor = offsets.clone();
        let mut nodes = vec![0u32; self.basin_of.len()];
        for (node, &b) in self.basin_of.iter().enumerate() {
            nodes[cursor[b as usize]] = node as u32;
            cursor[b as usize] += 1;
        }
        BasinMembers { offsets, nodes }
    }

    /// Per-basin summaries, largest basin first (ties by key).
    pub fn summaries(&self) -> Vec<BasinSummary> {
        let mut max_depth = vec![0u32; self.cycles.len()];
        for (node, &b) in self.basin_of.iter().enumerate() {
            max_depth[b as usize] = max_depth[b as usize].max(self.depth[node]);
        }
        let mut order: Vec<usize> = (0..self.cycles.len()).collect();
        order.sort_by(|&a, &b| self.masses[b].cmp(&self.masses[a]).then(a.cmp(&b)));
        order
            .into_iter()
            .map(|b| BasinSummary {
                cycle_key: self.cycles[b].key.to_string(),
                cycle_len: self.cycles[b].len(),
                mass: self.masses[b],
                max_depth: max_depth[b],
            })
            .collect()
    }

    /// Basin table rows in node order.
    pub fn rows<'a>(&'a self, store: &'a GraphStore) -> impl Iterator<Item = BasinRow> + 'a {
        let keys: Vec<String> = self.cycles.iter().map(|c| c.key.to_string()).collect();
        (0..self.basin_of.len()).map(move |node| BasinRow {
            node_id: store.page_id(node as u32),
            cycle_key: keys[self.basin_of[node] as usize].clone(),
            hop_distance_to_cycle: self.depth[node],
        })
    }

    /// SHA-256 over the canonical basin table.  Equal fingerprints mean
    /// byte-identical basin tables.
    pub fn fingerprint(&self, store: &GraphStore) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.params.tag().as_bytes());
        hasher.update(b"\n");
        for row in self.rows(store) {
            hasher.update(
                format!(
                    "{}\t{}\t{}\n",
                    row.node_id, row.cycle_key, row.hop_distance_to_cycle
                )
                .as_bytes(),
            );
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Rotate the loop to start at its smallest page id and derive its key.
fn canonical_cycle<F>(mut members: Vec<u32>, page_id: &F) -> Cycle
where
    F: Fn(u32) -> i64,
{
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, &m)| page_id(m))
        .map(|(i, _)| i)
        .unwrap_or(0);
    members.rotate_left(start);
    let key = CycleKey::from_page_ids(members.iter().map(|&m| page_id(m)).collect());
    Cycle { key, members }
}
