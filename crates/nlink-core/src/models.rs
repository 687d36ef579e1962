//! Shared typed models used across the engine, analysis, and storage layers.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Input records
// ---------------------------------------------------------------------------

/// One row of the finalized `page` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: i64,
    pub title: String,
    pub is_redirect: bool,
    pub redirect_target: Option<i64>,
    pub is_disambiguation: bool,
}

impl PageRecord {
    pub fn article(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            is_redirect: false,
            redirect_target: None,
            is_disambiguation: false,
        }
    }

    pub fn redirect(id: i64, title: impl Into<String>, target: Option<i64>) -> Self {
        Self {
            id,
            title: title.into(),
            is_redirect: true,
            redirect_target: target,
            is_disambiguation: false,
        }
    }

    pub fn disambiguation(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            is_redirect: false,
            redirect_target: None,
            is_disambiguation: true,
        }
    }
}

/// One row of the finalized `link` table.  `rank` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source_id: i64,
    pub rank: i64,
    pub target_id: i64,
}

impl LinkRecord {
    pub fn new(source_id: i64, rank: i64, target_id: i64) -> Self {
        Self {
            source_id,
            rank,
            target_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle identity
// ---------------------------------------------------------------------------

/// Canonical identity of a terminal cycle: its member page ids, sorted.
///
/// The same loop reached from different entry points always produces the
/// same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleKey(Vec<i64>);

impl CycleKey {
    pub fn from_page_ids(mut ids: Vec<i64>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        CycleKey(ids)
    }

    pub fn page_ids(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_self_loop(&self) -> bool {
        self.0.len() == 1
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("__")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Produced artifacts
// ---------------------------------------------------------------------------

/// One chosen successor, in page ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionalEdge {
    pub source_id: i64,
    pub target_id: i64,
}

/// Basin table row: one per node per rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BasinRow {
    pub node_id: i64,
    pub cycle_key: String,
    pub hop_distance_to_cycle: u32,
}

/// Trunkiness dashboard row: one per basin.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrunkinessRow {
    pub cycle_key: String,
    pub cycle_label: String,
    pub total_basin_nodes: u64,
    pub top1_share_total: Option<f64>,
    pub effective_branches: Option<f64>,
    pub gini_branch_sizes: Option<f64>,
    pub dominant_entry_title: Option<String>,
    pub entry_branches: usize,
    pub top_branches: Vec<BranchSummary>,
}

/// A ranked branch as reported in dashboards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BranchSummary {
    pub root_id: i64,
    pub root_title: String,
    pub size: u64,
    pub share: f64,
}

/// Why a chase stopped.  Exactly one per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ThresholdBreached,
    NoPredecessor,
    MaxHopsReached,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::ThresholdBreached => "threshold_breached",
            StopReason::NoPredecessor => "no_predecessor",
            StopReason::MaxHopsReached => "max_hops_reached",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chase/collapse dashboard row: one per chase run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChaseRow {
    pub seed_title: String,
    pub cycle_key: String,
    pub hops_executed: u32,
    pub min_share: Option<f64>,
    pub first_below_threshold_hop: Option<u32>,
    pub stop_reason: StopReason,
}

/// Tunneling table row: one per node per (N1, N2) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TunnelRow {
    pub node_id: i64,
    pub basin_under_n1: String,
    pub basin_under_n2: String,
    pub tunneled: bool,
}

/// Per-basin summary used for ordering and reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BasinSummary {
    pub cycle_key: String,
    pub cycle_len: usize,
    pub mass: u64,
    pub max_depth: u32,
}
