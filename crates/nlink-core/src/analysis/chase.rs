//! Upstream dominance chase along the largest predecessor branch.

use std::iter::FusedIterator;

use serde::Serialize;
use tracing::debug;

use crate::analysis::branches::BranchIndex;
use crate::analysis::signal::StopSignal;
use crate::config::validate_threshold;
use crate::engine::basins::BasinSnapshot;
use crate::engine::functional::FunctionalGraph;
use crate::errors::{NLinkError, NLinkResult};
use crate::models::StopReason;

/// Where a chase starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChaseSeed {
    /// The cycle of a basin, treated as a single root whose children are all
    /// entry branches.  Hop 0 measures the basin-level split.
    Basin(u32),
    /// A specific node; its children are its tree predecessors.
    Node(u32),
}

/// One hop of a chase.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ChaseStep {
    pub hop: u32,
    /// Node measured at this hop (for a basin seed at hop 0, the cycle node
    /// the dominant entry attaches to).
    pub node: u32,
    pub dominant_child: u32,
    /// Dominant child subtree over the subtree at this hop.
    pub dominant_share: f64,
    pub basin_size_at_hop: u64,
}

/// Finished chase with its single stop reason.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChaseRun {
    pub seed: u32,
    pub threshold: f64,
    pub steps: Vec<ChaseStep>,
    pub stop_reason: StopReason,
}

impl ChaseRun {
    pub fn hops_executed(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn min_share(&self) -> Option<f64> {
        self.steps.iter().map(|s| s.dominant_share).reduce(f64::min)
    }

    pub fn first_below_threshold_hop(&self) -> Option<u32> {
        self.steps
            .iter()
            .find(|s| s.dominant_share < self.threshold)
            .map(|s| s.hop)
    }
}

/// Chase entry point over one immutable decomposition.
#[derive(Clone, Copy)]
pub struct ChaseEngine<'a> {
    graph: &'a FunctionalGraph,
    snapshot: &'a BasinSnapshot,
    index: &'a BranchIndex,
}

impl<'a> ChaseEngine<'a> {
    pub fn new(
        graph: &'a FunctionalGraph,
        snapshot: &'a BasinSnapshot,
        index: &'a BranchIndex,
    ) -> Self {
        Self {
            graph,
            snapshot,
            index,
        }
    }

    /// Lazy chase.  The returned iterator yields one step per hop and cannot
    /// be restarted; its stop reason is available once it is exhausted.
    pub fn chase(&self, seed: ChaseSeed, threshold: f64, max_hops: u32) -> NLinkResult<Chase<'a>> {
        validate_threshold(threshold)?;
        let cursor = match seed {
            ChaseSeed::Basin(b) if (b as usize) < self.snapshot.basin_count() => Cursor::Cycle(b),
            ChaseSeed::Node(v) if (v as usize) < self.graph.len() => Cursor::Node(v),
            other => {
                return Err(NLinkError::config(format!(
                    "chase seed {other:?} is out of range"
                )))
            }
        };
        Ok(Chase {
            engine: *self,
            cursor,
            threshold,
            max_hops,
            hop: 0,
            stop: None,
            signal: None,
        })
    }

    /// Run a chase to completion.
    pub fn run(&self, seed: ChaseSeed, threshold: f64, max_hops: u32) -> NLinkResult<ChaseRun> {
        Ok(self.chase(seed, threshold, max_hops)?.finish())
    }
}

#[derive(Clone, Copy, Debug)]
enum Cursor {
    Cycle(u32),
    Node(u32),
}

pub struct Chase<'a> {
    engine: ChaseEngine<'a>,
    cursor: Cursor,
    threshold: f64,
    max_hops: u32,
    hop: u32,
    stop: Option<StopReason>,
    signal: Option<StopSignal>,
}

impl<'a> Chase<'a> {
    /// Check `signal` once per hop; a triggered signal ends the chase with
    /// [`StopReason::Cancelled`].
    pub fn with_signal(mut self, signal: StopSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    fn seed_node(&self) -> u32 {
        match self.cursor {
            Cursor::Cycle(b) => self.engine.snapshot.cycle(b).members[0],
            Cursor::Node(v) => v,
        }
    }

    /// Drain the remaining hops and return the completed run.
    pub fn finish(mut self) -> ChaseRun {
        let seed = self.seed_node();
        let steps: Vec<ChaseStep> = self.by_ref().collect();
        let stop_reason = self.stop.unwrap_or(StopReason::NoPredecessor);
        debug!(
            seed,
            hops = steps.len(),
            stop_reason = %stop_reason,
            "chase finished"
        );
        ChaseRun {
            seed,
            threshold: self.threshold,
            steps,
            stop_reason,
        }
    }

    fn halt(&mut self, reason: StopReason) -> Option<ChaseStep> {
        self.stop = Some(reason);
        None
    }
}

impl Iterator for Chase<'_> {
    type Item = ChaseStep;

    fn next(&mut self) -> Option<ChaseStep> {
        if self.stop.is_some() {
            return None;
        }
        if self.hop >= self.max_hops {
            return self.halt(StopReason::MaxHopsReached);
        }
        if let Some(signal) = &self.signal {
            if signal.should_stop() {
                return self.halt(StopReason::Cancelled);
            }
            signal.charge(1);
        }

        let index = self.engine.index;
        let (node, dominant, size) = match self.cursor {
            Cursor::Cycle(b) => {
                let dominant = index.entry_branches(self.engine.snapshot, b).first().copied();
                let node = dominant
                    .map(|d| self.engine.graph.successor(d.root))
                    .unwrap_or_else(|| self.engine.snapshot.cycle(b).members[0]);
                (node, dominant, self.engine.snapshot.mass(b))
            }
            Cursor::Node(v) => (v, index.dominant_child(v), index.subtree_size(v)),
        };
        let Some(dominant) = dominant else {
            return self.halt(StopReason::NoPredecessor);
        };

        let share = dominant.size as f64 / size as f64;
        let step = ChaseStep {
            hop: self.hop,
            node,
            dominant_child: dominant.root,
            dominant_share: share,
            basin_size_at_hop: size,
        };
        if share < self.threshold {
            self.stop = Some(StopReason::ThresholdBreached);
        } else {
            self.cursor = Cursor::Node(dominant.root);
            self.hop += 1;
        }
        Some(step)
    }
}

impl FusedIterator for Chase<'_> {}
