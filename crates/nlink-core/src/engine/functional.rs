//! Materialized successor array for one fixed rule.

use std::time::Instant;

use rayon::prelude::*;
use tracing::info;

use crate::config::RuleParams;
use crate::engine::graph_store::GraphStore;
use crate::engine::rule::RuleEngine;
use crate::errors::{NLinkError, NLinkResult};
use crate::models::FunctionalEdge;

/// A total function over node indices: `successors[v]` is the single
/// successor of node `v`.  Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionalGraph {
    params: RuleParams,
    successors: Vec<u32>,
}

impl FunctionalGraph {
    /// Apply the rule to every page.  Successors are computed in parallel;
    /// on failure the error for the lowest node index is reported so the
    /// diagnostic does not depend on scheduling.
    pub fn build(store: &GraphStore, params: RuleParams) -> NLinkResult<Self> {
        let started = Instant::now();
        let engine = RuleEngine::new(store, params)?;
        let results: Vec<NLinkResult<u32>> = (0..store.len() as u32)
            .into_par_iter()
            .map(|node| engine.successor(node))
            .collect();
        let mut successors = Vec::with_capacity(results.len());
        for result in results {
            successors.push(result?);
        }
        info!(
            n = params.n,
            nodes = successors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "functional graph built"
        );
        Ok(Self { params, successors })
    }

    /// Wrap a raw successor array.  Every entry must be a valid node index.
    pub fn from_successors(params: RuleParams, successors: Vec<u32>) -> NLinkResult<Self> {
        let len = successors.len();
        if let Some(node) = successors.iter().position(|&s| s as usize >= len) {
            return Err(NLinkError::integrity(
                node as i64,
                format!("successor {} is out of range", successors[node]),
            ));
        }
        Ok(Self { params, successors })
    }

    pub fn params(&self) -> RuleParams {
        self.params
    }

    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    pub fn successor(&self, node: u32) -> u32 {
        self.successors[node as usize]
    }

    pub fn successors(&self) -> &[u32] {
        &self.successors
    }

    /// Functional edges in page ids, ordered by source index.
    pub fn edges<'a>(&'a self, store: &'a GraphStore) -> impl Iterator<Item = FunctionalEdge> + 'a {
        self.successors
            .iter()
            .enumerate()
            .map(move |(source, &target)| FunctionalEdge {
                source_id: store.page_id(source as u32),
                target_id: store.page_id(target),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use crate::models::{LinkRecord, PageRecord};

    #[test]
    fn test_build_total_function() {
        let pages = (1..=4)
            .map(|id| PageRecord::article(id, format!("P{id}")))
            .collect();
        let links = vec![
            LinkRecord::new(1, 1, 2),
            LinkRecord::new(1, 2, 3),
            LinkRecord::new(2, 1, 1),
            LinkRecord::new(3, 1, 4),
            LinkRecord::new(4, 1, 3),
        ];
        let store = GraphStore::build(pages, links).unwrap();
        let graph = FunctionalGraph::build(
            &store,
            RuleParams::new(2).with_fallback(FallbackPolicy::Clamp),
        )
        .unwrap();
        assert_eq!(graph.len(), 4);
        let edges: Vec<(i64, i64)> = graph
            .edges(&store)
            .map(|e| (e.source_id, e.target_id))
            .collect();
        assert_eq!(edges, vec![(1, 3), (2, 1), (3, 4), (4, 3)]);
    }

    #[test]
    fn test_unresolvable_redirect_fails_build() {
        let pages = vec![
            PageRecord::article(1, "A"),
            PageRecord::redirect(2, "B", Some(3)),
            PageRecord::redirect(3, "C", Some(2)),
        ];
        let links = vec![LinkRecord::new(1, 1, 2)];
        let store = GraphStore::build(pages, links).unwrap();
        let err = FunctionalGraph::build(&store, RuleParams::new(1)).unwrap_err();
        // Page 1's link enters the redirect loop at page 2.
        assert!(matches!(err, NLinkError::DataIntegrity { node_id: 2, .. }));
    }

    #[test]
    fn test_from_successors_rejects_out_of_range() {
        assert!(FunctionalGraph::from_successors(RuleParams::new(1), vec![1, 0]).is_ok());
        assert!(FunctionalGraph::from_successors(RuleParams::new(1), vec![1, 2]).is_err());
    }
}
