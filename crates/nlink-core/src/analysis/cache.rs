//! Bounded LRU cache of decompositions, keyed by rule tag.
//!
//! One cache serves one dataset: entries are keyed by rule parameters only,
//! so a cache must be dropped when the underlying store changes.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::RuleParams;
use crate::engine::graph_store::GraphStore;
use crate::errors::NLinkResult;
use crate::pipeline::Decomposition;

pub struct DecompositionCache {
    max_entries: usize,
    entries: Mutex<IndexMap<String, Arc<Decomposition>>>,
}

impl DecompositionCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn get(&self, params: &RuleParams) -> Option<Arc<Decomposition>> {
        let key = params.tag();
        let mut entries = self.entries.lock();
        let entry = entries.shift_remove(&key)?;
        // Move to end for LRU
        entries.insert(key, Arc::clone(&entry));
        Some(entry)
    }

    /// Return the cached decomposition or compute it.  The lock is not held
    /// while computing, so two threads may race on the same key; the first
    /// insert wins and both callers see an equal result.
    pub fn get_or_compute(
        &self,
        store: &GraphStore,
        params: RuleParams,
    ) -> NLinkResult<Arc<Decomposition>> {
        if let Some(hit) = self.get(&params) {
            debug!(rule = %params.tag(), "decomposition cache hit");
            return Ok(hit);
        }
        let computed = Arc::new(Decomposition::compute(store, params)?);
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(params.tag())
            .or_insert_with(|| Arc::clone(&computed))
            .clone();
        while entries.len() > self.max_entries {
            entries.shift_remove_index(0);
        }
        Ok(entry)
    }

    pub fn stats(&self) -> HashMap<String, i64> {
        let entries = self.entries.lock();
        let mut result = HashMap::new();
        result.insert("entries".to_string(), entries.len() as i64);
        result.insert("max_entries".to_string(), self.max_entries as i64);
        result
    }
}
