//! The N-link rule: a pure mapping from (page, N) to one successor page.

use crate::config::{DisambiguationPolicy, FallbackPolicy, RuleParams};
use crate::engine::graph_store::GraphStore;
use crate::errors::NLinkResult;

/// Deterministic successor selection over a [`GraphStore`].
///
/// Redirect pages borrow their final target's links, so a redirect and its
/// target always share a successor.  Link targets that are redirects are
/// replaced by their final target.
#[derive(Clone, Copy)]
pub struct RuleEngine<'a> {
    store: &'a GraphStore,
    params: RuleParams,
}

impl<'a> RuleEngine<'a> {
    pub fn new(store: &'a GraphStore, params: RuleParams) -> NLinkResult<Self> {
        params.validate()?;
        Ok(Self { store, params })
    }

    pub fn params(&self) -> RuleParams {
        self.params
    }

    /// 1-based rank to follow from a page with `out_degree` links, or `None`
    /// when the page maps to itself.
    pub fn chosen_rank(&self, out_degree: usize) -> Option<usize> {
        select_rank(self.params.n as usize, out_degree, self.params.fallback)
    }

    pub fn successor(&self, node: u32) -> NLinkResult<u32> {
        let limit = self.params.redirect_hop_limit;
        let source = self.store.resolve_redirect(node, limit)?;
        let links = self.store.links(source);
        match self.chosen_rank(links.len()) {
            Some(rank) => self.concrete_target(links[rank - 1]),
            None => Ok(source),
        }
    }

    /// Resolve redirects on a chosen link target and, under the skip policy,
    /// substitute disambiguation pages by their first concrete link.
    fn concrete_target(&self, target: u32) -> NLinkResult<u32> {
        let limit = self.params.redirect_hop_limit;
        let mut current = self.store.resolve_redirect(target, limit)?;
        if self.params.disambiguation == DisambiguationPolicy::Traverse {
            return Ok(current);
        }
        let mut substitutions = 0u32;
        while self.store.is_disambiguation(current) && substitutions < limit {
            let Some(&first) = self.store.links(current).first() else {
                break;
            };
            current = self.store.resolve_redirect(first, limit)?;
            substitutions += 1;
        }
        Ok(current)
    }
}

/// Rank selection shared by every policy.  Pages without links are
/// self-loops regardless of policy.
pub fn select_rank(n: usize, out_degree: usize, fallback: FallbackPolicy) -> Option<usize> {
    if out_degree == 0 {
        return None;
    }
    if n <= out_degree {
        return Some(n);
    }
    match fallback {
        FallbackPolicy::Clamp => Some(out_degree),
        FallbackPolicy::Wrap => Some((n - 1) % out_degree + 1),
        FallbackPolicy::SelfLoop => None,
    }
}
