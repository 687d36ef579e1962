//! Immutable in-memory view of pages and their ranked outgoing links.
//!
//! Pages are addressed by a dense `u32` node index (position in ascending
//! page-id order); page ids only appear at the edges of the engine.  Links
//! are kept in a compressed adjacency layout: `link_offsets[i]..link_offsets[i + 1]`
//! indexes the rank-ordered targets of node `i`.

use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use crate::errors::{NLinkError, NLinkResult};
use crate::models::{LinkRecord, PageRecord};

/// Sentinel for "no node".
pub const NO_NODE: u32 = u32::MAX;

const FLAG_REDIRECT: u8 = 0b01;
const FLAG_DISAMBIGUATION: u8 = 0b10;

#[derive(Debug)]
pub struct GraphStore {
    ids: Vec<i64>,
    titles: Vec<String>,
    flags: Vec<u8>,
    redirect_targets: Vec<u32>,
    index: HashMap<i64, u32>,
    link_offsets: Vec<usize>,
    link_targets: Vec<u32>,
}

/// Counts reported after a store is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub pages: usize,
    pub links: usize,
    pub redirects: usize,
    pub disambiguations: usize,
}

impl GraphStore {
    /// Build a store from finalized page and link tables.
    ///
    /// Fails on duplicate page ids, dangling link or redirect targets, and
    /// link ranks that are not exactly `1..=k` per source.
    pub fn build(mut pages: Vec<PageRecord>, mut links: Vec<LinkRecord>) -> NLinkResult<Self> {
        let started = Instant::now();
        if pages.len() >= NO_NODE as usize {
            return Err(NLinkError::integrity(
                -1,
                format!("page table too large: {} rows", pages.len()),
            ));
        }

        pages.sort_by_key(|p| p.id);
        let mut index: HashMap<i64, u32> = HashMap::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            if index.insert(page.id, i as u32).is_some() {
                return Err(NLinkError::integrity(page.id, "duplicate page id"));
            }
        }

        let mut ids = Vec::with_capacity(pages.len());
        let mut titles = Vec::with_capacity(pages.len());
        let mut flags = Vec::with_capacity(pages.len());
        let mut redirect_targets = Vec::with_capacity(pages.len());
        for page in pages {
            let mut flag = 0u8;
            let mut target = NO_NODE;
            if page.is_redirect {
                flag |= FLAG_REDIRECT;
                if let Some(raw) = page.redirect_target {
                    target = *index.get(&raw).ok_or_else(|| {
                        NLinkError::integrity(
                            page.id,
                            format!("redirect target {raw} is not in the page table"),
                        )
                    })?;
                }
            }
            if page.is_disambiguation {
                flag |= FLAG_DISAMBIGUATION;
            }
            ids.push(page.id);
            titles.push(page.title);
            flags.push(flag);
            redirect_targets.push(target);
        }

        links.sort_by_key(|l| (l.source_id, l.rank));
        let mut link_offsets = vec![0usize; ids.len() + 1];
        let mut link_targets = Vec::with_capacity(links.len());
        let mut expected_rank = 1i64;
        let mut current_source: Option<i64> = None;
        for link in &links {
            if current_source != Some(link.source_id) {
                current_source = Some(link.source_id);
                expected_rank = 1;
            }
            let source = *index.get(&link.source_id).ok_or_else(|| {
                NLinkError::integrity(link.source_id, "link source is not in the page table")
            })?;
            if link.rank != expected_rank {
                let message = if link.rank == expected_rank - 1 {
                    format!("duplicate link rank {}", link.rank)
                } else {
                    format!(
                        "link rank gap: expected rank {expected_rank}, found {}",
                        link.rank
                    )
                };
                return Err(NLinkError::integrity(link.source_id, message));
            }
            let target = *index.get(&link.target_id).ok_or_else(|| {
                NLinkError::integrity(
                    link.source_id,
                    format!(
                        "link rank {} targets page {} which is not in the page table",
                        link.rank, link.target_id
                    ),
                )
            })?;
            link_offsets[source as usize + 1] += 1;
            link_targets.push(target);
            expected_rank += 1;
        }
        for i in 1..link_offsets.len() {
            link_offsets[i] += link_offsets[i - 1];
        }

        let store = Self {
            ids,
            titles,
            flags,
            redirect_targets,
            index,
            link_offsets,
            link_targets,
        };
        let stats = store.stats();
        info!(
            pages = stats.pages,
            links = stats.links,
            redirects = stats.redirects,
            disambiguations = stats.disambiguations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "graph store built"
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            pages: self.ids.len(),
            links: self.link_targets.len(),
            redirects: self.flags.iter().filter(|f| *f & FLAG_REDIRECT != 0).count(),
            disambiguations: self
                .flags
                .iter()
                .filter(|f| *f & FLAG_DISAMBIGUATION != 0)
                .count(),
        }
    }

    pub fn page_id(&self, node: u32) -> i64 {
        self.ids[node as usize]
    }

    pub fn title(&self, node: u32) -> &str {
        &self.titles[node as usize]
    }

    pub fn index_of(&self, page_id: i64) -> Option<u32> {
        self.index.get(&page_id).copied()
    }

    /// Linear lookup by title; used for seeding, not on hot paths.
    pub fn find_title(&self, title: &str) -> Option<u32> {
        self.titles
            .iter()
            .position(|t| t == title)
            .map(|i| i as u32)
    }

    pub fn is_redirect(&self, node: u32) -> bool {
        self.flags[node as usize] & FLAG_REDIRECT != 0
    }

    pub fn is_disambiguation(&self, node: u32) -> bool {
        self.flags[node as usize] & FLAG_DISAMBIGUATION != 0
    }

    /// Rank-ordered link targets; `links(node)[r - 1]` is the rank-`r` link.
    pub fn links(&self, node: u32) -> &[u32] {
        let i = node as usize;
        &self.link_targets[self.link_offsets[i]..self.link_offsets[i + 1]]
    }

    pub fn out_degree(&self, node: u32) -> usize {
        let i = node as usize;
        self.link_offsets[i + 1] - self.link_offsets[i]
    }

    /// Follow the redirect chain starting at `node` to a non-redirect page.
    ///
    /// Chains longer than `hop_limit` (including redirect loops) and
    /// redirects without a target are integrity errors naming the page the
    /// resolution started from.
    pub fn resolve_redirect(&self, node: u32, hop_limit: u32) -> NLinkResult<u32> {
        let mut current = node;
        let mut hops = 0u32;
        while self.is_redirect(current) {
            if hops == hop_limit {
                return Err(NLinkError::integrity(
                    self.page_id(node),
                    format!("redirect chain unresolved after {hop_limit} hops"),
                ));
            }
            let target = self.redirect_targets[current as usize];
            if target == NO_NODE {
                return Err(NLinkError::integrity(
                    self.page_id(current),
                    "redirect page has no redirect target",
                ));
            }
            current = target;
            hops += 1;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(ids: &[i64]) -> Vec<PageRecord> {
        ids.iter()
            .map(|&id| PageRecord::article(id, format!("Page_{id}")))
            .collect()
    }

    #[test]
    fn test_build_orders_links_by_rank() {
        let store = GraphStore::build(
            pages(&[30, 10, 20]),
            vec![
                LinkRecord::new(10, 2, 30),
                LinkRecord::new(10, 1, 20),
                LinkRecord::new(20, 1, 10),
            ],
        )
        .unwrap();
        assert_eq!(store.len(), 3);
        let a = store.index_of(10).unwrap();
        let targets: Vec<i64> = store.links(a).iter().map(|&t| store.page_id(t)).collect();
        assert_eq!(targets, vec![20, 30]);
        assert_eq!(store.out_degree(store.index_of(30).unwrap()), 0);
        assert_eq!(store.stats().links, 3);
    }

    #[test]
    fn test_duplicate_page_id_rejected() {
        let err = GraphStore::build(pages(&[1, 2, 1]), vec![]).unwrap_err();
        assert!(matches!(err, NLinkError::DataIntegrity { node_id: 1, .. }));
    }

    #[test]
    fn test_rank_gap_rejected() {
        let err = GraphStore::build(
            pages(&[1, 2, 3]),
            vec![LinkRecord::new(1, 1, 2), LinkRecord::new(1, 3, 3)],
        )
        .unwrap_err();
        match err {
            NLinkError::DataIntegrity { node_id, message } => {
                assert_eq!(node_id, 1);
                assert!(message.contains("gap"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_rank_not_starting_at_one_rejected() {
        let err =
            GraphStore::build(pages(&[1, 2]), vec![LinkRecord::new(2, 2, 1)]).unwrap_err();
        assert!(matches!(err, NLinkError::DataIntegrity { node_id: 2, .. }));
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let err = GraphStore::build(
            pages(&[1, 2, 3]),
            vec![LinkRecord::new(1, 1, 2), LinkRecord::new(1, 1, 3)],
        )
        .unwrap_err();
        match err {
            NLinkError::DataIntegrity { message, .. } => {
                assert!(message.contains("duplicate"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_dangling_link_target_rejected() {
        let err =
            GraphStore::build(pages(&[1, 2]), vec![LinkRecord::new(1, 1, 99)]).unwrap_err();
        match err {
            NLinkError::DataIntegrity { node_id, message } => {
                assert_eq!(node_id, 1);
                assert!(message.contains("99"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_dangling_redirect_target_rejected() {
        let mut table = pages(&[1]);
        table.push(PageRecord::redirect(2, "Alias", Some(404)));
        let err = GraphStore::build(table, vec![]).unwrap_err();
        assert!(matches!(err, NLinkError::DataIntegrity { node_id: 2, .. }));
    }

    #[test]
    fn test_resolve_redirect_chain() {
        let mut table = pages(&[1]);
        table.push(PageRecord::redirect(2, "Alias", Some(3)));
        table.push(PageRecord::redirect(3, "Alias_of_alias", Some(1)));
        let store = GraphStore::build(table, vec![]).unwrap();
        let alias = store.index_of(2).unwrap();
        let resolved = store.resolve_redirect(alias, 8).unwrap();
        assert_eq!(store.page_id(resolved), 1);
        assert!(store.resolve_redirect(alias, 1).is_err());
    }

    #[test]
    fn test_redirect_loop_hits_hop_limit() {
        let table = vec![
            PageRecord::redirect(1, "A", Some(2)),
            PageRecord::redirect(2, "B", Some(1)),
        ];
        let store = GraphStore::build(table, vec![]).unwrap();
        let err = store.resolve_redirect(0, 8).unwrap_err();
        match err {
            NLinkError::DataIntegrity { node_id, message } => {
                assert_eq!(node_id, 1);
                assert!(message.contains("8 hops"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_redirect_without_target() {
        let store =
            GraphStore::build(vec![PageRecord::redirect(7, "Orphan", None)], vec![]).unwrap();
        assert!(store.resolve_redirect(0, 8).is_err());
    }

    #[test]
    fn test_find_title() {
        let store = GraphStore::build(pages(&[4, 5]), vec![]).unwrap();
        assert_eq!(store.find_title("Page_5"), store.index_of(5));
        assert_eq!(store.find_title("Missing"), None);
    }
}
