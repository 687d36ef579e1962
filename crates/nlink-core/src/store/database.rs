//! SQLite storage layer.
//!
//! Each public method opens its own connection so the caller never manages
//! connection lifetime.  Artifact writes replace all rows for the rule tag
//! inside one transaction, so a table never holds a mix of two runs.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::{params, Connection};
use tracing::info;

use crate::analysis::tunneling::TunnelComparison;
use crate::config::RuleParams;
use crate::engine::basins::BasinSnapshot;
use crate::engine::graph_store::GraphStore;
use crate::errors::NLinkResult;
use crate::models::{BasinRow, ChaseRow, LinkRecord, PageRecord, TrunkinessRow};
use crate::store::schema;

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

/// Absolute form of `path` with its parent directory created.
fn resolve_path(path: &Path) -> NLinkResult<PathBuf> {
    let expanded = expand_tilde(&path.to_string_lossy());
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(&expanded)
    };
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(resolved)
}

/// SQLite page/link store and artifact sink.
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Resolve the path (expanding `~`) and create parent directories.
    pub fn open(db_path: impl AsRef<Path>) -> NLinkResult<Self> {
        Ok(Self {
            db_path: resolve_path(db_path.as_ref())?,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn connect(&self) -> NLinkResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Set WAL mode, create tables and indexes, then run pending migrations.
    pub fn init_schema(&self) -> NLinkResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::init_connection(&conn)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> NLinkResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO meta(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> NLinkResult<Option<String>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT value FROM meta WHERE key = ?1 LIMIT 1;",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy the database to `destination` with the SQLite backup API.
    pub fn backup_to(&self, destination: impl AsRef<Path>) -> NLinkResult<PathBuf> {
        let resolved = resolve_path(destination.as_ref())?;
        let src_conn = self.connect()?;
        let mut dst_conn = Connection::open(&resolved)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        info!(path = %resolved.display(), "database backed up");
        Ok(resolved)
    }

    // -----------------------------------------------------------------------
    // Input tables
    // -----------------------------------------------------------------------

    pub fn insert_pages(&self, pages: &[PageRecord]) -> NLinkResult<()> {
        let conn = self.connect()?;
        insert_pages(&conn, pages)
    }

    pub fn insert_links(&self, links: &[LinkRecord]) -> NLinkResult<()> {
        let conn = self.connect()?;
        insert_links(&conn, links)
    }

    pub fn load_graph_store(&self) -> NLinkResult<GraphStore> {
        let conn = self.connect()?;
        load_graph_store(&conn)
    }

    // -----------------------------------------------------------------------
    // Artifact tables
    // -----------------------------------------------------------------------

    pub fn write_basin_table(
        &self,
        params: &RuleParams,
        snapshot: &BasinSnapshot,
        store: &GraphStore,
    ) -> NLinkResult<()> {
        let conn = self.connect()?;
        write_basin_table(&conn, params, snapshot, store)
    }

    pub fn write_trunkiness(&self, params: &RuleParams, rows: &[TrunkinessRow]) -> NLinkResult<()> {
        let conn = self.connect()?;
        write_trunkiness(&conn, params, rows)
    }

    pub fn write_chase_runs(
        &self,
        params: &RuleParams,
        threshold: f64,
        rows: &[ChaseRow],
    ) -> NLinkResult<()> {
        let conn = self.connect()?;
        write_chase_runs(&conn, params, threshold, rows)
    }

    pub fn write_tunneling(
        &self,
        first: &RuleParams,
        second: &RuleParams,
        comparison: &TunnelComparison<'_>,
        store: &GraphStore,
    ) -> NLinkResult<()> {
        let conn = self.connect()?;
        write_tunneling(&conn, first, second, comparison, store)
    }

    pub fn basin_table(&self, params: &RuleParams) -> NLinkResult<Vec<BasinRow>> {
        let conn = self.connect()?;
        basin_table(&conn, params)
    }

    /// Page ids whose basin differs between the two rules, ascending.
    pub fn tunneled_nodes(&self, first: &RuleParams, second: &RuleParams) -> NLinkResult<Vec<i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT node_id FROM tunneling \
             WHERE rule_tag_n1 = ?1 AND rule_tag_n2 = ?2 AND tunneled = 1 \
             ORDER BY node_id;",
        )?;
        let ids = stmt
            .query_map(params![first.tag(), second.tag()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Connection-level operations
// ---------------------------------------------------------------------------

pub fn insert_pages(conn: &Connection, pages: &[PageRecord]) -> NLinkResult<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO pages (id, title, is_redirect, redirect_target, is_disambiguation) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET \
                 title = excluded.title, \
                 is_redirect = excluded.is_redirect, \
                 redirect_target = excluded.redirect_target, \
                 is_disambiguation = excluded.is_disambiguation;",
        )?;
        for page in pages {
            stmt.execute(params![
                page.id,
                page.title,
                page.is_redirect,
                page.redirect_target,
                page.is_disambiguation
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn insert_links(conn: &Connection, links: &[LinkRecord]) -> NLinkResult<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO links (source_id, rank, target_id) VALUES (?1, ?2, ?3);")?;
        for link in links {
            stmt.execute(params![link.source_id, link.rank, link.target_id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Read both input tables in full and build the in-memory store.
pub fn load_graph_store(conn: &Connection) -> NLinkResult<GraphStore> {
    let started = Instant::now();
    let mut stmt = conn.prepare(
        "SELECT id, title, is_redirect, redirect_target, is_disambiguation FROM pages;",
    )?;
    let pages = stmt
        .query_map([], |row| {
            Ok(PageRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                is_redirect: row.get(2)?,
                redirect_target: row.get(3)?,
                is_disambiguation: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT source_id, rank, target_id FROM links;")?;
    let links = stmt
        .query_map([], |row| {
            Ok(LinkRecord {
                source_id: row.get(0)?,
                rank: row.get(1)?,
                target_id: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        pages = pages.len(),
        links = links.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "page and link tables loaded"
    );
    GraphStore::build(pages, links)
}

pub fn write_basin_table(
    conn: &Connection,
    params: &RuleParams,
    snapshot: &BasinSnapshot,
    store: &GraphStore,
) -> NLinkResult<()> {
    let tag = params.tag();
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM basin_assignments WHERE rule_tag = ?1;", params![tag])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO basin_assignments (rule_tag, n, node_id, cycle_key, hop_distance) \
             VALUES (?1, ?2, ?3, ?4, ?5);",
        )?;
        for row in snapshot.rows(store) {
            stmt.execute(params![
                tag,
                params.n,
                row.node_id,
                row.cycle_key,
                row.hop_distance_to_cycle
            ])?;
        }
    }
    tx.commit()?;
    info!(rule = %tag, rows = snapshot.node_count(), "basin table written");
    Ok(())
}

pub fn write_trunkiness(
    conn: &Connection,
    params: &RuleParams,
    rows: &[TrunkinessRow],
) -> NLinkResult<()> {
    let tag = params.tag();
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM basin_trunkiness WHERE rule_tag = ?1;", params![tag])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO basin_trunkiness (rule_tag, n, cycle_key, cycle_label, \
                 total_basin_nodes, top1_share_total, effective_branches, \
                 gini_branch_sizes, dominant_entry_title, entry_branches) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
        )?;
        for row in rows {
            stmt.execute(params![
                tag,
                params.n,
                row.cycle_key,
                row.cycle_label,
                row.total_basin_nodes as i64,
                row.top1_share_total,
                row.effective_branches,
                row.gini_branch_sizes,
                row.dominant_entry_title,
                row.entry_branches as i64
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn write_chase_runs(
    conn: &Connection,
    params: &RuleParams,
    threshold: f64,
    rows: &[ChaseRow],
) -> NLinkResult<()> {
    let tag = params.tag();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM chase_runs WHERE rule_tag = ?1 AND threshold = ?2;",
        params![tag, threshold],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO chase_runs (rule_tag, n, seed_title, cycle_key, threshold, \
                 hops_executed, min_share, first_below_threshold_hop, stop_reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
        )?;
        for row in rows {
            stmt.execute(params![
                tag,
                params.n,
                row.seed_title,
                row.cycle_key,
                threshold,
                row.hops_executed,
                row.min_share,
                row.first_below_threshold_hop,
                row.stop_reason.as_str()
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn write_tunneling(
    conn: &Connection,
    first: &RuleParams,
    second: &RuleParams,
    comparison: &TunnelComparison<'_>,
    store: &GraphStore,
) -> NLinkResult<()> {
    let (tag1, tag2) = (first.tag(), second.tag());
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM tunneling WHERE rule_tag_n1 = ?1 AND rule_tag_n2 = ?2;",
        params![tag1, tag2],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO tunneling (rule_tag_n1, rule_tag_n2, node_id, basin_under_n1, \
                 basin_under_n2, tunneled) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        )?;
        for row in comparison.rows(store) {
            stmt.execute(params![
                tag1,
                tag2,
                row.node_id,
                row.basin_under_n1,
                row.basin_under_n2,
                row.tunneled
            ])?;
        }
    }
    tx.commit()?;
    info!(
        rule_n1 = %tag1,
        rule_n2 = %tag2,
        tunneled = comparison.tunneled_count(),
        "tunneling table written"
    );
    Ok(())
}

pub fn basin_table(conn: &Connection, params: &RuleParams) -> NLinkResult<Vec<BasinRow>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, cycle_key, hop_distance FROM basin_assignments \
         WHERE rule_tag = ?1 ORDER BY node_id;",
    )?;
    let rows = stmt
        .query_map(params![params.tag()], |row| {
            Ok(BasinRow {
                node_id: row.get(0)?,
                cycle_key: row.get(1)?,
                hop_distance_to_cycle: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
