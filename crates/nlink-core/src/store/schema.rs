//! SQLite schema DDL and migration framework.
//!
//! `pages` and `links` are the finalized input tables produced by ingestion;
//! the remaining tables hold derived artifacts keyed by rule tag.

use rusqlite::Connection;

use crate::errors::NLinkResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Core DDL statements, safe to replay on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables ──────────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS pages (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        is_redirect INTEGER NOT NULL DEFAULT 0,
        redirect_target INTEGER,
        is_disambiguation INTEGER NOT NULL DEFAULT 0
    );",
    // No uniqueness constraint: rank gaps and duplicates are reported by
    // the graph store with the offending page id.
    "CREATE TABLE IF NOT EXISTS links (
        source_id INTEGER NOT NULL,
        rank INTEGER NOT NULL,
        target_id INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS basin_assignments (
        rule_tag TEXT NOT NULL,
        n INTEGER NOT NULL,
        node_id INTEGER NOT NULL,
        cycle_key TEXT NOT NULL,
        hop_distance INTEGER NOT NULL,
        PRIMARY KEY(rule_tag, node_id)
    );",
    "CREATE TABLE IF NOT EXISTS basin_trunkiness (
        rule_tag TEXT NOT NULL,
        n INTEGER NOT NULL,
        cycle_key TEXT NOT NULL,
        cycle_label TEXT NOT NULL,
        total_basin_nodes INTEGER NOT NULL,
        top1_share_total REAL,
        effective_branches REAL,
        gini_branch_sizes REAL,
        dominant_entry_title TEXT,
        entry_branches INTEGER NOT NULL,
        PRIMARY KEY(rule_tag, cycle_key)
    );",
    "CREATE TABLE IF NOT EXISTS chase_runs (
        rule_tag TEXT NOT NULL,
        n INTEGER NOT NULL,
        seed_title TEXT NOT NULL,
        cycle_key TEXT NOT NULL,
        threshold REAL NOT NULL,
        hops_executed INTEGER NOT NULL,
        min_share REAL,
        first_below_threshold_hop INTEGER,
        stop_reason TEXT NOT NULL,
        PRIMARY KEY(rule_tag, cycle_key, seed_title, threshold)
    );",
    "CREATE TABLE IF NOT EXISTS tunneling (
        rule_tag_n1 TEXT NOT NULL,
        rule_tag_n2 TEXT NOT NULL,
        node_id INTEGER NOT NULL,
        basin_under_n1 TEXT NOT NULL,
        basin_under_n2 TEXT NOT NULL,
        tunneled INTEGER NOT NULL,
        PRIMARY KEY(rule_tag_n1, rule_tag_n2, node_id)
    );",
    // ── indexes ─────────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_links_source_rank ON links(source_id, rank);",
    "CREATE INDEX IF NOT EXISTS idx_basin_assignments_cycle ON basin_assignments(rule_tag, cycle_key);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`].  Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> NLinkResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT nlink_migrate_step;")?;

        let step_result = (|| -> NLinkResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT nlink_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT nlink_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT nlink_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `meta`.
/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> NLinkResult<()> {
    conn.execute(
        "INSERT INTO meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> NLinkResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, no-op.
fn migrate_to_v1(_conn: &Connection) -> NLinkResult<()> {
    Ok(())
}

/// v1 -> v2: index tunneled nodes for candidate lookups.
fn migrate_to_v2(conn: &Connection) -> NLinkResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_tunneling_tunneled \
         ON tunneling(rule_tag_n1, rule_tag_n2, tunneled);",
    )?;
    Ok(())
}

/// Apply DDL and migrations to an open connection.
pub fn init_connection(conn: &Connection) -> NLinkResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    migrate_schema(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        init_connection(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_connection(&conn).unwrap();
        init_connection(&conn).unwrap();
        let steps: i64 = conn
            .query_row("SELECT COUNT(*) FROM migration_history;", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }
}
