//! Schema migrations.
//!
//! SQL files are embedded in the binary and applied in ascending order of
//! their integer filename prefix, each inside its own transaction. Applied
//! versions are recorded in `schema_migrations` so a re-run is a no-op.

use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};

/// Embedded migration files, named `<version>_<description>.sql`.
const MIGRATION_FILES: &[(&str, &str)] = &[
    ("001_credentials.sql", include_str!("sql/001_credentials.sql")),
    ("002_inventory.sql", include_str!("sql/002_inventory.sql")),
];

/// Apply all pending migrations.
pub fn run(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let applied = applied_versions(conn)?;

    let mut pending: Vec<(i64, &str, &str)> = Vec::new();
    for (name, sql) in MIGRATION_FILES {
        match extract_version(name) {
            Some(version) => pending.push((version, name, sql)),
            None => tracing::warn!(file = name, "skipping invalid migration file"),
        }
    }
    pending.sort_by_key(|(version, _, _)| *version);

    for (version, name, sql) in pending {
        if applied.contains(&version) {
            tracing::debug!(file = name, "migration already applied, skipping");
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            params![version],
        )?;
        tx.commit()?;
        tracing::info!(file = name, "applied migration");
    }

    Ok(())
}

fn applied_versions(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect::<std::result::Result<Vec<i64>, _>>()
        .map_err(StoreError::Sqlite)
}

fn extract_version(name: &str) -> Option<i64> {
    name.split('_').next()?.parse().ok()
}
