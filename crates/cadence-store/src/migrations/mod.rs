//! Schema migrations, tracked with the `user_version` pragma.
//!
//! Each step runs inside its own transaction together with the version bump,
//! so a crash mid-migration leaves the schema at the previous version.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type MigrationFn = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered migration steps. Version `n` is `MIGRATIONS[n - 1]`.
const MIGRATIONS: &[(&str, MigrationFn)] = &[("v001_initial", v001_initial::up)];

/// Bring the schema up to the latest version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = MIGRATIONS.len() as u32;

    if current > target {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than supported v{target}"
        )));
    }
    if current == target {
        tracing::debug!(version = current, "schema up to date");
        return Ok(());
    }

    for (version, (name, up)) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = version as u32 + 1;
        tracing::info!(migration = name, version, "applying migration");

        let tx = conn.unchecked_transaction()?;
        up(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(())
}
