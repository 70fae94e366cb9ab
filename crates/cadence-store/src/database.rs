//! SQLite backing for the key-value store. Opening a [`Database`] always
//! migrates the schema first.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open `cadence.db` in the per-user data directory:
    /// - Linux:   `~/.local/share/cadence/cadence.db`
    /// - macOS:   `~/Library/Application Support/app.cadence.cadence/cadence.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\cadence\cadence\data\cadence.db`
    pub fn new() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    /// Path of the default application database, creating its directory.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("app", "cadence", "cadence").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("cadence.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;

        // Committed queue writes must survive power loss.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// `None` for in-memory connections.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("cadence.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_durability_pragmas() {
        let (_dir, db) = open_temp();
        let journal: String = db
            .conn()
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        let sync: i64 = db
            .conn()
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();

        assert_eq!(journal.to_lowercase(), "wal");
        // 2 = FULL
        assert_eq!(sync, 2);
        assert!(db.path().is_some());
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let (dir, db) = open_temp();
        drop(db);

        let db = Database::open_at(&dir.path().join("cadence.db")).unwrap();
        let tables: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'kv_store'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }
}
