use rusqlite::Connection;
use std::path::{Path, PathBuf};

use super::schema;
use crate::config::{METADATA_DIR_NAME, WORKSPACE_DB_FILENAME};

/// Workspace-local database path: `<workspace_root>/.outliner/store.db`.
pub fn db_path_for_workspace(workspace_root: &Path) -> PathBuf {
    workspace_root
        .join(METADATA_DIR_NAME)
        .join(WORKSPACE_DB_FILENAME)
}

/// Open (creating if needed) the database at `db_path` and run schema
/// migrations.
pub fn open(db_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.execute_batch("PRAGMA journal_mode = WAL")?;
    schema::init_schema(&conn)?;

    Ok(conn)
}

/// Open an in-memory database with the schema applied. Used by tests.
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    schema::init_schema(&conn)?;
    Ok(conn)
}
