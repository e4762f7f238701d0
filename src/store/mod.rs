//! The authoritative persistent data layer: pages, blocks, tree invariants,
//! and the fractional-index bookkeeping that keeps sibling order dense.

mod blocks;
mod pages;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::db::connection;
use crate::error::{EntityKind, OutlinerError, Result};
use crate::models::block::Block;
use crate::models::page::Page;
use crate::models::Id;

/// Describes the entities touched by a single Store operation, delivered to
/// every live subscriber registered via `Store::subscribe`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotification {
    PageCreated(Page),
    PageUpdated(Page),
    PageDeleted { page_id: Id },
    BlockCreated(Block),
    BlockUpdated(Block),
    BlockDeleted { block_ids: Vec<Id> },
}

/// The authoritative page/block store for one workspace database.
///
/// All operations serialize through one internal `Mutex<Connection>` and run
/// as a single `rusqlite` transaction each, so callers on multiple threads
/// never interleave partial writes.
pub struct Store {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Sender<ChangeNotification>>>,
    /// The workspace root directory, used to place/rename/remove the `.md`
    /// files a page's `file_path` names. `None` for in-memory stores used
    /// in unit tests that only exercise the database side of things.
    workspace_root: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the workspace database at `db_path`, whose
    /// parent's parent is taken as the workspace root (`<root>/.outliner/store.db`).
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = connection::open(db_path)?;
        let workspace_root = db_path
            .parent()
            .and_then(|metadata_dir| metadata_dir.parent())
            .map(PathBuf::from);
        Ok(Self::from_connection(conn, workspace_root))
    }

    /// Open an in-memory store with the schema applied, with no workspace
    /// root: page file operations update `file_path` in the database only.
    /// Used by unit tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = connection::open_in_memory()?;
        Ok(Self::from_connection(conn, None))
    }

    fn from_connection(conn: Connection, workspace_root: Option<PathBuf>) -> Self {
        Store {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
            workspace_root,
        }
    }

    fn absolute_path(&self, relative: &str) -> Option<PathBuf> {
        self.workspace_root.as_ref().map(|root| root.join(relative))
    }

    /// The workspace root directory this store's pages are relative to, if
    /// any (`None` for an in-memory store with no backing directory).
    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    /// Register for every future `ChangeNotification`. A dropped receiver is
    /// pruned lazily the next time a notification is broadcast.
    pub fn subscribe(&self) -> Receiver<ChangeNotification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Run the startup FTS consistency check, rebuilding the index if the
    /// row counts disagree with `blocks`. Safe to call on every open.
    pub fn verify_fts(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        crate::fts::verify_and_repair(&conn)
    }

    /// Full-text search across block content and page titles.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<crate::fts::SearchHit>> {
        let conn = self.conn.lock().unwrap();
        crate::fts::search(&conn, query, limit)
    }

    fn notify(&self, notification: ChangeNotification) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }
}

/// Replace characters that can't appear in a filesystem path component.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Collect `block_id` and every transitive descendant, root-first, via a
/// recursive CTE. Used by `delete_block` before the cascading `DELETE`.
fn collect_descendant_block_ids(conn: &Connection, block_id: &str) -> Result<Vec<Id>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE descendants(id) AS (
            SELECT id FROM blocks WHERE id = ?1
            UNION ALL
            SELECT b.id FROM blocks b JOIN descendants d ON b.parent_id = d.id
        )
        SELECT id FROM descendants",
    )?;
    let ids = stmt
        .query_map([block_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Whether `candidate_ancestor` is `block_id` itself or one of its
/// ancestors, walking up via `parent_id`. Used for block-move cycle checks.
fn is_self_or_ancestor_of(conn: &Connection, candidate_ancestor: &str, block_id: &str) -> Result<bool> {
    let mut current = Some(block_id.to_string());
    while let Some(id) = current {
        if id == candidate_ancestor {
            return Ok(true);
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM blocks WHERE id = ?1",
                [&id],
                |row| row.get::<_, Option<String>>(0),
            )
            .ok()
            .flatten();
    }
    Ok(false)
}

/// Same cycle check for pages.
fn is_self_or_ancestor_of_page(conn: &Connection, candidate_ancestor: &str, page_id: &str) -> Result<bool> {
    let mut current = Some(page_id.to_string());
    while let Some(id) = current {
        if id == candidate_ancestor {
            return Ok(true);
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM pages WHERE id = ?1",
                [&id],
                |row| row.get::<_, Option<String>>(0),
            )
            .ok()
            .flatten();
    }
    Ok(false)
}

fn fetch_page(conn: &Connection, page_id: &str) -> Result<Page> {
    conn.query_row(
        "SELECT id, title, parent_id, is_directory, file_path, created_at, updated_at
         FROM pages WHERE id = ?1",
        [page_id],
        row_to_page,
    )
    .optional()?
    .ok_or_else(|| OutlinerError::not_found(EntityKind::Page, page_id))
}

fn fetch_block(conn: &Connection, block_id: &str) -> Result<Block> {
    conn.query_row(
        "SELECT id, page_id, parent_id, content, order_weight, is_collapsed, kind, language, created_at, updated_at
         FROM blocks WHERE id = ?1",
        [block_id],
        row_to_block,
    )
    .optional()?
    .ok_or_else(|| OutlinerError::not_found(EntityKind::Block, block_id))
}

fn row_to_block(row: &rusqlite::Row) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get("id")?,
        page_id: row.get("page_id")?,
        parent_id: row.get("parent_id")?,
        content: row.get("content")?,
        order_weight: row.get("order_weight")?,
        is_collapsed: row.get::<_, i64>("is_collapsed")? != 0,
        kind: crate::models::block::BlockKind::parse(&row.get::<_, String>("kind")?),
        language: row.get("language")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_page(row: &rusqlite::Row) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get("id")?,
        title: row.get("title")?,
        parent_id: row.get("parent_id")?,
        is_directory: row.get::<_, i64>("is_directory")? != 0,
        file_path: row.get("file_path")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

