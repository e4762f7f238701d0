use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{fetch_page, is_self_or_ancestor_of_page, row_to_page, sanitize_filename, ChangeNotification, Store};
use crate::error::{OutlinerError, Result};
use crate::models::page::Page;
use crate::models::Id;
use crate::wiki_links;

impl Store {
    /// A single page by id.
    pub fn get_page(&self, page_id: &str) -> Result<Page> {
        let conn = self.conn.lock().unwrap();
        fetch_page(&conn, page_id)
    }

    /// Full page tree metadata, ordered by `(parent_id, title COLLATE NOCASE)`.
    pub fn list_pages(&self) -> Result<Vec<Page>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, parent_id, is_directory, file_path, created_at, updated_at
             FROM pages ORDER BY parent_id, title COLLATE NOCASE",
        )?;
        let pages = stmt
            .query_map([], row_to_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    /// Create a page under `parent_id` (`None` for the workspace root).
    /// `parent_id`, when given, must name a directory page.
    pub fn create_page(&self, title: &str, parent_id: Option<&str>, is_directory: bool) -> Result<Page> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let dir_prefix = match parent_id {
            None => String::new(),
            Some(pid) => {
                let parent = fetch_page(&tx, pid)?;
                if !parent.is_directory {
                    return Err(OutlinerError::invalid_parent(format!(
                        "page {pid} is not a directory"
                    )));
                }
                parent.file_path.unwrap_or_default()
            }
        };

        let file_path = unique_file_path(&tx, &dir_prefix, title, is_directory, None)?;

        let id = Uuid::new_v4().to_string();
        let now = Store::now();
        tx.execute(
            "INSERT INTO pages (id, title, parent_id, file_path, is_directory, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, title, parent_id, file_path, is_directory as i64, now],
        )?;

        if let Some(abs) = self.absolute_path(&file_path) {
            if let Some(parent_dir) = abs.parent() {
                std::fs::create_dir_all(parent_dir)?;
            }
            if is_directory {
                std::fs::create_dir_all(&abs)?;
            } else {
                std::fs::write(&abs, "")?;
            }
        }

        tx.commit()?;

        let page = fetch_page(&conn, &id)?;
        self.notify(ChangeNotification::PageCreated(page.clone()));
        Ok(page)
    }

    /// Rename a page, renaming its file on disk and rewriting every inbound
    /// `[[old title]]` wiki-link across the workspace (except inside
    /// `code`/`fence` block content, which the scanner never sees).
    pub fn update_page_title(&self, page_id: &str, title: &str) -> Result<Page> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let page = fetch_page(&tx, page_id)?;
        if page.title == title {
            return Ok(page);
        }

        let dir_prefix = match &page.parent_id {
            None => String::new(),
            Some(pid) => fetch_page(&tx, pid)?.file_path.unwrap_or_default(),
        };
        let new_file_path = unique_file_path(&tx, &dir_prefix, title, page.is_directory, Some(page_id))?;
        let now = Store::now();

        tx.execute(
            "UPDATE pages SET title = ?1, file_path = ?2, updated_at = ?3 WHERE id = ?4",
            params![title, new_file_path, now, page_id],
        )?;

        if let (Some(old_path), Some(new_abs)) = (page.file_path.as_ref(), self.absolute_path(&new_file_path)) {
            if let Some(old_abs) = self.absolute_path(old_path) {
                if let Some(parent_dir) = new_abs.parent() {
                    std::fs::create_dir_all(parent_dir)?;
                }
                if old_abs.exists() {
                    std::fs::rename(&old_abs, &new_abs)?;
                }
            }
        }

        rewrite_wiki_links_for_title_change(&tx, &page.title, title)?;

        tx.commit()?;

        let updated = fetch_page(&conn, page_id)?;
        self.notify(ChangeNotification::PageUpdated(updated.clone()));
        Ok(updated)
    }

    /// Move a page under a new parent (or to the workspace root). Forbids
    /// cycles and non-directory new parents; relocates the file on disk.
    pub fn move_page(&self, page_id: &str, new_parent_id: Option<&str>) -> Result<Page> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let page = fetch_page(&tx, page_id)?;

        if let Some(new_parent) = new_parent_id {
            if new_parent == page_id || is_self_or_ancestor_of_page(&tx, page_id, new_parent)? {
                return Err(OutlinerError::CycleDetected {
                    block_id: page_id.to_string(),
                    target_parent_id: new_parent.to_string(),
                });
            }
            let parent = fetch_page(&tx, new_parent)?;
            if !parent.is_directory {
                return Err(OutlinerError::invalid_parent(format!(
                    "page {new_parent} is not a directory"
                )));
            }
        }

        let dir_prefix = match new_parent_id {
            None => String::new(),
            Some(pid) => fetch_page(&tx, pid)?.file_path.unwrap_or_default(),
        };
        let new_file_path = unique_file_path(&tx, &dir_prefix, &page.title, page.is_directory, Some(page_id))?;
        let now = Store::now();

        tx.execute(
            "UPDATE pages SET parent_id = ?1, file_path = ?2, updated_at = ?3 WHERE id = ?4",
            params![new_parent_id, new_file_path, now, page_id],
        )?;

        if let (Some(old_path), Some(new_abs)) = (page.file_path.as_ref(), self.absolute_path(&new_file_path)) {
            if let Some(old_abs) = self.absolute_path(old_path) {
                if let Some(parent_dir) = new_abs.parent() {
                    std::fs::create_dir_all(parent_dir)?;
                }
                if old_abs.exists() {
                    std::fs::rename(&old_abs, &new_abs)?;
                }
            }
        }

        tx.commit()?;

        let updated = fetch_page(&conn, page_id)?;
        self.notify(ChangeNotification::PageUpdated(updated.clone()));
        Ok(updated)
    }

    /// Insert a page row for a file that already exists on disk at
    /// `file_path`, without touching the filesystem. Used by
    /// `Workspace::import`, where the file itself came from the directory
    /// scan and must not be recreated/truncated by the usual create path.
    pub(crate) fn create_page_for_import(&self, title: &str, file_path: &str) -> Result<Page> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Store::now();
        conn.execute(
            "INSERT INTO pages (id, title, parent_id, file_path, is_directory, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, 0, ?4, ?4)",
            params![id, title, file_path, now],
        )?;
        let page = fetch_page(&conn, &id)?;
        self.notify(ChangeNotification::PageCreated(page.clone()));
        Ok(page)
    }

    /// Delete a page. Forbidden while it has child pages. Cascades to its
    /// blocks (and their FTS entries) and removes the file on disk.
    pub fn delete_page(&self, page_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let page = fetch_page(&tx, page_id)?;

        let child_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pages WHERE parent_id = ?1",
            [page_id],
            |row| row.get(0),
        )?;
        if child_count > 0 {
            return Err(OutlinerError::conflict(format!(
                "page {page_id} has child pages; cannot delete"
            )));
        }

        crate::fts::deindex_page(&tx, page_id)?;
        tx.execute("DELETE FROM pages WHERE id = ?1", [page_id])?;

        if let Some(path) = page.file_path.as_ref() {
            if let Some(abs) = self.absolute_path(path) {
                if page.is_directory {
                    let _ = std::fs::remove_dir_all(&abs);
                } else {
                    let _ = std::fs::remove_file(&abs);
                }
            }
        }

        tx.commit()?;

        self.notify(ChangeNotification::PageDeleted {
            page_id: page_id.to_string(),
        });
        Ok(())
    }
}

/// Build a `dir_prefix/sanitized-title[.md]` path that doesn't collide with
/// an existing `pages.file_path`, appending a `" (2)"`-style suffix to the
/// title on collision. `exclude_page_id` lets a rename/move see past the
/// page's own current row.
fn unique_file_path(
    conn: &rusqlite::Connection,
    dir_prefix: &str,
    title: &str,
    is_directory: bool,
    exclude_page_id: Option<&str>,
) -> Result<String> {
    let extension = if is_directory { "" } else { ".md" };
    let mut suffix = 0u32;
    loop {
        let stem = if suffix == 0 {
            sanitize_filename(title)
        } else {
            format!("{} ({})", sanitize_filename(title), suffix + 1)
        };
        let candidate = if dir_prefix.is_empty() {
            format!("{stem}{extension}")
        } else {
            format!("{dir_prefix}/{stem}{extension}")
        };

        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM pages WHERE file_path = ?1 AND id != COALESCE(?2, '')",
                params![candidate, exclude_page_id],
                |row| row.get(0),
            )
            .optional()?;

        if taken.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

/// Rewrite `[[old_title]]` wiki-links in every `bullet` block across the
/// workspace (any page) to `[[new_title]]`, re-indexing changed blocks.
fn rewrite_wiki_links_for_title_change(tx: &rusqlite::Transaction, old_title: &str, new_title: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT id, page_id, content FROM blocks WHERE kind = 'bullet' AND content LIKE ?1",
    )?;
    let like_pattern = format!("%[[{old_title}%");
    let candidates: Vec<(Id, Id, String)> = stmt
        .query_map(params![like_pattern], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    let now = Store::now();
    for (block_id, page_id, content) in candidates {
        let (rewritten, changed) = wiki_links::rewrite_title(&content, old_title, new_title);
        if !changed {
            continue;
        }
        tx.execute(
            "UPDATE blocks SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![rewritten, now, block_id],
        )?;
        crate::fts::index_block(tx, &block_id, &page_id, &rewritten)?;
    }
    Ok(())
}
