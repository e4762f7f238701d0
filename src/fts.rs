//! Full-text search over block content and page titles, backed by SQLite's
//! FTS5 virtual table declared in `db::schema`.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::block::Id;

/// One hit from `search`. `block_id` is `None` for a page-title hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub block_id: Option<Id>,
    pub page_id: Id,
    pub page_title: String,
    pub result_type: ResultType,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Page,
    Block,
}

/// Index (or re-index) one block's content. Called by `Store` inside the
/// same transaction as the block mutation that produced `content`.
pub fn index_block(conn: &Connection, block_id: &str, page_id: &str, content: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO blocks_fts (block_id, page_id, content) VALUES (?1, ?2, ?3)",
        params![block_id, page_id, content],
    )?;
    Ok(())
}

/// Remove a block from the index.
pub fn deindex_block(conn: &Connection, block_id: &str) -> Result<()> {
    conn.execute("DELETE FROM blocks_fts WHERE block_id = ?1", params![block_id])?;
    Ok(())
}

/// Remove every indexed block belonging to a page (used by `delete_page`).
pub fn deindex_page(conn: &Connection, page_id: &str) -> Result<()> {
    conn.execute("DELETE FROM blocks_fts WHERE page_id = ?1", params![page_id])?;
    Ok(())
}

/// Rebuild the whole index from the `blocks` table. Used on startup when
/// the index's row count disagrees with the blocks table, or after an
/// external re-import.
pub fn rebuild(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM blocks_fts", [])?;

    let mut stmt = conn.prepare("SELECT id, page_id, content FROM blocks")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut count = 0;
    for row in rows {
        let (block_id, page_id, content) = row?;
        index_block(conn, &block_id, &page_id, &content)?;
        count += 1;
    }
    Ok(count)
}

/// Verify the index agrees with the blocks table row count; rebuild it if
/// not. Returns `true` if a rebuild happened.
pub fn verify_and_repair(conn: &Connection) -> Result<bool> {
    let indexed: i64 = conn.query_row("SELECT COUNT(*) FROM blocks_fts", [], |r| r.get(0))?;
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |r| r.get(0))?;

    if indexed != total {
        rebuild(conn)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Build a safe FTS5 `MATCH` query string from free-form user input:
/// quoted phrases are preserved verbatim, bare tokens are individually
/// quoted so FTS5 query-syntax characters (`-`, `^`, `*`, `:`) in the
/// input can't be misread as operators. Tokens are implicitly AND'd by
/// FTS5 when separated by whitespace.
pub fn build_match_query(raw: &str) -> String {
    let mut out = Vec::new();
    let mut chars = raw.chars().peekable();
    let mut current = String::new();

    let flush = |current: &mut String, out: &mut Vec<String>| {
        if !current.is_empty() {
            out.push(format!("\"{}\"", current.replace('"', "\"\"")));
            current.clear();
        }
    };

    while let Some(c) = chars.next() {
        if c == '"' {
            flush(&mut current, &mut out);
            let mut phrase = String::new();
            for pc in chars.by_ref() {
                if pc == '"' {
                    break;
                }
                phrase.push(pc);
            }
            if !phrase.is_empty() {
                out.push(format!("\"{}\"", phrase.replace('"', "\"\"")));
            }
        } else if c.is_whitespace() {
            flush(&mut current, &mut out);
        } else {
            current.push(c);
        }
    }
    flush(&mut current, &mut out);

    out.join(" ")
}

/// Search block content and page titles, returning merged, ranked hits.
///
/// Block hits are ranked by FTS5 `rank` (lower is better), then by most
/// recent `updated_at`. Page-title hits use a case-insensitive substring
/// match and are surfaced ahead of block hits, since a title match on the
/// whole page is rarely less relevant than a body match within it.
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();

    let pattern = format!("%{}%", query);
    let mut stmt = conn.prepare(
        "SELECT id, title FROM pages WHERE title LIKE ?1 COLLATE NOCASE ORDER BY title COLLATE NOCASE",
    )?;
    let page_rows = stmt.query_map(params![pattern], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in page_rows {
        let (id, title) = row?;
        hits.push(SearchHit {
            block_id: None,
            page_id: id,
            page_title: title.clone(),
            result_type: ResultType::Page,
            snippet: highlight(&title, query),
        });
    }

    let match_query = build_match_query(query);
    if !match_query.is_empty() {
        let mut stmt = conn.prepare(
            "SELECT b.id, b.page_id, b.content, p.title
             FROM blocks_fts fts
             JOIN blocks b ON fts.block_id = b.id
             JOIN pages p ON b.page_id = p.id
             WHERE blocks_fts MATCH ?1
             ORDER BY rank, b.updated_at DESC",
        )?;
        let block_rows = stmt.query_map(params![match_query], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in block_rows {
            let (block_id, page_id, content, page_title) = row?;
            hits.push(SearchHit {
                block_id: Some(block_id),
                page_id,
                page_title,
                result_type: ResultType::Block,
                snippet: snippet_around(&content, query),
            });
        }
    }

    hits.truncate(limit);
    Ok(hits)
}

/// Wrap the first case-insensitive match of `query` in `text` with `**…**`.
fn highlight(text: &str, query: &str) -> String {
    let lower_text = text.to_lowercase();
    let lower_query = query.to_lowercase();
    match lower_text.find(&lower_query) {
        Some(pos) => format!(
            "{}**{}**{}",
            &text[..pos],
            &text[pos..pos + query.len()],
            &text[pos + query.len()..]
        ),
        None => text.to_string(),
    }
}

/// Like `highlight`, but truncates to a window around the match with `...`
/// ellipses, for long block content.
fn snippet_around(text: &str, query: &str) -> String {
    const WINDOW: usize = 100;
    let lower_text = text.to_lowercase();
    let lower_query = query.to_lowercase();

    let Some(pos) = lower_text.find(&lower_query) else {
        return if text.len() > WINDOW {
            format!("{}...", &text[..WINDOW])
        } else {
            text.to_string()
        };
    };

    let start = pos.saturating_sub(WINDOW / 2);
    let end = std::cmp::min(text.len(), pos + query.len() + WINDOW / 2);

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    let rel = pos - start;
    snippet.push_str(&highlight(&text[start..end], &text[pos..pos + query.len()].to_string()));
    let _ = rel;
    if end < text.len() {
        snippet.push_str("...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::open_in_memory;

    fn seed_page(conn: &Connection, id: &str, title: &str) {
        conn.execute(
            "INSERT INTO pages (id, title, parent_id, file_path, is_directory, created_at, updated_at)
             VALUES (?1, ?2, NULL, NULL, 0, 'now', 'now')",
            params![id, title],
        )
        .unwrap();
    }

    fn seed_block(conn: &Connection, id: &str, page_id: &str, content: &str) {
        conn.execute(
            "INSERT INTO blocks (id, page_id, parent_id, content, order_weight, kind, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, 1.0, 'bullet', 'now', 'now')",
            params![id, page_id, content],
        )
        .unwrap();
        index_block(conn, id, page_id, content).unwrap();
    }

    #[test]
    fn index_and_search_round_trip() {
        let conn = open_in_memory().unwrap();
        seed_page(&conn, "p1", "Test Page");
        seed_block(&conn, "b1", "p1", "hello world");

        let hits = search(&conn, "hello", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].block_id.as_deref(), Some("b1"));
        assert!(hits[0].snippet.contains("**hello**"));
    }

    #[test]
    fn deindex_removes_hit() {
        let conn = open_in_memory().unwrap();
        seed_page(&conn, "p1", "Test Page");
        seed_block(&conn, "b1", "p1", "hello world");
        deindex_block(&conn, "b1").unwrap();

        let hits = search(&conn, "hello", 10).unwrap();
        assert!(hits.iter().all(|h| h.block_id.as_deref() != Some("b1")));
    }

    #[test]
    fn search_merges_page_title_hits() {
        let conn = open_in_memory().unwrap();
        seed_page(&conn, "p1", "alpha notes");
        seed_block(&conn, "b1", "p1", "irrelevant content");

        let hits = search(&conn, "alpha", 10).unwrap();
        assert!(hits.iter().any(|h| h.result_type == ResultType::Page));
    }

    #[test]
    fn verify_and_repair_rebuilds_when_out_of_sync() {
        let conn = open_in_memory().unwrap();
        seed_page(&conn, "p1", "Test Page");
        conn.execute(
            "INSERT INTO blocks (id, page_id, parent_id, content, order_weight, kind, created_at, updated_at)
             VALUES ('b1', 'p1', NULL, 'unindexed content', 1.0, 'bullet', 'now', 'now')",
            [],
        )
        .unwrap();

        let repaired = verify_and_repair(&conn).unwrap();
        assert!(repaired);

        let hits = search(&conn, "unindexed", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn build_match_query_quotes_bare_tokens_and_preserves_phrases() {
        assert_eq!(build_match_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(build_match_query("\"hello world\""), "\"hello world\"");
        assert_eq!(build_match_query("foo-bar"), "\"foo-bar\"");
    }
}
