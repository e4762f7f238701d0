use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{collect_descendant_block_ids, fetch_block, is_self_or_ancestor_of, row_to_block, ChangeNotification, Store};
use crate::error::{EntityKind, OutlinerError, Result};
use crate::fractional_index;
use crate::models::block::{Block, BlockKind, CreateBlockRequest, InsertPosition, UpdateBlockRequest};
use crate::models::Id;

impl Store {
    /// All blocks for `page_id`, sorted by `(parent_id, order_weight)`. The
    /// caller reconstructs the tree from `parent_id` links.
    pub fn get_page_blocks(&self, page_id: &str) -> Result<Vec<Block>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, page_id, parent_id, content, order_weight, is_collapsed, kind, language, created_at, updated_at
             FROM blocks WHERE page_id = ?1 ORDER BY parent_id, order_weight",
        )?;
        let blocks = stmt
            .query_map([page_id], row_to_block)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    pub fn get_block(&self, block_id: &str) -> Result<Block> {
        let conn = self.conn.lock().unwrap();
        fetch_block(&conn, block_id)
    }

    /// Create a block. `request.parent_id`, if absent, is inferred from
    /// `request.after_block_id`'s own parent; if both are absent the block
    /// is created at page-root.
    pub fn create_block(&self, page_id: &str, request: CreateBlockRequest) -> Result<Block> {
        validate_bullet_content(request.kind, &request.content)?;

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let parent_id = match (&request.parent_id, &request.after_block_id) {
            (Some(pid), _) => Some(pid.clone()),
            (None, Some(after_id)) => fetch_block(&tx, after_id)?.parent_id,
            (None, None) => None,
        };

        let order_weight = compute_insert_weight(
            &tx,
            page_id,
            parent_id.as_deref(),
            request.after_block_id.as_deref(),
            request.position,
        )?;

        let id = Uuid::new_v4().to_string();
        let now = Store::now();
        let language = if request.kind == BlockKind::Code { request.language.clone() } else { None };

        tx.execute(
            "INSERT INTO blocks (id, page_id, parent_id, content, order_weight, is_collapsed, kind, language, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?8)",
            params![id, page_id, parent_id, request.content, order_weight, request.kind.as_str(), language, now],
        )?;
        crate::fts::index_block(&tx, &id, page_id, &request.content)?;

        tx.commit()?;

        let block = fetch_block(&conn, &id)?;
        self.notify(ChangeNotification::BlockCreated(block.clone()));
        Ok(block)
    }

    /// Apply a partial update. `kind` changing away from `Code` clears
    /// `language`; a content change re-indexes the block in the same
    /// transaction.
    pub fn update_block(&self, block_id: &str, request: UpdateBlockRequest) -> Result<Block> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let existing = fetch_block(&tx, block_id)?;
        let new_kind = request.kind.unwrap_or(existing.kind);
        let new_content = request.content.clone().unwrap_or_else(|| existing.content.clone());
        validate_bullet_content(new_kind, &new_content)?;

        let new_language = if new_kind == BlockKind::Code {
            request.language.clone().or(existing.language.clone())
        } else {
            None
        };
        let new_is_collapsed = request.is_collapsed.unwrap_or(existing.is_collapsed);
        let now = Store::now();

        tx.execute(
            "UPDATE blocks SET content = ?1, is_collapsed = ?2, kind = ?3, language = ?4, updated_at = ?5 WHERE id = ?6",
            params![
                new_content,
                new_is_collapsed as i64,
                new_kind.as_str(),
                new_language,
                now,
                block_id
            ],
        )?;

        if request.content.is_some() {
            crate::fts::index_block(&tx, block_id, &existing.page_id, &new_content)?;
        }

        tx.commit()?;

        let block = fetch_block(&conn, block_id)?;
        self.notify(ChangeNotification::BlockUpdated(block.clone()));
        Ok(block)
    }

    /// Delete a block and every transitive descendant; returns every
    /// deleted id (the block first, then descendants root-first).
    pub fn delete_block(&self, block_id: &str) -> Result<Vec<Id>> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        fetch_block(&tx, block_id)?;
        let ids = collect_descendant_block_ids(&tx, block_id)?;

        for id in &ids {
            crate::fts::deindex_block(&tx, id)?;
        }
        tx.execute("DELETE FROM blocks WHERE id = ?1", [block_id])?;

        tx.commit()?;

        self.notify(ChangeNotification::BlockDeleted {
            block_ids: ids.clone(),
        });
        Ok(ids)
    }

    /// Re-parent under the preceding sibling, appended to its children.
    pub fn indent_block(&self, block_id: &str) -> Result<Block> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let block = fetch_block(&tx, block_id)?;
        let previous_sibling: Option<(String, f64)> = tx
            .query_row(
                "SELECT id, order_weight FROM blocks
                 WHERE page_id = ?1 AND parent_id IS ?2 AND order_weight < ?3
                 ORDER BY order_weight DESC LIMIT 1",
                params![block.page_id, block.parent_id, block.order_weight],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((new_parent_id, _)) = previous_sibling else {
            return Err(OutlinerError::NoPreviousSibling {
                block_id: block_id.to_string(),
            });
        };

        let order_weight = compute_insert_weight(&tx, &block.page_id, Some(&new_parent_id), None, InsertPosition::End)?;
        let now = Store::now();
        tx.execute(
            "UPDATE blocks SET parent_id = ?1, order_weight = ?2, updated_at = ?3 WHERE id = ?4",
            params![new_parent_id, order_weight, now, block_id],
        )?;

        tx.commit()?;

        let updated = fetch_block(&conn, block_id)?;
        self.notify(ChangeNotification::BlockUpdated(updated.clone()));
        Ok(updated)
    }

    /// Re-parent to the grandparent, placed immediately after the current
    /// parent among its siblings.
    pub fn outdent_block(&self, block_id: &str) -> Result<Block> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let block = fetch_block(&tx, block_id)?;
        let Some(parent_id) = block.parent_id.clone() else {
            return Err(OutlinerError::AlreadyAtRoot {
                block_id: block_id.to_string(),
            });
        };
        let parent = fetch_block(&tx, &parent_id)?;

        let order_weight = compute_insert_weight(
            &tx,
            &block.page_id,
            parent.parent_id.as_deref(),
            Some(&parent_id),
            InsertPosition::End,
        )?;
        let now = Store::now();
        tx.execute(
            "UPDATE blocks SET parent_id = ?1, order_weight = ?2, updated_at = ?3 WHERE id = ?4",
            params![parent.parent_id, order_weight, now, block_id],
        )?;

        tx.commit()?;

        let updated = fetch_block(&conn, block_id)?;
        self.notify(ChangeNotification::BlockUpdated(updated.clone()));
        Ok(updated)
    }

    /// Replace every block on `page_id` with the result of parsing `content`
    /// via `parser` (`markdown::parse`), in one transaction. Used by
    /// workspace import/reimport; returns the number of blocks inserted.
    pub fn replace_blocks_from_markdown(
        &self,
        page_id: &str,
        content: &str,
        parser: fn(&str, &str, &str) -> Vec<Block>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let existing_ids: Vec<Id> = {
            let mut stmt = tx.prepare("SELECT id FROM blocks WHERE page_id = ?1")?;
            stmt.query_map([page_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for id in &existing_ids {
            crate::fts::deindex_block(&tx, id)?;
        }
        tx.execute("DELETE FROM blocks WHERE page_id = ?1", [page_id])?;

        let now = Store::now();
        let blocks = parser(content, page_id, &now);
        for block in &blocks {
            tx.execute(
                "INSERT INTO blocks (id, page_id, parent_id, content, order_weight, is_collapsed, kind, language, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    block.id,
                    page_id,
                    block.parent_id,
                    block.content,
                    block.order_weight,
                    block.is_collapsed as i64,
                    block.kind.as_str(),
                    block.language,
                    now
                ],
            )?;
            crate::fts::index_block(&tx, &block.id, page_id, &block.content)?;
        }

        tx.commit()?;

        let count = blocks.len();
        for block in blocks {
            self.notify(ChangeNotification::BlockCreated(block));
        }
        Ok(count)
    }

    /// Arbitrary reposition. Forbids moving a block under itself or one of
    /// its own descendants.
    pub fn move_block(&self, block_id: &str, new_parent_id: Option<&str>, after_block_id: Option<&str>) -> Result<Block> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let block = fetch_block(&tx, block_id)?;

        if let Some(target) = new_parent_id {
            if target == block_id || is_self_or_ancestor_of(&tx, block_id, target)? {
                return Err(OutlinerError::CycleDetected {
                    block_id: block_id.to_string(),
                    target_parent_id: target.to_string(),
                });
            }
            fetch_block(&tx, target).map_err(|_| OutlinerError::not_found(EntityKind::Block, target))?;
        }

        let order_weight = compute_insert_weight(&tx, &block.page_id, new_parent_id, after_block_id, InsertPosition::End)?;
        let now = Store::now();
        tx.execute(
            "UPDATE blocks SET parent_id = ?1, order_weight = ?2, updated_at = ?3 WHERE id = ?4",
            params![new_parent_id, order_weight, now, block_id],
        )?;

        tx.commit()?;

        let updated = fetch_block(&conn, block_id)?;
        self.notify(ChangeNotification::BlockUpdated(updated.clone()));
        Ok(updated)
    }
}

fn validate_bullet_content(kind: BlockKind, content: &str) -> Result<()> {
    if kind == BlockKind::Bullet && content.contains('\n') {
        return Err(OutlinerError::conflict("bullet content must not contain newlines"));
    }
    Ok(())
}

/// Compute the `order_weight` for inserting a new or relocated block into
/// `(page_id, parent_id)`, anchored after `after_block_id` when given,
/// otherwise at `position` (start/end of the sibling group). Rebalances the
/// sibling group first if the insertion point has exhausted precision.
fn compute_insert_weight(
    tx: &rusqlite::Transaction,
    page_id: &str,
    parent_id: Option<&str>,
    after_block_id: Option<&str>,
    position: InsertPosition,
) -> Result<f64> {
    let (before, after) = insertion_bounds(tx, page_id, parent_id, after_block_id, position)?;

    let exhausted = match (before, after) {
        (Some(b), Some(a)) => fractional_index::needs_rebalancing(b, a),
        _ => fractional_index::needs_rebalancing_one_sided(before, after),
    };

    if exhausted {
        rebalance_sibling_group(tx, page_id, parent_id)?;
        let (before, after) = insertion_bounds(tx, page_id, parent_id, after_block_id, position)?;
        return Ok(fractional_index::calculate_middle(before, after));
    }

    Ok(fractional_index::calculate_middle(before, after))
}

/// The `(before, after)` order-weight bounds the new block must land
/// strictly between, given the caller's anchor.
fn insertion_bounds(
    tx: &rusqlite::Transaction,
    page_id: &str,
    parent_id: Option<&str>,
    after_block_id: Option<&str>,
    position: InsertPosition,
) -> Result<(Option<f64>, Option<f64>)> {
    if let Some(after_id) = after_block_id {
        let after_block = fetch_block(tx, after_id)?;
        let before = Some(after_block.order_weight);
        let next: Option<f64> = tx
            .query_row(
                "SELECT order_weight FROM blocks WHERE page_id = ?1 AND parent_id IS ?2 AND order_weight > ?3
                 ORDER BY order_weight ASC LIMIT 1",
                params![page_id, parent_id, after_block.order_weight],
                |row| row.get(0),
            )
            .optional()?;
        return Ok((before, next));
    }

    match position {
        InsertPosition::Start => {
            let first: Option<f64> = tx
                .query_row(
                    "SELECT order_weight FROM blocks WHERE page_id = ?1 AND parent_id IS ?2
                     ORDER BY order_weight ASC LIMIT 1",
                    params![page_id, parent_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok((None, first))
        }
        InsertPosition::End => {
            let last: Option<f64> = tx
                .query_row(
                    "SELECT order_weight FROM blocks WHERE page_id = ?1 AND parent_id IS ?2
                     ORDER BY order_weight DESC LIMIT 1",
                    params![page_id, parent_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok((last, None))
        }
    }
}

/// Reassign `1.0, 2.0, …` across every sibling in `(page_id, parent_id)`,
/// preserving their current relative order.
fn rebalance_sibling_group(tx: &rusqlite::Transaction, page_id: &str, parent_id: Option<&str>) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT id FROM blocks WHERE page_id = ?1 AND parent_id IS ?2 ORDER BY order_weight ASC",
    )?;
    let ids: Vec<String> = stmt
        .query_map(params![page_id, parent_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    let weights = fractional_index::rebalance_order_weights(ids.len());
    for (id, weight) in ids.iter().zip(weights.iter()) {
        tx.execute(
            "UPDATE blocks SET order_weight = ?1 WHERE id = ?2",
            params![weight, id],
        )?;
    }
    Ok(())
}
