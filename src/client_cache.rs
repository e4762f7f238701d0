//! Client-side view over one open page: an in-memory block tree with
//! optimistic local mutation, an LRU of recently-closed pages, and
//! per-block change subscriptions for UI wiring.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::config::DEFAULT_PAGE_CACHE_CAPACITY;
use crate::error::Result;
use crate::models::block::{CreateBlockRequest, UpdateBlockRequest};
use crate::models::{Block, Id, Page};
use crate::store::Store;

/// A change to one block, delivered to subscribers registered via
/// `ClientCache::subscribe_block`.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockChange {
    Updated(Block),
    Removed,
}

#[derive(Clone)]
struct PageView {
    page: Page,
    blocks_by_id: HashMap<Id, Block>,
    children: HashMap<Option<Id>, Vec<Id>>,
}

impl PageView {
    fn load(store: &Store, page_id: &str) -> Result<Self> {
        let page = store.get_page(page_id)?;
        let blocks = store.get_page_blocks(page_id)?;
        Ok(Self::from_blocks(page, blocks))
    }

    fn from_blocks(page: Page, blocks: Vec<Block>) -> Self {
        let mut blocks_by_id = HashMap::new();
        let mut children: HashMap<Option<Id>, Vec<Id>> = HashMap::new();
        for block in blocks {
            children.entry(block.parent_id.clone()).or_default().push(block.id.clone());
            blocks_by_id.insert(block.id.clone(), block);
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| {
                blocks_by_id[a]
                    .order_weight
                    .partial_cmp(&blocks_by_id[b].order_weight)
                    .unwrap()
            });
        }
        Self {
            page,
            blocks_by_id,
            children,
        }
    }

    fn reinsert(&mut self, block: Block) {
        if let Some(old) = self.blocks_by_id.get(&block.id) {
            if old.parent_id != block.parent_id {
                if let Some(siblings) = self.children.get_mut(&old.parent_id) {
                    siblings.retain(|id| id != &block.id);
                }
            }
        }
        let siblings = self.children.entry(block.parent_id.clone()).or_default();
        if !siblings.contains(&block.id) {
            siblings.push(block.id.clone());
        }
        siblings.sort_by(|a, b| {
            let wa = if a == &block.id { block.order_weight } else { self.blocks_by_id[a].order_weight };
            let wb = if b == &block.id { block.order_weight } else { self.blocks_by_id[b].order_weight };
            wa.partial_cmp(&wb).unwrap()
        });
        self.blocks_by_id.insert(block.id.clone(), block);
    }

    fn remove(&mut self, block_id: &str) {
        if let Some(block) = self.blocks_by_id.remove(block_id) {
            if let Some(siblings) = self.children.get_mut(&block.parent_id) {
                siblings.retain(|id| id != block_id);
            }
        }
    }

    fn ordered_blocks(&self) -> Vec<Block> {
        fn walk(view: &PageView, parent: Option<&Id>, out: &mut Vec<Block>) {
            let key = parent.cloned();
            if let Some(children) = view.children.get(&key) {
                for id in children {
                    let block = view.blocks_by_id[id].clone();
                    out.push(block);
                    walk(view, Some(id), out);
                }
            }
        }
        let mut out = Vec::with_capacity(self.blocks_by_id.len());
        walk(self, None, &mut out);
        out
    }
}

/// Client-side cache over one `Store`: the currently open page's block tree,
/// an LRU of recently-closed pages, and local-only selection/focus state.
///
/// Mutations are applied optimistically to the in-memory tree before the
/// underlying `Store` call returns. Simple content edits reconcile by
/// keeping the local value if it still matches what was sent (an echo);
/// structural moves (indent/outdent/move) fall back to a full reload of the
/// current page from the store on failure, since a partial local guess at
/// the correct tree shape is more likely to be wrong than informative.
pub struct ClientCache {
    store: Arc<Store>,
    current: Mutex<Option<PageView>>,
    recent: Mutex<LruCache<Id, PageView>>,
    subscribers: Mutex<HashMap<Id, Vec<Sender<BlockChange>>>>,
    focused_block_id: Mutex<Option<Id>>,
    selected_block_ids: Mutex<Vec<Id>>,
}

impl ClientCache {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_capacity(store, DEFAULT_PAGE_CACHE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<Store>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            store,
            current: Mutex::new(None),
            recent: Mutex::new(LruCache::new(capacity)),
            subscribers: Mutex::new(HashMap::new()),
            focused_block_id: Mutex::new(None),
            selected_block_ids: Mutex::new(Vec::new()),
        }
    }

    /// Make `page_id` the current page. The previously-current page (if any)
    /// moves into the recently-closed LRU. Serves from that LRU when
    /// present rather than re-querying the store.
    pub fn open_page(&self, page_id: &str) -> Result<Page> {
        let mut current = self.current.lock().unwrap();
        if let Some(old) = current.take() {
            let old_id = old.page.id.clone();
            self.recent.lock().unwrap().put(old_id, old);
        }
        drop(current);

        let view = self.recent.lock().unwrap().pop(page_id);
        let view = match view {
            Some(view) => view,
            None => PageView::load(&self.store, page_id)?,
        };
        let page = view.page.clone();
        *self.current.lock().unwrap() = Some(view);
        *self.focused_block_id.lock().unwrap() = None;
        self.selected_block_ids.lock().unwrap().clear();
        Ok(page)
    }

    /// Move the current page (if any) into the recently-closed LRU.
    pub fn close_page(&self) {
        let mut current = self.current.lock().unwrap();
        if let Some(view) = current.take() {
            let id = view.page.id.clone();
            self.recent.lock().unwrap().put(id, view);
        }
    }

    pub fn current_page(&self) -> Option<Page> {
        self.current.lock().unwrap().as_ref().map(|v| v.page.clone())
    }

    /// The current page's blocks in depth-first tree order.
    pub fn blocks(&self) -> Vec<Block> {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .map(|v| v.ordered_blocks())
            .unwrap_or_default()
    }

    pub fn get_block(&self, block_id: &str) -> Option<Block> {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|v| v.blocks_by_id.get(block_id).cloned())
    }

    /// Register for every future change to `block_id` on the current page.
    pub fn subscribe_block(&self, block_id: &str) -> Receiver<BlockChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(block_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub fn focused_block_id(&self) -> Option<Id> {
        self.focused_block_id.lock().unwrap().clone()
    }

    pub fn set_focused_block_id(&self, block_id: Option<Id>) {
        *self.focused_block_id.lock().unwrap() = block_id;
    }

    pub fn selected_block_ids(&self) -> Vec<Id> {
        self.selected_block_ids.lock().unwrap().clone()
    }

    pub fn set_selected_block_ids(&self, ids: Vec<Id>) {
        *self.selected_block_ids.lock().unwrap() = ids;
    }

    fn notify_block(&self, block_id: &str, change: BlockChange) {
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(list) = subs.get_mut(block_id) {
            list.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }

    /// Snapshot the current page view so a failed optimistic mutation can be
    /// rolled back to it.
    fn snapshot(&self) -> Option<PageView> {
        self.current.lock().unwrap().clone()
    }

    fn restore(&self, snapshot: Option<PageView>) {
        *self.current.lock().unwrap() = snapshot;
    }

    /// Create a block under the current page, applying the store's
    /// authoritative result to the local tree immediately (there is no
    /// speculative id to reconcile against; the store assigns it).
    pub fn create_block(&self, page_id: &str, request: CreateBlockRequest) -> Result<Block> {
        let block = self.store.create_block(page_id, request)?;
        if let Some(view) = self.current.lock().unwrap().as_mut() {
            if view.page.id == page_id {
                view.reinsert(block.clone());
            }
        }
        self.notify_block(&block.id, BlockChange::Updated(block.clone()));
        Ok(block)
    }

    /// Optimistically apply a content/kind/collapse edit before the store
    /// call returns, then reconcile: keep the local value if it still
    /// matches what was sent (the common case), otherwise adopt whatever
    /// the store actually persisted.
    pub fn update_block(&self, block_id: &str, request: UpdateBlockRequest) -> Result<Block> {
        let snapshot = self.snapshot();
        let optimistic = self.apply_optimistic_update(block_id, &request);

        match self.store.update_block(block_id, request) {
            Ok(authoritative) => {
                if let Some(view) = self.current.lock().unwrap().as_mut() {
                    if optimistic.as_ref() != Some(&authoritative) {
                        view.reinsert(authoritative.clone());
                    }
                }
                self.notify_block(block_id, BlockChange::Updated(authoritative.clone()));
                Ok(authoritative)
            }
            Err(err) => {
                self.restore(snapshot);
                Err(err)
            }
        }
    }

    fn apply_optimistic_update(&self, block_id: &str, request: &UpdateBlockRequest) -> Option<Block> {
        let mut current = self.current.lock().unwrap();
        let view = current.as_mut()?;
        let existing = view.blocks_by_id.get(block_id)?.clone();
        let mut updated = existing;
        if let Some(content) = &request.content {
            updated.content = content.clone();
        }
        if let Some(is_collapsed) = request.is_collapsed {
            updated.is_collapsed = is_collapsed;
        }
        if let Some(kind) = request.kind {
            updated.kind = kind;
        }
        if request.language.is_some() {
            updated.language = request.language.clone();
        }
        view.reinsert(updated.clone());
        Some(updated)
    }

    /// Delete a block (and its descendants). Rolls back to the pre-mutation
    /// snapshot on failure.
    pub fn delete_block(&self, block_id: &str) -> Result<Vec<Id>> {
        let snapshot = self.snapshot();
        if let Some(view) = self.current.lock().unwrap().as_mut() {
            view.remove(block_id);
        }

        match self.store.delete_block(block_id) {
            Ok(ids) => {
                for id in &ids {
                    self.notify_block(id, BlockChange::Removed);
                }
                Ok(ids)
            }
            Err(err) => {
                self.restore(snapshot);
                Err(err)
            }
        }
    }

    /// Indent, outdent, or arbitrary move. These change tree shape in ways
    /// this cache can't reliably predict (fractional-index rebalancing can
    /// touch siblings it never sent), so on failure it reloads the whole
    /// current page from the store rather than trying to patch the snapshot.
    pub fn indent_block(&self, block_id: &str) -> Result<Block> {
        self.reload_on_failure(block_id, |store| store.indent_block(block_id))
    }

    pub fn outdent_block(&self, block_id: &str) -> Result<Block> {
        self.reload_on_failure(block_id, |store| store.outdent_block(block_id))
    }

    pub fn move_block(&self, block_id: &str, new_parent_id: Option<&str>, after_block_id: Option<&str>) -> Result<Block> {
        self.reload_on_failure(block_id, |store| store.move_block(block_id, new_parent_id, after_block_id))
    }

    fn reload_on_failure(
        &self,
        block_id: &str,
        op: impl FnOnce(&Store) -> Result<Block>,
    ) -> Result<Block> {
        match op(&self.store) {
            Ok(block) => {
                let page_id = block.page_id.clone();
                if let Ok(view) = PageView::load(&self.store, &page_id) {
                    let is_current = self
                        .current
                        .lock()
                        .unwrap()
                        .as_ref()
                        .map(|v| v.page.id == page_id)
                        .unwrap_or(false);
                    if is_current {
                        *self.current.lock().unwrap() = Some(view);
                    }
                }
                self.notify_block(block_id, BlockChange::Updated(block.clone()));
                Ok(block)
            }
            Err(err) => {
                if let Some(view) = self.current.lock().unwrap().clone() {
                    if let Ok(fresh) = PageView::load(&self.store, &view.page.id) {
                        *self.current.lock().unwrap() = Some(fresh);
                    }
                }
                Err(err)
            }
        }
    }
}
