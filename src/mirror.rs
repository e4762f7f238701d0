//! Background markdown-mirror worker: debounced `Store` → `.md` file sync.
//!
//! An `mpsc` channel drives a dedicated OS thread that wakes on
//! `recv_timeout`, coalescing bursts of page changes into one write per
//! page, with per-page retry under capped exponential backoff on failure.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::MIRROR_RETRY_BACKOFF_CAP;
use crate::error::Result;
use crate::markdown;
use crate::models::Id;
use crate::store::Store;

/// Give up retrying a page after this many consecutive failed attempts
/// (the backoff schedule reaches the cap well before this).
const MAX_RETRY_ATTEMPTS: u32 = 6;

enum MirrorCommand {
    Enqueue(Id),
    Shutdown,
}

/// Debounced `Store` → markdown file mirror for one workspace.
pub struct MirrorService {
    sender: Sender<MirrorCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorService {
    /// Spawn the worker thread. `workspace_root` is the directory pages'
    /// `file_path`s are relative to.
    pub fn new(store: Arc<Store>, workspace_root: PathBuf, debounce: Duration) -> Self {
        Self::spawn(store, workspace_root, debounce, None)
    }

    /// Like `new`, but increments `write_count` once per page successfully
    /// flushed to disk. Used by tests to verify that a burst of enqueues
    /// coalesces into a bounded number of writes rather than one per
    /// enqueue.
    #[cfg(test)]
    fn new_with_write_counter(store: Arc<Store>, workspace_root: PathBuf, debounce: Duration) -> (Self, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let service = Self::spawn(store, workspace_root, debounce, Some(counter.clone()));
        (service, counter)
    }

    fn spawn(store: Arc<Store>, workspace_root: PathBuf, debounce: Duration, write_count: Option<Arc<AtomicUsize>>) -> Self {
        let (sender, receiver) = mpsc::channel::<MirrorCommand>();

        let handle = thread::spawn(move || {
            let mut pending: HashSet<Id> = HashSet::new();
            let mut attempts: HashMap<Id, u32> = HashMap::new();
            let mut retry_after: HashMap<Id, Instant> = HashMap::new();
            // Ticks fire on a fixed schedule, independent of how often new
            // enqueues arrive, so a continuous stream of enqueues still
            // gets flushed periodically instead of starving the debounce.
            let mut next_tick = Instant::now() + debounce;

            loop {
                let timeout = next_tick.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(timeout) {
                    Ok(MirrorCommand::Enqueue(page_id)) => {
                        pending.insert(page_id);
                    }
                    Ok(MirrorCommand::Shutdown) => {
                        for page_id in pending.drain().collect::<Vec<_>>() {
                            match mirror_page(&store, &workspace_root, &page_id) {
                                Ok(()) => {
                                    if let Some(counter) = &write_count {
                                        counter.fetch_add(1, Ordering::SeqCst);
                                    }
                                }
                                Err(err) => log::warn!("failed to flush page {page_id} on shutdown: {err}"),
                            }
                        }
                        break;
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let now = Instant::now();
                        let due: Vec<Id> = pending
                            .iter()
                            .filter(|id| retry_after.get(*id).map_or(true, |t| now >= *t))
                            .cloned()
                            .collect();

                        for page_id in due {
                            match mirror_page(&store, &workspace_root, &page_id) {
                                Ok(()) => {
                                    pending.remove(&page_id);
                                    attempts.remove(&page_id);
                                    retry_after.remove(&page_id);
                                    if let Some(counter) = &write_count {
                                        counter.fetch_add(1, Ordering::SeqCst);
                                    }
                                }
                                Err(err) => {
                                    let attempt = attempts.entry(page_id.clone()).or_insert(0);
                                    if *attempt >= MAX_RETRY_ATTEMPTS {
                                        log::warn!(
                                            "giving up mirroring page {page_id} after repeated failures: {err}"
                                        );
                                        pending.remove(&page_id);
                                        attempts.remove(&page_id);
                                        retry_after.remove(&page_id);
                                        continue;
                                    }
                                    let delay = backoff_delay(*attempt);
                                    log::warn!("failed to mirror page {page_id}, retrying in {delay:?}: {err}");
                                    retry_after.insert(page_id.clone(), now + delay);
                                    *attempt += 1;
                                }
                            }
                        }
                        next_tick = Instant::now() + debounce;
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Mark `page_id` for mirroring. Coalesces with any pending enqueue for
    /// the same page already waiting out the debounce window.
    pub fn enqueue(&self, page_id: impl Into<Id>) {
        let _ = self.sender.send(MirrorCommand::Enqueue(page_id.into()));
    }

    /// Flush every pending page synchronously, then stop the worker thread.
    pub fn shutdown(&self) {
        let _ = self.sender.send(MirrorCommand::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MIRROR_RETRY_BACKOFF_CAP)
}

fn mirror_page(store: &Store, workspace_root: &std::path::Path, page_id: &str) -> Result<()> {
    let page = store.get_page(page_id)?;
    let Some(file_path) = page.file_path else {
        return Ok(());
    };
    let blocks = store.get_page_blocks(page_id)?;
    let markdown = markdown::serialize(&blocks);

    let abs = workspace_root.join(&file_path);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(abs, markdown)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::block::{BlockKind, CreateBlockRequest, InsertPosition};
    use std::time::Duration;
    use tempfile::tempdir;

    fn default_request(content: &str) -> CreateBlockRequest {
        CreateBlockRequest {
            parent_id: None,
            after_block_id: None,
            position: InsertPosition::End,
            content: content.to_string(),
            kind: BlockKind::Bullet,
            language: None,
        }
    }

    #[test]
    fn enqueue_writes_file_after_debounce() {
        let dir = tempdir().unwrap();
        let db_path = crate::db::connection::db_path_for_workspace(dir.path());
        let store = Arc::new(Store::open(&db_path).unwrap());
        let page = store.create_page("Notes", None, false).unwrap();
        store.create_block(&page.id, default_request("hello")).unwrap();

        let mirror = MirrorService::new(store.clone(), dir.path().to_path_buf(), Duration::from_millis(20));
        mirror.enqueue(page.id.clone());
        mirror.shutdown();

        let written = std::fs::read_to_string(dir.path().join(page.file_path.unwrap())).unwrap();
        assert_eq!(written, "- hello\n");
    }

    #[test]
    fn rapid_updates_coalesce_into_a_bounded_number_of_writes() {
        let dir = tempdir().unwrap();
        let db_path = crate::db::connection::db_path_for_workspace(dir.path());
        let store = Arc::new(Store::open(&db_path).unwrap());
        let page = store.create_page("Notes", None, false).unwrap();
        let block = store.create_block(&page.id, default_request("v0")).unwrap();

        let (mirror, write_count) =
            MirrorService::new_with_write_counter(store.clone(), dir.path().to_path_buf(), Duration::from_millis(50));

        for i in 0..20 {
            store
                .update_block(
                    &block.id,
                    crate::models::block::UpdateBlockRequest {
                        content: Some(format!("v{i}")),
                        ..Default::default()
                    },
                )
                .unwrap();
            mirror.enqueue(page.id.clone());
            std::thread::sleep(Duration::from_millis(10));
        }

        mirror.shutdown();

        let count = write_count.load(Ordering::SeqCst);
        assert!(count >= 1, "expected at least the final flush, got {count}");
        assert!(count < 20, "updates should have coalesced, but wrote once per enqueue: {count}");

        let written = std::fs::read_to_string(dir.path().join(page.file_path.unwrap())).unwrap();
        assert_eq!(written, "- v19\n");
    }

    #[test]
    fn shutdown_flushes_without_waiting_for_debounce() {
        let dir = tempdir().unwrap();
        let db_path = crate::db::connection::db_path_for_workspace(dir.path());
        let store = Arc::new(Store::open(&db_path).unwrap());
        let page = store.create_page("Notes", None, false).unwrap();
        store.create_block(&page.id, default_request("hello")).unwrap();

        let mirror = MirrorService::new(store.clone(), dir.path().to_path_buf(), Duration::from_secs(60));
        mirror.enqueue(page.id.clone());
        mirror.shutdown();

        assert!(dir.path().join(page.file_path.unwrap()).exists());
    }
}
