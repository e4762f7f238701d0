//! Workspace lifecycle: opening a root directory's database and importing
//! its `.md` files into the `Store`.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::METADATA_DIR_NAME;
use crate::db::connection;
use crate::error::Result;
use crate::markdown;
use crate::store::Store;

/// Summary of a `Workspace::import` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub pages_created: usize,
    pub pages_replaced: usize,
    pub pages_skipped: usize,
    pub blocks_imported: usize,
}

/// One open workspace: a root directory plus the `Store` backing it.
pub struct Workspace {
    root: PathBuf,
    store: Store,
}

impl Workspace {
    /// Open (creating if needed) the workspace rooted at `root`, running
    /// schema migrations and an FTS consistency check.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let db_path = connection::db_path_for_workspace(&root);
        let store = Store::open(&db_path)?;
        store.verify_fts()?;
        Ok(Self { root, store })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Scan the workspace for `.md` files and import each one as a page, in
    /// one transaction per file. Idempotent per file unless `force_reimport`
    /// is set, in which case an already-imported page's blocks are replaced.
    pub fn import(&self, force_reimport: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        let by_file_path: std::collections::HashMap<String, crate::models::Page> = self
            .store
            .list_pages()?
            .into_iter()
            .filter_map(|p| p.file_path.clone().map(|fp| (fp, p)))
            .collect();

        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name().to_str() != Some(METADATA_DIR_NAME))
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }

            let rel_path = match path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            let existing = by_file_path.get(&rel_path).cloned();

            match existing {
                Some(page) if !force_reimport => {
                    report.pages_skipped += 1;
                    let _ = page;
                }
                Some(page) => {
                    let content = std::fs::read_to_string(path)?;
                    let count = self.replace_page_blocks(&page.id, &content)?;
                    report.pages_replaced += 1;
                    report.blocks_imported += count;
                }
                None => {
                    let title = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("Untitled")
                        .to_string();
                    let content = std::fs::read_to_string(path)?;
                    let count = self.import_new_page(&title, &rel_path, &content)?;
                    report.pages_created += 1;
                    report.blocks_imported += count;
                }
            }
        }

        Ok(report)
    }

    fn import_new_page(&self, title: &str, rel_path: &str, content: &str) -> Result<usize> {
        let page = self.store.create_page_for_import(title, rel_path)?;
        self.replace_page_blocks(&page.id, content)
    }

    fn replace_page_blocks(&self, page_id: &str, content: &str) -> Result<usize> {
        self.store.replace_blocks_from_markdown(page_id, content, markdown::parse)
    }
}
