//! Local-first outliner storage engine: a page/block tree persisted to
//! SQLite, mirrored to plain markdown files on disk, with full-text search
//! and wiki-style cross-links.
//!
//! [`Workspace`] is the usual entry point: it opens (or creates) a
//! workspace directory's database, runs schema migrations, and hands back
//! a [`store::Store`] through which every page/block operation flows.
//! [`mirror::MirrorService`] and [`client_cache::ClientCache`] are
//! independent layers a caller wires on top as needed.

pub mod client_cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fractional_index;
pub mod fts;
pub mod markdown;
pub mod mirror;
pub mod models;
pub mod store;
pub mod wiki_links;
pub mod workspace;

pub use client_cache::ClientCache;
pub use config::WorkspaceConfig;
pub use error::{OutlinerError, Result};
pub use mirror::MirrorService;
pub use models::{Block, BlockKind, Id, Page};
pub use store::{ChangeNotification, Store};
pub use workspace::{ImportReport, Workspace};
