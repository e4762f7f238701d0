use serde::{Deserialize, Serialize};

/// A block or page id. Always a UUID v4 string; kept as a plain `String`
/// rather than a newtype so callers can move ids in and out of SQL params
/// without conversions at every call site.
pub type Id = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: Id,
    pub page_id: Id,
    pub parent_id: Option<Id>,
    pub content: String,
    pub order_weight: f64,
    pub is_collapsed: bool,
    pub kind: BlockKind,
    pub language: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Bullet,
    Code,
    Fence,
}

impl Default for BlockKind {
    fn default() -> Self {
        BlockKind::Bullet
    }
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Bullet => "bullet",
            BlockKind::Code => "code",
            BlockKind::Fence => "fence",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "code" => BlockKind::Code,
            "fence" => BlockKind::Fence,
            _ => BlockKind::Bullet,
        }
    }
}

/// Where to insert a new block relative to its sibling group, used when
/// the caller has no `after_block_id` to anchor on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    /// Before every current sibling.
    Start,
    /// After every current sibling (the default).
    End,
}

impl Default for InsertPosition {
    fn default() -> Self {
        InsertPosition::End
    }
}

/// Parameters for `Store::create_block`.
#[derive(Debug, Clone, Default)]
pub struct CreateBlockRequest {
    pub parent_id: Option<Id>,
    pub after_block_id: Option<Id>,
    pub position: InsertPosition,
    pub content: String,
    pub kind: BlockKind,
    pub language: Option<String>,
}

/// Parameters for `Store::update_block`. `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct UpdateBlockRequest {
    pub content: Option<String>,
    pub is_collapsed: Option<bool>,
    pub kind: Option<BlockKind>,
    pub language: Option<String>,
}
