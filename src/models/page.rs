use super::block::Id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: Id,
    pub title: String,
    pub parent_id: Option<Id>,
    pub is_directory: bool,
    pub file_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
