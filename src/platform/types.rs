use serde::{Deserialize, Serialize};

/// A favorites folder owned by the logged-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: u64,
    pub title: String,
    pub item_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    /// Numeric video id (aid); the move endpoint addresses videos by it
    pub video_id: u64,
    pub bvid: String,
    pub title: String,
    pub description: String,
    pub owner_name: String,
    pub source_collection_id: u64,
}

/// One page of a collection listing
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<VideoItem>,
    /// Item count reported by the platform at the time of this page
    pub total: u64,
    pub has_more: bool,
}

/// Successful move result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveResult {
    Moved,
    /// The item had already left the source collection
    AlreadyAbsent,
}
