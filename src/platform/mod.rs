//! Favorites platform access
//!
//! `FavoritesApi` is the raw authenticated HTTP surface, one call per
//! endpoint, each taking an explicit session. `Platform` wraps it with the
//! behavior callers rely on: session lookup and invalidation, lazy
//! de-duplicated pagination, write throttling, rate-limit backoff and
//! idempotent moves.

pub mod bili;
pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::Session;

pub use bili::BiliApi;
pub use client::Platform;
pub use types::{Collection, ItemPage, MoveResult, VideoItem};

#[async_trait]
pub trait FavoritesApi: Send + Sync {
    /// Ok if the platform still accepts `session`
    async fn verify_session(&self, session: &Session) -> Result<()>;

    async fn list_collections(&self, session: &Session) -> Result<Vec<Collection>>;

    /// Fetch page `page` (1-based) of a collection
    async fn list_items_page(
        &self,
        session: &Session,
        collection_id: u64,
        page: u32,
        page_size: u32,
    ) -> Result<ItemPage>;

    /// Add the item to `target` and remove it from `source` in one call
    async fn move_item(
        &self,
        session: &Session,
        video_id: u64,
        source_collection_id: u64,
        target_collection_id: u64,
    ) -> Result<()>;

    /// `(collection_id, contains_item)` for every collection the user owns
    async fn memberships(&self, session: &Session, video_id: u64) -> Result<Vec<(u64, bool)>>;
}
