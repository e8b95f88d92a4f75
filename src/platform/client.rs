use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use super::types::{Collection, ItemPage, MoveResult, VideoItem};
use super::FavoritesApi;
use crate::config::PlatformConfig;
use crate::error::{FavError, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::{with_backoff, RetryPolicy};
use crate::session::{Session, SessionStore};

/// Session-aware façade over a `FavoritesApi`.
///
/// Holds no session of its own: every call snapshots the shared
/// `SessionStore`, and an auth rejection invalidates exactly the
/// generation that was used.
pub struct Platform {
    api: Arc<dyn FavoritesApi>,
    sessions: Arc<SessionStore>,
    config: PlatformConfig,
    retry: RetryPolicy,
    throttle: RateLimiter,
}

/// Pagination cursor threaded through the item stream
struct PageCursor {
    next_page: u32,
    seen: HashSet<u64>,
    done: bool,
}

impl Platform {
    pub fn new(
        api: Arc<dyn FavoritesApi>,
        sessions: Arc<SessionStore>,
        config: PlatformConfig,
        retry: RetryPolicy,
    ) -> Self {
        let throttle = RateLimiter::per_minute(config.moves_per_minute);
        Self {
            api,
            sessions,
            config,
            retry,
            throttle,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run `op` with the current session, invalidating it if the platform rejects it
    async fn with_session<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let snapshot = self.sessions.require().await?;
        match op(snapshot.session).await {
            Err(e) if e.is_auth() => {
                self.sessions.invalidate(snapshot.generation).await;
                Err(e)
            }
            other => other,
        }
    }

    /// Check the current session against the platform
    pub async fn verify_session(&self) -> Result<()> {
        let api = &self.api;
        self.with_session(move |s| async move { api.verify_session(&s).await })
            .await
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        let api = &self.api;
        with_backoff("list_collections", &self.retry, FavError::is_transient, move || {
            self.with_session(move |s| async move { api.list_collections(&s).await })
        })
        .await
    }

    async fn fetch_page(&self, collection_id: u64, page: u32) -> Result<ItemPage> {
        let api = &self.api;
        let page_size = self.config.page_size;
        with_backoff("list_items_page", &self.retry, FavError::is_transient, move || {
            self.with_session(move |s| async move {
                api.list_items_page(&s, collection_id, page, page_size).await
            })
        })
        .await
    }

    /// Lazily enumerate every item in a collection.
    ///
    /// Pages are requested only as the stream is polled. Items repeated
    /// across pages (the listing shifts when the collection changes
    /// underneath it) are yielded once. Enumeration stops at the reported
    /// total, when the platform reports no more pages, on an empty page, or
    /// at `max_pages`.
    pub fn items(&self, collection_id: u64) -> impl Stream<Item = Result<VideoItem>> + '_ {
        let cursor = PageCursor {
            next_page: 1,
            seen: HashSet::new(),
            done: false,
        };
        let max_pages = self.config.max_pages;

        stream::try_unfold(cursor, move |mut cursor| async move {
            if cursor.done {
                return Ok::<_, FavError>(None);
            }
            if cursor.next_page > max_pages {
                tracing::warn!(collection_id, max_pages, "Stopped listing at page limit");
                return Ok(None);
            }

            let page = self.fetch_page(collection_id, cursor.next_page).await?;
            tracing::debug!(
                collection_id,
                page = cursor.next_page,
                returned = page.items.len(),
                total = page.total,
                "Fetched item page"
            );
            cursor.next_page += 1;

            if page.items.is_empty() {
                return Ok(None);
            }

            let fresh: Vec<VideoItem> = page
                .items
                .into_iter()
                .filter(|item| cursor.seen.insert(item.video_id))
                .collect();

            let reached_total = page.total > 0 && cursor.seen.len() as u64 >= page.total;
            if !page.has_more || reached_total {
                cursor.done = true;
            }

            Ok(Some((fresh, cursor)))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, FavError>)))
        .try_flatten()
    }

    /// Collect `items` into listing order
    pub async fn list_items(&self, collection_id: u64) -> Result<Vec<VideoItem>> {
        let items: Vec<VideoItem> = self.items(collection_id).try_collect().await?;
        tracing::info!(collection_id, count = items.len(), "Enumerated collection");
        Ok(items)
    }

    /// Move one item from `source` to `target`.
    ///
    /// Writes are throttled per account and rate-limit responses are retried
    /// with backoff. A `NotFound` answer is checked against the item's
    /// current memberships: an item that already left the source counts as
    /// moved (`AlreadyAbsent`), so repeating a move is harmless.
    pub async fn move_item(
        &self,
        video_id: u64,
        source_collection_id: u64,
        target_collection_id: u64,
    ) -> Result<MoveResult> {
        let account = self.sessions.require().await?.session.user_id.clone();
        let account = account.as_str();
        let api = &self.api;

        let outcome = with_backoff(
            "move_item",
            &self.retry,
            |e| matches!(e, FavError::RateLimited { .. }),
            move || async move {
                self.throttle.acquire(account).await;
                self.with_session(move |s| async move {
                    api.move_item(&s, video_id, source_collection_id, target_collection_id)
                        .await
                })
                .await
            },
        )
        .await;

        match outcome {
            Ok(()) => Ok(MoveResult::Moved),
            Err(FavError::NotFound { message }) => {
                let memberships = self
                    .with_session(move |s| async move { api.memberships(&s, video_id).await })
                    .await;
                match memberships {
                    Ok(list) => {
                        let in_source = list
                            .iter()
                            .any(|(id, contains)| *id == source_collection_id && *contains);
                        if in_source {
                            Err(FavError::NotFound { message })
                        } else {
                            tracing::info!(
                                video_id,
                                source_collection_id,
                                "Item already absent from source, treating move as done"
                            );
                            Ok(MoveResult::AlreadyAbsent)
                        }
                    }
                    Err(e) => {
                        tracing::warn!(video_id, error = %e, "Membership check failed");
                        Err(FavError::NotFound { message })
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}
