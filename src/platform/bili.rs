//! Bilibili favorites API
//!
//! Every response is wrapped in a `{code, message, data}` envelope. A
//! non-zero `code` is mapped onto the shared error taxonomy here so the
//! layers above never see platform-specific numbers.

use async_trait::async_trait;
use reqwest::header::{COOKIE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::types::{Collection, ItemPage, VideoItem};
use super::FavoritesApi;
use crate::error::{FavError, Result};
use crate::session::Session;

pub const API_BASE: &str = "https://api.bilibili.com";

/// Resource type of a video in the favorites endpoints
const VIDEO_RESOURCE_TYPE: &str = "2";

/// Standard `{code, message, data}` wrapper
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Payload on code 0, mapped error otherwise
    pub fn into_result(self) -> Result<Option<T>> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            Err(error_for_code(self.code, &self.message))
        }
    }
}

/// Map a non-zero platform code onto `FavError`
pub(crate) fn error_for_code(code: i64, message: &str) -> FavError {
    let message = if message.is_empty() {
        format!("code {}", code)
    } else {
        message.to_string()
    };
    match code {
        -101 | -111 => FavError::auth(message),
        -412 | -352 | -509 | -799 => FavError::rate_limited(message),
        -404 | 11010 => FavError::not_found(message),
        _ => FavError::Api { code, message },
    }
}

/// Map a non-success HTTP status; `None` means the body should be parsed
pub(crate) fn error_for_status(status: StatusCode, retry_after: Option<Duration>) -> Option<FavError> {
    match status {
        s if s.is_success() => None,
        StatusCode::PRECONDITION_FAILED | StatusCode::TOO_MANY_REQUESTS => Some(FavError::RateLimited {
            message: format!("HTTP {}", status.as_u16()),
            retry_after,
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(FavError::auth(format!("HTTP {}", status.as_u16())))
        }
        StatusCode::NOT_FOUND => Some(FavError::not_found(format!("HTTP {}", status.as_u16()))),
        s if s.is_server_error() => Some(FavError::network(format!("HTTP {}", s.as_u16()))),
        s => Some(FavError::Api {
            code: i64::from(s.as_u16()),
            message: format!("unexpected HTTP status {}", s),
        }),
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Deserialize)]
struct FolderList {
    #[serde(default)]
    list: Option<Vec<RawFolder>>,
}

#[derive(Debug, Deserialize)]
struct RawFolder {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    media_count: u64,
    /// Only present when the listing is asked about a specific item
    #[serde(default)]
    fav_state: i64,
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    info: Option<RawFolderInfo>,
    /// Null for an empty collection or a page past the end
    #[serde(default)]
    medias: Option<Vec<RawMedia>>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct RawFolderInfo {
    #[serde(default)]
    media_count: u64,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    id: u64,
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    intro: String,
    #[serde(default)]
    upper: Option<RawUpper>,
}

#[derive(Debug, Deserialize)]
struct RawUpper {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct NavInfo {
    #[serde(rename = "isLogin", default)]
    is_login: bool,
}

fn to_collections(data: Option<FolderList>) -> Vec<Collection> {
    data.and_then(|d| d.list)
        .unwrap_or_default()
        .into_iter()
        .map(|f| Collection {
            id: f.id,
            title: f.title,
            item_count: f.media_count,
        })
        .collect()
}

fn to_item_page(data: Option<ResourceList>, collection_id: u64) -> ItemPage {
    let Some(data) = data else {
        return ItemPage::default();
    };
    let items = data
        .medias
        .unwrap_or_default()
        .into_iter()
        .map(|m| VideoItem {
            video_id: m.id,
            bvid: m.bvid,
            title: m.title,
            description: m.intro,
            owner_name: m.upper.map(|u| u.name).unwrap_or_default(),
            source_collection_id: collection_id,
        })
        .collect();
    ItemPage {
        items,
        total: data.info.map(|i| i.media_count).unwrap_or(0),
        has_more: data.has_more,
    }
}

/// HTTP implementation of `FavoritesApi`
pub struct BiliApi {
    http: Client,
    base_url: String,
}

impl BiliApi {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, API_BASE)
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
        if let Some(err) = error_for_status(response.status(), retry_after(&response)) {
            return Err(err);
        }
        let envelope: Envelope<T> = response.json().await?;
        envelope.into_result()
    }

    async fn get<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let response = self
            .http
            .get(self.url(path))
            .header(COOKIE, session.cookie_header())
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl FavoritesApi for BiliApi {
    async fn verify_session(&self, session: &Session) -> Result<()> {
        let nav: Option<NavInfo> = self.get(session, "/x/web-interface/nav", &[]).await?;
        match nav {
            Some(n) if n.is_login => Ok(()),
            _ => Err(FavError::auth("session is not logged in")),
        }
    }

    async fn list_collections(&self, session: &Session) -> Result<Vec<Collection>> {
        let data: Option<FolderList> = self
            .get(
                session,
                "/x/v3/fav/folder/created/list-all",
                &[("up_mid", session.user_id.clone())],
            )
            .await?;
        let collections = to_collections(data);
        tracing::debug!(count = collections.len(), "Listed collections");
        Ok(collections)
    }

    async fn list_items_page(
        &self,
        session: &Session,
        collection_id: u64,
        page: u32,
        page_size: u32,
    ) -> Result<ItemPage> {
        let data: Option<ResourceList> = self
            .get(
                session,
                "/x/v3/fav/resource/list",
                &[
                    ("media_id", collection_id.to_string()),
                    ("pn", page.to_string()),
                    ("ps", page_size.to_string()),
                    ("platform", "web".to_string()),
                ],
            )
            .await?;
        Ok(to_item_page(data, collection_id))
    }

    async fn move_item(
        &self,
        session: &Session,
        video_id: u64,
        source_collection_id: u64,
        target_collection_id: u64,
    ) -> Result<()> {
        let form = [
            ("rid", video_id.to_string()),
            ("type", VIDEO_RESOURCE_TYPE.to_string()),
            ("add_media_ids", target_collection_id.to_string()),
            ("del_media_ids", source_collection_id.to_string()),
            ("csrf", session.csrf_token.clone()),
        ];
        let response = self
            .http
            .post(self.url("/x/v3/fav/resource/deal"))
            .header(COOKIE, session.cookie_header())
            .form(&form)
            .send()
            .await?;
        Self::decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn memberships(&self, session: &Session, video_id: u64) -> Result<Vec<(u64, bool)>> {
        let data: Option<FolderList> = self
            .get(
                session,
                "/x/v3/fav/folder/created/list-all",
                &[
                    ("up_mid", session.user_id.clone()),
                    ("type", VIDEO_RESOURCE_TYPE.to_string()),
                    ("rid", video_id.to_string()),
                ],
            )
            .await?;
        Ok(data
            .and_then(|d| d.list)
            .unwrap_or_default()
            .into_iter()
            .map(|f| (f.id, f.fav_state == 1))
            .collect())
    }
}
