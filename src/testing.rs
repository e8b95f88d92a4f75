//! In-memory fakes for the platform, model, login and clock seams

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::ai::{CompletionBackend, CompletionRequest};
use crate::auth::{Authenticator, Clock};
use crate::cancel::CancelFlag;
use crate::error::{FavError, Result};
use crate::platform::{Collection, FavoritesApi, ItemPage, VideoItem};
use crate::session::{CredentialStore, Session, SessionStore};

pub fn item(video_id: u64, title: &str, source_collection_id: u64) -> VideoItem {
    VideoItem {
        video_id,
        bvid: format!("BV{}", video_id),
        title: title.to_string(),
        description: String::new(),
        owner_name: "uploader".to_string(),
        source_collection_id,
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Option<Session>>,
}

impl MemoryCredentialStore {
    pub fn holding(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.session.lock().unwrap().clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.session.lock().unwrap() = None;
        Ok(())
    }
}

/// Clock that advances only when slept on
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
    }
}

type MoveHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct FakeState {
    collections: Vec<(u64, String)>,
    contents: HashMap<u64, Vec<VideoItem>>,
    accepted: HashSet<String>,
    move_failures: HashMap<u64, VecDeque<FavError>>,
    move_attempts: HashMap<u64, usize>,
    page_requests: usize,
    moved: usize,
}

/// Favorites backend kept entirely in memory
#[derive(Default)]
pub struct FakeFavorites {
    state: Mutex<FakeState>,
    on_move: Mutex<Option<MoveHook>>,
}

impl FakeFavorites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection(&self, id: u64, title: &str, items: Vec<VideoItem>) {
        let mut state = self.state.lock().unwrap();
        state.collections.push((id, title.to_string()));
        state.contents.insert(id, items);
    }

    pub fn accept_token(&self, token: &str) {
        self.state.lock().unwrap().accepted.insert(token.to_string());
    }

    pub fn revoke_token(&self, token: &str) {
        self.state.lock().unwrap().accepted.remove(token);
    }

    /// Queue an error for the next move of `video_id`
    pub fn fail_move(&self, video_id: u64, error: FavError) {
        self.state
            .lock()
            .unwrap()
            .move_failures
            .entry(video_id)
            .or_default()
            .push_back(error);
    }

    /// Called with the running count after each successful move
    pub fn on_move(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_move.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn move_attempts(&self, video_id: u64) -> usize {
        self.state
            .lock()
            .unwrap()
            .move_attempts
            .get(&video_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_move_attempts(&self) -> usize {
        self.state.lock().unwrap().move_attempts.values().sum()
    }

    pub fn page_requests(&self) -> usize {
        self.state.lock().unwrap().page_requests
    }

    pub fn collection_ids(&self, collection_id: u64) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .contents
            .get(&collection_id)
            .map(|items| items.iter().map(|i| i.video_id).collect())
            .unwrap_or_default()
    }

    fn check(state: &FakeState, session: &Session) -> Result<()> {
        if state.accepted.contains(&session.session_token) {
            Ok(())
        } else {
            Err(FavError::auth("account not logged in"))
        }
    }
}

#[async_trait]
impl FavoritesApi for FakeFavorites {
    async fn verify_session(&self, session: &Session) -> Result<()> {
        Self::check(&self.state.lock().unwrap(), session)
    }

    async fn list_collections(&self, session: &Session) -> Result<Vec<Collection>> {
        let state = self.state.lock().unwrap();
        Self::check(&state, session)?;
        Ok(state
            .collections
            .iter()
            .map(|(id, title)| Collection {
                id: *id,
                title: title.clone(),
                item_count: state.contents.get(id).map_or(0, |c| c.len() as u64),
            })
            .collect())
    }

    async fn list_items_page(
        &self,
        session: &Session,
        collection_id: u64,
        page: u32,
        page_size: u32,
    ) -> Result<ItemPage> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, session)?;
        state.page_requests += 1;

        let items = state
            .contents
            .get(&collection_id)
            .ok_or_else(|| FavError::not_found("folder does not exist"))?;
        let start = ((page.saturating_sub(1)) * page_size) as usize;
        let end = (start + page_size as usize).min(items.len());
        let slice = if start < items.len() {
            items[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(ItemPage {
            items: slice,
            total: items.len() as u64,
            has_more: end < items.len(),
        })
    }

    async fn move_item(
        &self,
        session: &Session,
        video_id: u64,
        source_collection_id: u64,
        target_collection_id: u64,
    ) -> Result<()> {
        let moved = {
            let mut state = self.state.lock().unwrap();
            *state.move_attempts.entry(video_id).or_default() += 1;
            Self::check(&state, session)?;

            if let Some(err) = state
                .move_failures
                .get_mut(&video_id)
                .and_then(|queue| queue.pop_front())
            {
                return Err(err);
            }

            if !state.contents.contains_key(&target_collection_id) {
                return Err(FavError::not_found("target folder does not exist"));
            }
            let source = state
                .contents
                .get_mut(&source_collection_id)
                .ok_or_else(|| FavError::not_found("source folder does not exist"))?;
            let position = source
                .iter()
                .position(|i| i.video_id == video_id)
                .ok_or_else(|| FavError::not_found("resource not in folder"))?;
            let mut item = source.remove(position);
            item.source_collection_id = target_collection_id;
            if let Some(target) = state.contents.get_mut(&target_collection_id) {
                target.push(item);
            }
            state.moved += 1;
            state.moved
        };

        if let Some(hook) = self.on_move.lock().unwrap().as_ref() {
            hook(moved);
        }
        Ok(())
    }

    async fn memberships(&self, session: &Session, video_id: u64) -> Result<Vec<(u64, bool)>> {
        let state = self.state.lock().unwrap();
        Self::check(&state, session)?;
        Ok(state
            .collections
            .iter()
            .map(|(id, _)| {
                let contains = state
                    .contents
                    .get(id)
                    .is_some_and(|items| items.iter().any(|i| i.video_id == video_id));
                (*id, contains)
            })
            .collect())
    }
}

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

/// Completion backend answering from a closure, tracking concurrency
pub struct ScriptedBackend {
    responder: Responder,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn answering(
        responder: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Answer with the category paired to the first title found in the prompt
    pub fn by_title(pairs: &[(&str, &str)]) -> Arc<Self> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(t, c)| (format!("TITLE: {}\n", t), c.to_string()))
            .collect();
        Self::answering(move |req| {
            Ok(pairs
                .iter()
                .find(|(title, _)| req.user.contains(title.as_str()))
                .map(|(_, category)| category.clone())
                .unwrap_or_else(|| "I am not sure".to_string()))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let answer = (self.responder)(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

/// Login that installs a fixed session, or fails
pub struct FakeAuthenticator {
    session: Option<Session>,
    cancel: Option<CancelFlag>,
    calls: AtomicUsize,
}

impl FakeAuthenticator {
    pub fn issuing(session: Session) -> Arc<Self> {
        Arc::new(Self {
            session: Some(session),
            cancel: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            session: None,
            cancel: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// The user cancels while the login is waiting for a scan
    pub fn cancelled_by(cancel: CancelFlag) -> Arc<Self> {
        Arc::new(Self {
            session: None,
            cancel: Some(cancel),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(&self, store: &SessionStore) -> Result<Session> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
            return Err(FavError::Cancelled);
        }
        match &self.session {
            Some(session) => {
                store.replace(session.clone()).await;
                Ok(session.clone())
            }
            None => Err(FavError::ChallengeExpired),
        }
    }
}
