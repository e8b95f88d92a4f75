//! End-to-end organize run
//!
//! ```text
//! ensure session -> resolve collections -> enumerate -> classify
//!     -> plan -> confirm -> move (serial, throttled) -> report
//! ```
//!
//! Every enumerated item ends with exactly one `MoveOutcome`. Setup
//! failures (no session, unknown collection, listing failure) are
//! returned as errors; anything that goes wrong for a single item is
//! recorded on that item and the run continues.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::events::{ProgressEvent, ProgressSink};
use super::report::{MoveOutcome, MoveStatus, RunReport, RunSummary};
use crate::ai::{Assignment, ClassificationResult, Classifier, REASON_CANCELLED};
use crate::auth::Authenticator;
use crate::cancel::CancelFlag;
use crate::error::{FavError, Result};
use crate::platform::{Collection, MoveResult, Platform, VideoItem};
use crate::session::CredentialStore;

pub const REASON_ALREADY_IN_TARGET: &str = "already in target collection";
pub const REASON_UNRESOLVED: &str = "unresolved classification";
pub const REASON_DRY_RUN: &str = "dry run";
pub const REASON_DECLINED: &str = "moves declined";
pub const REASON_ABORTED: &str = "run aborted after session loss";

/// Collection reference given by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionSelector {
    Id(u64),
    Title(String),
}

impl CollectionSelector {
    /// Numeric input selects by id (falling back to a title of the same
    /// digits), anything else by title
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<u64>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Title(raw.to_string()),
        }
    }

    pub fn matches(&self, collection: &Collection) -> bool {
        match self {
            Self::Id(id) => collection.id == *id || same_title(&collection.title, &id.to_string()),
            Self::Title(title) => same_title(&collection.title, title),
        }
    }

    /// An id match wins over a collection whose title is the same digits
    fn resolve<'a>(&self, collections: &'a [Collection]) -> Result<&'a Collection> {
        let by_id = match self {
            Self::Id(id) => collections.iter().find(|c| c.id == *id),
            Self::Title(_) => None,
        };
        by_id
            .or_else(|| collections.iter().find(|c| self.matches(c)))
            .ok_or_else(|| FavError::config(format!("No collection matches {}", self)))
    }
}

impl std::fmt::Display for CollectionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {}", id),
            Self::Title(title) => write!(f, "{:?}", title),
        }
    }
}

fn same_title(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: CollectionSelector,
    pub targets: Vec<CollectionSelector>,
    /// Receives items the classifier could not place
    pub fallback: Option<CollectionSelector>,
    /// Classify and plan, but move nothing
    pub dry_run: bool,
}

/// A move about to be executed
#[derive(Debug, Clone)]
pub struct PlannedMove {
    pub video_id: u64,
    pub title: String,
    pub target_id: u64,
    pub target_title: String,
    /// Placed in the fallback collection rather than by the classifier
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct MovePlan {
    pub source: Collection,
    pub moves: Vec<PlannedMove>,
    pub skipped: usize,
}

/// Last chance to look at the plan before anything is written
#[async_trait]
pub trait MoveConfirmation: Send + Sync {
    async fn confirm(&self, plan: &MovePlan) -> bool;
}

/// Accepts every plan
pub struct AutoConfirm;

#[async_trait]
impl MoveConfirmation for AutoConfirm {
    async fn confirm(&self, _plan: &MovePlan) -> bool {
        true
    }
}

/// Make sure the session store holds a session the platform accepts.
///
/// Tries, in order: the session already in the store, the persisted
/// one, and finally a fresh login.
pub async fn ensure_session(
    platform: &Platform,
    credentials: &dyn CredentialStore,
    authenticator: &dyn Authenticator,
) -> Result<()> {
    let store = platform.sessions();

    if store.current().await.is_none() {
        if let Some(saved) = credentials.load()? {
            store.replace(saved).await;
        }
    }

    if store.current().await.is_some() {
        match platform.verify_session().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_auth() => {
                tracing::info!(error = %e, "Stored session rejected, starting login");
            }
            Err(e) => return Err(e),
        }
    }

    authenticator.authenticate(store).await?;
    Ok(())
}

/// Collections a request resolved to
#[derive(Debug, Clone)]
pub struct ResolvedCollections {
    pub source: Collection,
    pub targets: Vec<Collection>,
    pub fallback: Option<Collection>,
}

pub struct Orchestrator {
    platform: Arc<Platform>,
    classifier: Arc<Classifier>,
    authenticator: Arc<dyn Authenticator>,
    credentials: Arc<dyn CredentialStore>,
    move_interval: Duration,
    progress: ProgressSink,
    confirmation: Arc<dyn MoveConfirmation>,
}

/// How the move loop ended for one item
enum MoveAttempt {
    Done(MoveResult),
    Failed(FavError),
    /// Session lost again after the one allowed re-login
    SessionLost(FavError),
    /// Cancelled while logging in again
    Cancelled,
}

impl Orchestrator {
    pub fn new(
        platform: Arc<Platform>,
        classifier: Arc<Classifier>,
        authenticator: Arc<dyn Authenticator>,
        credentials: Arc<dyn CredentialStore>,
        move_interval: Duration,
    ) -> Self {
        Self {
            platform,
            classifier,
            authenticator,
            credentials,
            move_interval,
            progress: ProgressSink::none(),
            confirmation: Arc::new(AutoConfirm),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn MoveConfirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub async fn ensure_session(&self) -> Result<()> {
        ensure_session(&self.platform, self.credentials.as_ref(), self.authenticator.as_ref()).await
    }

    /// Resolve the request's selectors against the user's collections
    pub async fn resolve(&self, request: &RunRequest) -> Result<ResolvedCollections> {
        if request.targets.is_empty() {
            return Err(FavError::config("At least one target collection is required"));
        }

        let collections = self.platform.list_collections().await?;
        let source = request.source.resolve(&collections)?.clone();

        let mut targets: Vec<Collection> = Vec::with_capacity(request.targets.len());
        for selector in &request.targets {
            let target = selector.resolve(&collections)?;
            if targets.iter().any(|t| t.id == target.id) {
                continue;
            }
            if targets.iter().any(|t| same_title(&t.title, &target.title)) {
                return Err(FavError::config(format!(
                    "Target collections must have distinct titles; {:?} appears twice",
                    target.title
                )));
            }
            targets.push(target.clone());
        }

        let fallback = request
            .fallback
            .as_ref()
            .map(|selector| selector.resolve(&collections).cloned())
            .transpose()?;

        Ok(ResolvedCollections {
            source,
            targets,
            fallback,
        })
    }

    async fn attempt_move(&self, planned: &PlannedMove, source_id: u64, relogin_used: &mut bool) -> MoveAttempt {
        match self
            .platform
            .move_item(planned.video_id, source_id, planned.target_id)
            .await
        {
            Ok(result) => MoveAttempt::Done(result),
            Err(e) if e.is_auth() && !*relogin_used => {
                *relogin_used = true;
                tracing::warn!(video_id = planned.video_id, "Session lost during moves, logging in again");
                match self.authenticator.authenticate(self.platform.sessions()).await {
                    Ok(_) => {}
                    Err(FavError::Cancelled) => return MoveAttempt::Cancelled,
                    Err(login_err) => return MoveAttempt::SessionLost(login_err),
                }
                match self
                    .platform
                    .move_item(planned.video_id, source_id, planned.target_id)
                    .await
                {
                    Ok(result) => MoveAttempt::Done(result),
                    Err(e) if e.is_auth() => MoveAttempt::SessionLost(e),
                    Err(e) => MoveAttempt::Failed(e),
                }
            }
            Err(e) if e.is_auth() => MoveAttempt::SessionLost(e),
            Err(e) => MoveAttempt::Failed(e),
        }
    }

    /// Run the whole pipeline for one request
    pub async fn run(&self, request: &RunRequest, cancel: &CancelFlag) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        self.ensure_session().await?;
        let resolved = self.resolve(request).await?;
        let source = resolved.source;
        let items = self.platform.list_items(source.id).await?;

        tracing::info!(
            %run_id,
            source = %source.title,
            items = items.len(),
            targets = resolved.targets.len(),
            dry_run = request.dry_run,
            "Run started"
        );
        self.progress.emit(ProgressEvent::RunStarted {
            source: source.title.clone(),
            total: items.len(),
        });

        // Classification
        let allowed: Vec<String> = resolved.targets.iter().map(|t| t.title.clone()).collect();
        for item in &items {
            self.progress.emit(ProgressEvent::ItemStarted {
                video_id: item.video_id,
                title: item.title.clone(),
            });
        }
        let progress = &self.progress;
        let results = self
            .classifier
            .classify_all(&items, &allowed, cancel, &|_, result: &ClassificationResult| {
                progress.emit(ProgressEvent::ItemClassified {
                    video_id: result.video_id,
                    category: result.category().map(str::to_string),
                })
            })
            .await;
        let unresolved = results
            .iter()
            .filter(|r| {
                r.assigned == Assignment::Unresolved && r.reason.as_deref() != Some(REASON_CANCELLED)
            })
            .count();

        // Planning
        let mut outcomes: Vec<Option<MoveOutcome>> = vec![None; items.len()];
        let mut planned: Vec<(usize, PlannedMove)> = Vec::new();

        for (index, (item, result)) in items.iter().zip(&results).enumerate() {
            let decision = self.plan_item(item, result, &source, &resolved.targets, resolved.fallback.as_ref());
            match decision {
                Ok(mv) if request.dry_run => {
                    let outcome = MoveOutcome::new(item, MoveStatus::Skipped)
                        .with_target(mv.target_id, mv.target_title)
                        .with_reason(REASON_DRY_RUN);
                    outcomes[index] = Some(self.finish_skip(outcome));
                }
                Ok(mv) => planned.push((index, mv)),
                Err(outcome) => {
                    outcomes[index] = Some(match outcome.status {
                        MoveStatus::Skipped => self.finish_skip(outcome),
                        _ => outcome,
                    });
                }
            }
        }

        // Confirmation
        let mut cancelled = cancel.is_cancelled();
        if !planned.is_empty() && !cancelled {
            let plan = MovePlan {
                source: source.clone(),
                moves: planned.iter().map(|(_, mv)| mv.clone()).collect(),
                skipped: outcomes.iter().filter(|o| o.is_some()).count(),
            };
            if !self.confirmation.confirm(&plan).await {
                tracing::info!(%run_id, "Moves declined");
                cancel.cancel();
                cancelled = true;
                for (index, mv) in &planned {
                    outcomes[*index] = Some(
                        MoveOutcome::new(&items[*index], MoveStatus::NotAttempted)
                            .with_target(mv.target_id, mv.target_title.clone())
                            .with_reason(REASON_DECLINED),
                    );
                }
                planned.clear();
            }
        }

        // Moves
        let mut relogin_used = false;
        let mut aborted: Option<String> = None;

        for (n, (index, mv)) in planned.iter().enumerate() {
            let item = &items[*index];
            let base = MoveOutcome::new(item, MoveStatus::NotAttempted)
                .with_target(mv.target_id, mv.target_title.clone());

            if n > 0 && !self.move_interval.is_zero() && aborted.is_none() && !cancel.is_cancelled() {
                tokio::time::sleep(self.move_interval).await;
            }

            if aborted.is_some() {
                outcomes[*index] = Some(base.with_reason(REASON_ABORTED));
                continue;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                outcomes[*index] = Some(base.with_reason(REASON_CANCELLED));
                continue;
            }

            let outcome = match self.attempt_move(mv, source.id, &mut relogin_used).await {
                MoveAttempt::Done(result) => {
                    self.progress.emit(ProgressEvent::ItemMoved {
                        video_id: item.video_id,
                        target: mv.target_title.clone(),
                    });
                    let moved = MoveOutcome { status: MoveStatus::Moved, ..base };
                    match result {
                        MoveResult::Moved if mv.fallback => moved.with_reason(REASON_UNRESOLVED),
                        MoveResult::Moved => moved,
                        MoveResult::AlreadyAbsent => moved.with_reason("already absent from source"),
                    }
                }
                MoveAttempt::Failed(e) => {
                    tracing::warn!(video_id = item.video_id, error = %e, kind = e.kind(), "Move failed");
                    self.progress.emit(ProgressEvent::ItemFailed {
                        video_id: item.video_id,
                        error: e.to_string(),
                    });
                    MoveOutcome { status: MoveStatus::Failed, ..base }.with_reason(e.to_string())
                }
                MoveAttempt::Cancelled => {
                    cancelled = true;
                    base.with_reason(REASON_CANCELLED)
                }
                MoveAttempt::SessionLost(e) => {
                    tracing::error!(video_id = item.video_id, error = %e, "Session lost twice, aborting run");
                    self.progress.emit(ProgressEvent::ItemFailed {
                        video_id: item.video_id,
                        error: e.to_string(),
                    });
                    aborted = Some(e.to_string());
                    MoveOutcome { status: MoveStatus::Failed, ..base }.with_reason(e.to_string())
                }
            };
            outcomes[*index] = Some(outcome);
        }

        let outcomes: Vec<MoveOutcome> = outcomes
            .into_iter()
            .zip(&items)
            .map(|(o, item)| {
                o.unwrap_or_else(|| {
                    MoveOutcome::new(item, MoveStatus::NotAttempted).with_reason(REASON_CANCELLED)
                })
            })
            .collect();
        let summary = RunSummary::from_outcomes(&outcomes, unresolved);

        tracing::info!(
            %run_id,
            moved = summary.moved,
            skipped = summary.skipped,
            failed = summary.failed,
            not_attempted = summary.not_attempted,
            cancelled,
            aborted = aborted.is_some(),
            "Run finished"
        );
        self.progress.emit(ProgressEvent::RunFinished { summary });

        Ok(RunReport {
            run_id,
            source: source.title,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            summary,
            cancelled: cancelled || cancel.is_cancelled(),
            aborted,
        })
    }

    /// Decide what happens to one classified item: a planned move, or its final outcome
    fn plan_item(
        &self,
        item: &VideoItem,
        result: &ClassificationResult,
        source: &Collection,
        targets: &[Collection],
        fallback: Option<&Collection>,
    ) -> std::result::Result<PlannedMove, MoveOutcome> {
        let planned = |target: &Collection, fallback: bool| PlannedMove {
            video_id: item.video_id,
            title: item.title.clone(),
            target_id: target.id,
            target_title: target.title.clone(),
            fallback,
        };

        match &result.assigned {
            Assignment::Resolved(category) => {
                let target = targets.iter().find(|t| t.title == *category);
                match target {
                    Some(t) if t.id == source.id => Err(MoveOutcome::new(item, MoveStatus::Skipped)
                        .with_target(t.id, t.title.clone())
                        .with_reason(REASON_ALREADY_IN_TARGET)),
                    Some(t) => Ok(planned(t, false)),
                    None => Err(MoveOutcome::new(item, MoveStatus::Skipped).with_reason(REASON_UNRESOLVED)),
                }
            }
            Assignment::Unresolved if result.reason.as_deref() == Some(REASON_CANCELLED) => {
                Err(MoveOutcome::new(item, MoveStatus::NotAttempted).with_reason(REASON_CANCELLED))
            }
            Assignment::Unresolved => match fallback {
                Some(fb) if fb.id != source.id => Ok(planned(fb, true)),
                _ => Err(MoveOutcome::new(item, MoveStatus::Skipped).with_reason(REASON_UNRESOLVED)),
            },
        }
    }

    fn finish_skip(&self, outcome: MoveOutcome) -> MoveOutcome {
        self.progress.emit(ProgressEvent::ItemSkipped {
            video_id: outcome.video_id,
            reason: outcome.reason.clone().unwrap_or_default(),
        });
        outcome
    }
}
