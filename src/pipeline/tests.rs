use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use super::*;
use crate::ai::{Classifier, PromptTemplate, REASON_CANCELLED};
use crate::cancel::CancelFlag;
use crate::config::{ClassifierConfig, PlatformConfig};
use crate::error::FavError;
use crate::platform::{Platform, VideoItem};
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionStore};
use crate::testing::{item, FakeAuthenticator, FakeFavorites, MemoryCredentialStore, ScriptedBackend};

const DEFAULT: u64 = 1;
const MUSIC: u64 = 2;
const COOKING: u64 = 3;
const UNSORTED: u64 = 4;

struct Harness {
    fake: Arc<FakeFavorites>,
    backend: Arc<ScriptedBackend>,
    auth: Arc<FakeAuthenticator>,
    orchestrator: Orchestrator,
    events: UnboundedReceiver<ProgressEvent>,
}

impl Harness {
    fn drain_events(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn session(token: &str) -> Session {
    Session::new(token, "csrf", "42")
}

/// Library with Default (source), Music, Cooking and Unsorted; "tok" is a valid stored session
fn library(source_items: Vec<VideoItem>) -> Arc<FakeFavorites> {
    let fake = Arc::new(FakeFavorites::new());
    fake.add_collection(DEFAULT, "Default", source_items);
    fake.add_collection(MUSIC, "Music", vec![]);
    fake.add_collection(COOKING, "Cooking", vec![]);
    fake.add_collection(UNSORTED, "Unsorted", vec![]);
    fake.accept_token("tok");
    fake
}

fn harness_with(
    fake: Arc<FakeFavorites>,
    backend: Arc<ScriptedBackend>,
    auth: Arc<FakeAuthenticator>,
    stored: Option<Session>,
) -> Harness {
    let store = Arc::new(SessionStore::new());
    let platform = Arc::new(Platform::new(
        fake.clone(),
        store,
        PlatformConfig {
            move_interval: Duration::ZERO,
            moves_per_minute: 1000,
            ..PlatformConfig::default()
        },
        RetryPolicy::immediate(3),
    ));
    let classifier = Arc::new(Classifier::new(
        backend.clone(),
        PromptTemplate::builtin().unwrap(),
        ClassifierConfig::default(),
        RetryPolicy::immediate(3),
    ));
    let creds = Arc::new(match stored {
        Some(s) => MemoryCredentialStore::holding(s),
        None => MemoryCredentialStore::default(),
    });
    let (tx, rx) = unbounded_channel();
    let orchestrator = Orchestrator::new(platform, classifier, auth.clone(), creds, Duration::ZERO)
        .with_progress(ProgressSink::new(tx));

    Harness {
        fake,
        backend,
        auth,
        orchestrator,
        events: rx,
    }
}

fn harness(fake: Arc<FakeFavorites>, backend: Arc<ScriptedBackend>) -> Harness {
    harness_with(
        fake,
        backend,
        FakeAuthenticator::issuing(session("tok")),
        Some(session("tok")),
    )
}

fn request(targets: &[&str]) -> RunRequest {
    RunRequest {
        source: CollectionSelector::Title("Default".to_string()),
        targets: targets
            .iter()
            .map(|t| CollectionSelector::Title(t.to_string()))
            .collect(),
        fallback: None,
        dry_run: false,
    }
}

fn statuses(report: &RunReport) -> Vec<MoveStatus> {
    report.outcomes.iter().map(|o| o.status).collect()
}

fn numbered(n: u64, title: &str) -> Vec<VideoItem> {
    (1..=n).map(|i| item(i, &format!("{} {}", title, i), DEFAULT)).collect()
}

#[tokio::test]
async fn test_end_to_end_three_items() {
    let fake = library(vec![
        item(11, "Pasta recipe", DEFAULT),
        item(12, "Piano cover", DEFAULT),
        item(13, "Random vlog", DEFAULT),
    ]);
    let backend = ScriptedBackend::by_title(&[("Pasta recipe", "Cooking"), ("Piano cover", "Music")]);
    let mut h = harness(fake, backend);

    let report = h
        .orchestrator
        .run(&request(&["Music", "Cooking"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![MoveStatus::Moved, MoveStatus::Moved, MoveStatus::Skipped]
    );
    assert_eq!(report.outcomes[0].target_title.as_deref(), Some("Cooking"));
    assert_eq!(report.outcomes[1].target_collection_id, Some(MUSIC));
    assert_eq!(report.outcomes[2].reason.as_deref(), Some(orchestrator::REASON_UNRESOLVED));
    assert_eq!(report.summary.moved, 2);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.unresolved, 1);
    assert_eq!(report.summary.total, 3);
    assert!(!report.cancelled);
    assert!(report.is_complete());

    assert_eq!(h.fake.collection_ids(COOKING), vec![11]);
    assert_eq!(h.fake.collection_ids(MUSIC), vec![12]);
    assert_eq!(h.fake.collection_ids(DEFAULT), vec![13]);
    assert_eq!(h.auth.calls(), 0);

    let events = h.drain_events();
    assert_eq!(
        events.first(),
        Some(&ProgressEvent::RunStarted {
            source: "Default".to_string(),
            total: 3
        })
    );
    assert!(matches!(events.last(), Some(ProgressEvent::RunFinished { summary }) if summary.moved == 2));
    let classified = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::ItemClassified { .. }))
        .count();
    assert_eq!(classified, 3);
    assert!(events.contains(&ProgressEvent::ItemSkipped {
        video_id: 13,
        reason: orchestrator::REASON_UNRESOLVED.to_string()
    }));
}

#[tokio::test]
async fn test_logs_in_when_no_stored_session() {
    let fake = library(numbered(2, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness_with(fake, backend, FakeAuthenticator::issuing(session("tok")), None);

    let report = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(h.auth.calls(), 1);
    assert_eq!(report.summary.moved, 2);
}

#[tokio::test]
async fn test_rejected_stored_session_triggers_login() {
    let fake = library(numbered(1, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness_with(
        fake,
        backend,
        FakeAuthenticator::issuing(session("tok")),
        Some(session("stale")),
    );

    let report = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(h.auth.calls(), 1);
    assert_eq!(report.summary.moved, 1);
}

#[tokio::test]
async fn test_failed_login_is_setup_error() {
    let fake = library(numbered(3, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness_with(fake, backend, FakeAuthenticator::failing(), None);

    let err = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap_err();

    assert!(matches!(err, FavError::ChallengeExpired));
    assert_eq!(h.fake.total_move_attempts(), 0);
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn test_cancel_after_two_of_five_moves() {
    let fake = library(numbered(5, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    fake.on_move(move |moved| {
        if moved == 2 {
            trigger.cancel();
        }
    });
    let h = harness(fake, backend);

    let report = h.orchestrator.run(&request(&["Music"]), &cancel).await.unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            MoveStatus::Moved,
            MoveStatus::Moved,
            MoveStatus::NotAttempted,
            MoveStatus::NotAttempted,
            MoveStatus::NotAttempted,
        ]
    );
    assert!(report.cancelled);
    assert_eq!(report.summary.not_attempted, 3);
    assert_eq!(h.fake.total_move_attempts(), 2);
    // Completed moves stay done
    assert_eq!(h.fake.collection_ids(MUSIC), vec![1, 2]);
}

#[tokio::test]
async fn test_rate_limited_move_recovers() {
    let fake = library(numbered(1, "song"));
    fake.fail_move(1, FavError::rate_limited("request too frequent"));
    fake.fail_move(1, FavError::rate_limited("request too frequent"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness(fake, backend);

    let report = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(statuses(&report), vec![MoveStatus::Moved]);
    assert_eq!(h.fake.move_attempts(1), 3);
}

#[tokio::test]
async fn test_paginated_source_of_85_items() {
    let fake = library(numbered(85, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness(fake, backend);

    let report = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 85);
    assert_eq!(report.summary.moved, 85);
    assert_eq!(h.fake.page_requests(), 5);
    assert_eq!(h.backend.calls(), 85);
    let ids: Vec<u64> = report.outcomes.iter().map(|o| o.video_id).collect();
    assert_eq!(ids, (1..=85).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_one_outcome_per_item_with_mixed_failures() {
    let fake = library(numbered(6, "song"));
    fake.fail_move(2, FavError::not_found("target folder gone"));
    fake.fail_move(4, FavError::Api {
        code: -400,
        message: "bad request".to_string(),
    });
    let backend = ScriptedBackend::answering(|req| {
        if req.user.contains("song 5") {
            Ok("Podcasts".to_string())
        } else {
            Ok("Music".to_string())
        }
    });
    let h = harness(fake, backend);

    let report = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            MoveStatus::Moved,
            MoveStatus::Failed,
            MoveStatus::Moved,
            MoveStatus::Failed,
            MoveStatus::Skipped,
            MoveStatus::Moved,
        ]
    );
    let s = report.summary;
    assert_eq!(s.moved + s.skipped + s.failed + s.not_attempted, s.total);
    // NotFound is never retried
    assert_eq!(h.fake.move_attempts(2), 1);
    // No item moved twice
    for id in 1..=6 {
        assert!(h.fake.move_attempts(id) <= 1, "item {} attempted more than once", id);
    }
}

#[tokio::test]
async fn test_answers_outside_targets_never_move() {
    let fake = library(numbered(4, "clip"));
    let backend = ScriptedBackend::answering(|_| Ok("Gaming".to_string()));
    let h = harness(fake, backend);

    let report = h
        .orchestrator
        .run(&request(&["Music", "Cooking"]), &CancelFlag::new())
        .await
        .unwrap();

    assert!(report.outcomes.iter().all(|o| o.status == MoveStatus::Skipped));
    assert_eq!(report.summary.unresolved, 4);
    assert_eq!(h.fake.total_move_attempts(), 0);
}

#[tokio::test]
async fn test_session_expiry_mid_run_relogs_once() {
    let fake = library(numbered(3, "song"));
    fake.accept_token("tok2");
    fake.fail_move(2, FavError::auth("account not logged in"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness_with(
        fake,
        backend,
        FakeAuthenticator::issuing(session("tok2")),
        Some(session("tok")),
    );

    let report = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(h.auth.calls(), 1);
    assert_eq!(statuses(&report), vec![MoveStatus::Moved; 3]);
    assert_eq!(h.fake.move_attempts(2), 2);
}

#[tokio::test]
async fn test_second_session_loss_aborts() {
    let fake = library(numbered(4, "song"));
    fake.accept_token("tok2");
    fake.fail_move(2, FavError::auth("account not logged in"));
    fake.fail_move(2, FavError::auth("account not logged in"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness_with(
        fake,
        backend,
        FakeAuthenticator::issuing(session("tok2")),
        Some(session("tok")),
    );

    let report = h
        .orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            MoveStatus::Moved,
            MoveStatus::Failed,
            MoveStatus::NotAttempted,
            MoveStatus::NotAttempted,
        ]
    );
    assert!(report.aborted.is_some());
    assert!(!report.is_complete());
    assert_eq!(h.auth.calls(), 1);
    assert_eq!(h.fake.move_attempts(3), 0);
}

#[tokio::test]
async fn test_dry_run_moves_nothing() {
    let fake = library(numbered(3, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness(fake, backend);
    let mut req = request(&["Music"]);
    req.dry_run = true;

    let report = h.orchestrator.run(&req, &CancelFlag::new()).await.unwrap();

    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == MoveStatus::Skipped
            && o.reason.as_deref() == Some(orchestrator::REASON_DRY_RUN)
            && o.target_collection_id == Some(MUSIC)));
    assert_eq!(h.fake.total_move_attempts(), 0);
}

#[tokio::test]
async fn test_unresolved_items_go_to_fallback() {
    let fake = library(vec![item(1, "Piano cover", DEFAULT), item(2, "Mystery", DEFAULT)]);
    let backend = ScriptedBackend::by_title(&[("Piano cover", "Music")]);
    let h = harness(fake, backend);
    let mut req = request(&["Music"]);
    req.fallback = Some(CollectionSelector::Title("Unsorted".to_string()));

    let report = h.orchestrator.run(&req, &CancelFlag::new()).await.unwrap();

    assert_eq!(statuses(&report), vec![MoveStatus::Moved, MoveStatus::Moved]);
    assert_eq!(report.outcomes[1].target_collection_id, Some(UNSORTED));
    assert_eq!(report.summary.unresolved, 1);
    assert_eq!(h.fake.collection_ids(UNSORTED), vec![2]);
}

struct Decline;

#[async_trait]
impl MoveConfirmation for Decline {
    async fn confirm(&self, plan: &MovePlan) -> bool {
        assert_eq!(plan.moves.len(), 2);
        false
    }
}

#[tokio::test]
async fn test_declined_plan_is_not_attempted() {
    let fake = library(numbered(2, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness(fake, backend);
    let orchestrator = h.orchestrator.with_confirmation(Arc::new(Decline));

    let report = orchestrator
        .run(&request(&["Music"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(statuses(&report), vec![MoveStatus::NotAttempted; 2]);
    assert!(report.cancelled);
    assert_eq!(h.fake.total_move_attempts(), 0);
}

#[tokio::test]
async fn test_item_already_in_target_is_skipped() {
    let fake = library(numbered(1, "song"));
    let backend = ScriptedBackend::answering(|_| Ok("default".to_string()));
    let h = harness(fake, backend);

    let report = h
        .orchestrator
        .run(&request(&["Music", "Default"]), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(statuses(&report), vec![MoveStatus::Skipped]);
    assert_eq!(
        report.outcomes[0].reason.as_deref(),
        Some(orchestrator::REASON_ALREADY_IN_TARGET)
    );
    assert_eq!(h.fake.total_move_attempts(), 0);
}

#[tokio::test]
async fn test_target_selection_is_validated() {
    let fake = library(numbered(1, "song"));
    fake.add_collection(9, "music", vec![]);
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let h = harness(fake, backend);

    let dup = h
        .orchestrator
        .run(
            &RunRequest {
                targets: vec![CollectionSelector::Id(MUSIC), CollectionSelector::Id(9)],
                ..request(&[])
            },
            &CancelFlag::new(),
        )
        .await;
    assert!(matches!(dup, Err(FavError::Config { .. })));

    let empty = h.orchestrator.run(&request(&[]), &CancelFlag::new()).await;
    assert!(matches!(empty, Err(FavError::Config { .. })));

    let missing = h.orchestrator.run(&request(&["Nope"]), &CancelFlag::new()).await;
    assert!(matches!(missing, Err(FavError::Config { .. })));
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn test_numeric_collection_title_is_selectable() {
    let fake = library(numbered(1, "song"));
    fake.add_collection(555, "2024", vec![]);
    let backend = ScriptedBackend::answering(|_| Ok("2024".to_string()));
    let h = harness(fake, backend);
    let req = RunRequest {
        targets: vec![CollectionSelector::parse("2024")],
        ..request(&[])
    };

    let report = h.orchestrator.run(&req, &CancelFlag::new()).await.unwrap();

    assert_eq!(statuses(&report), vec![MoveStatus::Moved]);
    assert_eq!(report.outcomes[0].target_collection_id, Some(555));
    assert_eq!(h.fake.collection_ids(555), vec![1]);
}

#[tokio::test]
async fn test_cancel_during_classification_retries() {
    let fake = library(numbered(1, "song"));
    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    let backend = ScriptedBackend::answering(move |_| {
        trigger.cancel();
        Err(FavError::network("connection reset"))
    });
    let h = harness(fake, backend);

    let report = h.orchestrator.run(&request(&["Music"]), &cancel).await.unwrap();

    assert_eq!(h.backend.calls(), 1);
    assert_eq!(statuses(&report), vec![MoveStatus::NotAttempted]);
    assert_eq!(report.outcomes[0].reason.as_deref(), Some(REASON_CANCELLED));
    assert_eq!(report.summary.unresolved, 0);
    assert!(report.cancelled);
}

#[tokio::test]
async fn test_cancel_during_relogin_stops_moves() {
    let fake = library(numbered(3, "song"));
    fake.fail_move(2, FavError::auth("account not logged in"));
    let backend = ScriptedBackend::answering(|_| Ok("Music".to_string()));
    let cancel = CancelFlag::new();
    let h = harness_with(
        fake,
        backend,
        FakeAuthenticator::cancelled_by(cancel.clone()),
        Some(session("tok")),
    );

    let report = h.orchestrator.run(&request(&["Music"]), &cancel).await.unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            MoveStatus::Moved,
            MoveStatus::NotAttempted,
            MoveStatus::NotAttempted,
        ]
    );
    assert!(report
        .outcomes
        .iter()
        .skip(1)
        .all(|o| o.reason.as_deref() == Some(REASON_CANCELLED)));
    assert!(report.cancelled);
    assert!(report.aborted.is_none());
    assert_eq!(h.fake.move_attempts(3), 0);
}
