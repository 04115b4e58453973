use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use digest_builder::config::BuilderSettings;
use digest_builder::digest::{DigestRef, DigestRequest, DigestService};
use digest_builder::identity::{CurrentUser, StaticIdentity};
use digest_builder::model::{
    PublishReadiness, SessionPatch, SessionVersion, ValidationResults, WorkflowState,
};
use digest_builder::quality::PublishBlocker;
use digest_builder::service::{BuilderService, PresenceUpdate};
use digest_builder::store::{MemoryStore, RecordStore};
use digest_builder::BuilderError;

#[derive(Clone, Default)]
struct RecordingDigests {
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
    calls: Arc<Mutex<Vec<DigestRequest>>>,
}

impl RecordingDigests {
    fn with_responses(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<DigestRequest> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl DigestService for RecordingDigests {
    async fn create_digest(&self, request: &DigestRequest) -> Result<DigestRef> {
        self.calls.lock().await.push(request.clone());
        let id = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok("digest-id".into()))?;
        Ok(DigestRef { id })
    }
}

/// Store whose writes always fail; reads delegate to an inner store.
struct ReadOnlyStore(MemoryStore);

#[async_trait]
impl RecordStore for ReadOnlyStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        self.0.find_by_id(id).await
    }
    async fn create(&self, _record: &Value) -> Result<()> {
        Err(anyhow!("disk full"))
    }
    async fn update(&self, _id: &str, _fields: &Map<String, Value>) -> Result<()> {
        Err(anyhow!("disk full"))
    }
    async fn list_for_user(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Value>> {
        self.0.list_for_user(user_id, since).await
    }
    async fn record_version(&self, _v: &SessionVersion, _max: u32) -> Result<()> {
        Err(anyhow!("disk full"))
    }
    async fn versions(&self, session_id: &str) -> Result<Vec<SessionVersion>> {
        self.0.versions(session_id).await
    }
}

/// Delegates to a memory store but rejects either record updates or history
/// writes.
struct FlakyStore {
    inner: MemoryStore,
    reject_updates: bool,
    reject_versions: bool,
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        self.inner.find_by_id(id).await
    }
    async fn create(&self, record: &Value) -> Result<()> {
        self.inner.create(record).await
    }
    async fn update(&self, id: &str, fields: &Map<String, Value>) -> Result<()> {
        if self.reject_updates {
            return Err(anyhow!("disk full"));
        }
        self.inner.update(id, fields).await
    }
    async fn list_for_user(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Value>> {
        self.inner.list_for_user(user_id, since).await
    }
    async fn record_version(&self, version: &SessionVersion, max: u32) -> Result<()> {
        if self.reject_versions {
            return Err(anyhow!("history table locked"));
        }
        self.inner.record_version(version, max).await
    }
    async fn versions(&self, session_id: &str) -> Result<Vec<SessionVersion>> {
        self.inner.versions(session_id).await
    }
}

fn service_with(store: Arc<dyn RecordStore>, digests: RecordingDigests) -> BuilderService {
    BuilderService::new(
        store,
        Arc::new(StaticIdentity::signed_in(CurrentUser::new("editor-1"))),
        Arc::new(digests),
        BuilderSettings::default(),
    )
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn publishable_patch() -> SessionPatch {
    let content = ids(&["c1", "c2", "c3", "c4", "c5"]);
    SessionPatch {
        selected_content: Some(content.clone()),
        content_order: Some(content),
        layout_config: Some(serde_json::from_value(json!({"templateId": "modern"})).unwrap()),
        validation_results: Some(ValidationResults {
            valid: true,
            errors: vec![],
            warnings: vec![],
        }),
        publish_readiness: Some(PublishReadiness::Ready),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_starts_in_selecting_with_empty_content() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone(), RecordingDigests::default());

    let view = service.create().await.unwrap();
    assert_eq!(view.state(), WorkflowState::Selecting);
    assert_eq!(view.session.user_id, "editor-1");
    assert!(view.session.selected_content.is_empty());
    assert!(view.session.content_order.is_empty());
    assert_eq!(view.session.auto_save_config.interval_seconds, 30);
    assert_eq!(view.state_progress(), 1);
    assert_eq!(view.completion_percent(), 25);
    assert_eq!(view.quality_score(), 0);
    assert!(store.find_by_id(view.id()).await.unwrap().is_some());
}

#[tokio::test]
async fn create_requires_a_user() {
    let service = BuilderService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticIdentity::anonymous()),
        Arc::new(RecordingDigests::default()),
        BuilderSettings::default(),
    );
    assert!(matches!(
        service.create().await,
        Err(BuilderError::Authorization)
    ));
}

#[tokio::test]
async fn end_to_end_publish() {
    let digests = RecordingDigests::with_responses(vec![Ok("digest-42".into())]);
    let service = service_with(Arc::new(MemoryStore::new()), digests.clone());

    let created = service.create().await.unwrap();
    let view = service.update(created.id(), &publishable_patch()).await.unwrap();

    assert!(view.content.content_is_ordered);
    assert!(view.layout.has_valid_layout);
    assert!(view.quality.is_validated);
    assert!(view.is_ready_to_publish());
    assert!(view.quality_score() >= 60, "score {}", view.quality_score());

    let outcome = service
        .finalize(created.id(), Some("Weekly roundup"))
        .await
        .unwrap();
    assert_eq!(outcome.digest.id, "digest-42");
    assert_eq!(outcome.session.state(), WorkflowState::Publishing);
    assert_eq!(
        outcome.session.session.publish_readiness,
        PublishReadiness::Completed
    );
    assert_eq!(outcome.session.session.digest_id.as_deref(), Some("digest-42"));

    let calls = digests.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].title, "Weekly roundup");
    assert_eq!(calls[0].layout_config.template_id.as_deref(), Some("modern"));
    assert_eq!(calls[0].status, "published");

    let stored = service.get(created.id()).await.unwrap();
    assert_eq!(stored.session.digest_id.as_deref(), Some("digest-42"));
    assert!(stored.activity.is_published);
}

#[tokio::test]
async fn finalize_reports_each_failed_precondition() {
    let digests = RecordingDigests::default();
    let service = service_with(Arc::new(MemoryStore::new()), digests.clone());
    let created = service.create().await.unwrap();

    let mut patch = publishable_patch();
    patch.publish_readiness = Some(PublishReadiness::NotReady);
    patch.validation_results = Some(ValidationResults {
        valid: false,
        errors: vec!["missing intro".into()],
        warnings: vec![],
    });
    service.update(created.id(), &patch).await.unwrap();

    let err = service.finalize(created.id(), None).await.unwrap_err();
    match &err {
        BuilderError::Precondition { blockers, .. } => {
            assert_eq!(
                blockers,
                &vec![
                    PublishBlocker::ValidationFailed {
                        errors: vec!["missing intro".into()]
                    },
                    PublishBlocker::NotMarkedReady {
                        readiness: PublishReadiness::NotReady
                    },
                ]
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(digests.calls().await.is_empty());

    let unchanged = service.get(created.id()).await.unwrap();
    assert_eq!(unchanged.state(), WorkflowState::Selecting);
    assert!(unchanged.session.digest_id.is_none());
}

#[tokio::test]
async fn finalize_twice_is_rejected() {
    let digests = RecordingDigests::default();
    let service = service_with(Arc::new(MemoryStore::new()), digests.clone());
    let created = service.create().await.unwrap();
    service.update(created.id(), &publishable_patch()).await.unwrap();

    service.finalize(created.id(), None).await.unwrap();
    let err = service.finalize(created.id(), None).await.unwrap_err();
    assert_eq!(
        err.blockers(),
        &[PublishBlocker::NotMarkedReady {
            readiness: PublishReadiness::Completed
        }]
    );
    assert_eq!(digests.calls().await.len(), 1);
}

#[tokio::test]
async fn digest_failure_leaves_session_untouched() {
    let digests = RecordingDigests::with_responses(vec![Err(anyhow!("503 from digest service"))]);
    let service = service_with(Arc::new(MemoryStore::new()), digests);
    let created = service.create().await.unwrap();
    service.update(created.id(), &publishable_patch()).await.unwrap();

    let err = service.finalize(created.id(), None).await.unwrap_err();
    assert!(matches!(err, BuilderError::Digest(_)));
    let view = service.get(created.id()).await.unwrap();
    assert_eq!(view.session.publish_readiness, PublishReadiness::Ready);
    assert!(view.session.digest_id.is_none());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let service = service_with(Arc::new(MemoryStore::new()), RecordingDigests::default());
    let patch = SessionPatch::default();
    assert!(matches!(
        service.update("nope", &patch).await,
        Err(BuilderError::NotFound { .. })
    ));
    assert!(matches!(
        service.autosave("nope", &patch).await,
        Err(BuilderError::NotFound { .. })
    ));
    assert!(matches!(
        service.finalize("nope", None).await,
        Err(BuilderError::NotFound { .. })
    ));
}

#[tokio::test]
async fn update_is_permissive_but_transition_is_checked() {
    let service = service_with(Arc::new(MemoryStore::new()), RecordingDigests::default());
    let created = service.create().await.unwrap();

    let err = service
        .transition(created.id(), WorkflowState::Previewing)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BuilderError::IllegalTransition {
            from: WorkflowState::Selecting,
            to: WorkflowState::Previewing
        }
    ));

    let moved = service
        .transition(created.id(), WorkflowState::Arranging)
        .await
        .unwrap();
    assert_eq!(moved.state(), WorkflowState::Arranging);

    // Plain updates skip the transition table.
    let skipped = service
        .update(
            created.id(),
            &SessionPatch {
                current_state: Some(WorkflowState::Publishing),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(skipped.state(), WorkflowState::Publishing);
}

#[tokio::test]
async fn autosave_stamps_save_time_and_keeps_history() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone(), RecordingDigests::default());
    let created = service.create().await.unwrap();
    assert!(created.save.needs_save);

    let first = service
        .autosave(
            created.id(),
            &SessionPatch {
                selected_content: Some(ids(&["a"])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let first_saved = first.session.last_saved_at.expect("saved");
    assert!(!first.save.needs_save);
    assert!(!first.save.has_unsaved_changes);
    assert_eq!(first.save.last_saved_minutes_ago, Some(0));

    let second = service
        .autosave(
            created.id(),
            &SessionPatch {
                content_order: Some(ids(&["a"])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(second.session.last_saved_at.unwrap() >= first_saved);
    assert_eq!(second.session.selected_content, ids(&["a"]));

    let history = service.history(created.id()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].delta.contains_key("selectedContent"));
    assert!(history[1].delta.contains_key("contentOrder"));
}

#[tokio::test]
async fn last_saved_at_never_moves_backward() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone(), RecordingDigests::default());
    let created = service.create().await.unwrap();

    let future = Utc::now() + Duration::hours(1);
    let mut fields = Map::new();
    fields.insert("lastSavedAt".into(), json!(future));
    store.update(created.id(), &fields).await.unwrap();

    let view = service
        .autosave(created.id(), &SessionPatch::default())
        .await
        .unwrap();
    assert_eq!(view.session.last_saved_at, Some(future));
}

#[tokio::test]
async fn history_is_capped_by_max_versions() {
    let service = service_with(Arc::new(MemoryStore::new()), RecordingDigests::default());
    let created = service.create().await.unwrap();
    let mut cfg = created.session.auto_save_config.clone();
    cfg.max_versions = 2;
    service
        .update(
            created.id(),
            &SessionPatch {
                auto_save_config: Some(cfg),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for n in 0..4 {
        service
            .autosave(
                created.id(),
                &SessionPatch {
                    test_recipients: Some(vec![format!("r{n}@example.com")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    let history = service.history(created.id()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].delta["testRecipients"], json!(["r3@example.com"]));
}

#[tokio::test]
async fn presence_conflicts_are_detected_not_prevented() {
    let service = service_with(Arc::new(MemoryStore::new()), RecordingDigests::default());
    let created = service.create().await.unwrap();

    service
        .record_presence(
            created.id(),
            &PresenceUpdate {
                user_id: "editor-1".into(),
                username: "ann".into(),
                section: Some("intro".into()),
                lock: true,
            },
        )
        .await
        .unwrap();
    let view = service
        .record_presence(
            created.id(),
            &PresenceUpdate {
                user_id: "editor-2".into(),
                username: "bob".into(),
                section: Some("intro".into()),
                lock: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(view.collaboration.collaborator_count, 2);
    assert_eq!(view.collaboration.active_count, 2);
    assert!(view.collaboration.has_section_conflict);
    assert_eq!(view.collaboration.locked_sections, ids(&["intro"]));
    assert!(view.can_edit_section("intro", "editor-1"));
    assert!(!view.can_edit_section("intro", "editor-2"));

    // Moving on releases the lock and clears the conflict.
    let view = service
        .record_presence(
            created.id(),
            &PresenceUpdate {
                user_id: "editor-1".into(),
                username: "ann".into(),
                section: Some("outro".into()),
                lock: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(view.collaboration.collaborator_count, 2);
    assert!(!view.collaboration.has_conflicts);
    assert!(view.collaboration.locked_sections.is_empty());
}

#[tokio::test]
async fn list_active_filters_by_user_and_window() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone(), RecordingDigests::default());
    let recent = service.create().await.unwrap();
    let stale = service.create().await.unwrap();

    let mut fields = Map::new();
    fields.insert("updatedAt".into(), json!(Utc::now() - Duration::hours(9)));
    store.update(stale.id(), &fields).await.unwrap();

    store
        .create(&json!({"id": "other", "userId": "editor-2", "updatedAt": Utc::now()}))
        .await
        .unwrap();

    let active = service.list_active("editor-1").await.unwrap();
    let active_ids: Vec<&str> = active.iter().map(|v| v.id()).collect();
    assert_eq!(active_ids, vec![recent.id()]);
}

#[tokio::test]
async fn persistence_failures_surface() {
    let inner = MemoryStore::new();
    inner
        .create(&json!({"id": "s1", "userId": "editor-1", "publishReadiness": "ready",
                        "validationResults": {"valid": true}}))
        .await
        .unwrap();
    let digests = RecordingDigests::default();
    let service = service_with(Arc::new(ReadOnlyStore(inner)), digests.clone());

    assert!(matches!(
        service.create().await,
        Err(BuilderError::Persistence(_))
    ));
    assert!(matches!(
        service.update("s1", &SessionPatch::default()).await,
        Err(BuilderError::Persistence(_))
    ));
    assert!(matches!(
        service.autosave("s1", &SessionPatch::default()).await,
        Err(BuilderError::Persistence(_))
    ));
    assert!(matches!(
        service.finalize("s1", None).await,
        Err(BuilderError::Persistence(_))
    ));
    // The digest was created before the link write failed.
    assert_eq!(digests.calls().await.len(), 1);
}

#[tokio::test]
async fn failed_autosave_leaves_no_history() {
    let inner = MemoryStore::new();
    inner
        .create(&json!({"id": "s1", "userId": "editor-1"}))
        .await
        .unwrap();
    let store = Arc::new(FlakyStore {
        inner,
        reject_updates: true,
        reject_versions: false,
    });
    let service = service_with(store, RecordingDigests::default());

    let patch = SessionPatch {
        selected_content: Some(ids(&["a"])),
        ..Default::default()
    };
    assert!(matches!(
        service.autosave("s1", &patch).await,
        Err(BuilderError::Persistence(_))
    ));
    assert!(service.history("s1").await.unwrap().is_empty());
    let session = service.get("s1").await.unwrap().session;
    assert!(session.last_saved_at.is_none());
    assert!(session.selected_content.is_empty());
}

#[tokio::test]
async fn autosave_survives_history_write_failure() {
    let inner = MemoryStore::new();
    inner
        .create(&json!({"id": "s1", "userId": "editor-1"}))
        .await
        .unwrap();
    let store = Arc::new(FlakyStore {
        inner,
        reject_updates: false,
        reject_versions: true,
    });
    let service = service_with(store, RecordingDigests::default());

    let view = service
        .autosave(
            "s1",
            &SessionPatch {
                selected_content: Some(ids(&["a"])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(view.session.last_saved_at.is_some());
    assert_eq!(view.session.selected_content, ids(&["a"]));
    assert!(service.history("s1").await.unwrap().is_empty());
}
