//! Session lifecycle operations and the session query surface.
//!
//! Transition legality and publish readiness are advisory everywhere except
//! [`BuilderService::transition`] and [`BuilderService::finalize`]. In
//! particular [`BuilderService::update`] accepts any patch, including a
//! `currentState` the workflow would not allow; callers consult
//! [`SessionView::can_transition_to`] first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::BuilderSettings;
use crate::digest::{DigestRef, DigestRequest, DigestService};
use crate::error::{BuilderError, BuilderResult};
use crate::identity::{CurrentUser, IdentityProvider};
use crate::model::{
    AutoSaveConfig, BuilderSession, Collaborator, PublishReadiness, SessionPatch, SessionVersion,
    WorkflowState,
};
use crate::normalize::normalize;
use crate::store::{merge_fields, RecordStore};
use crate::view::SessionView;

/// Status the digest service receives for finalized sessions.
pub const FINALIZED_DIGEST_STATUS: &str = "published";

/// Presence heartbeat from one collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub user_id: String,
    pub username: String,
    pub section: Option<String>,
    /// Lock `section` for this collaborator; ignored when `section` is `None`.
    pub lock: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub digest: DigestRef,
    pub session: SessionView,
}

pub struct BuilderService {
    store: Arc<dyn RecordStore>,
    identity: Arc<dyn IdentityProvider>,
    digests: Arc<dyn DigestService>,
    settings: BuilderSettings,
}

impl BuilderService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        identity: Arc<dyn IdentityProvider>,
        digests: Arc<dyn DigestService>,
        settings: BuilderSettings,
    ) -> Self {
        Self {
            store,
            identity,
            digests,
            settings,
        }
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    fn project(&self, session: BuilderSession) -> SessionView {
        SessionView::project(session, &self.settings, Utc::now())
    }

    async fn require_user(&self) -> BuilderResult<CurrentUser> {
        self.identity
            .current_user()
            .await
            .map_err(BuilderError::Identity)?
            .ok_or(BuilderError::Authorization)
    }

    async fn load(&self, id: &str) -> BuilderResult<BuilderSession> {
        let record = self
            .store
            .find_by_id(id)
            .await
            .map_err(BuilderError::Persistence)?;
        record
            .as_ref()
            .and_then(normalize)
            .ok_or_else(|| BuilderError::NotFound { id: id.to_string() })
    }

    /// Persist `fields` on top of `current` and return the re-read session.
    async fn apply(
        &self,
        current: BuilderSession,
        mut fields: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> BuilderResult<SessionView> {
        let id = current.id.clone();
        fields.insert("updatedAt".into(), json!(now));
        let mut local = current
            .to_record()
            .map_err(|err| BuilderError::Persistence(err.into()))?;
        merge_fields(&mut local, &fields);

        self.store
            .update(&id, &fields)
            .await
            .map_err(BuilderError::Persistence)?;

        // The store may lag behind its own write; fall back to the local merge.
        let reread = match self.store.find_by_id(&id).await {
            Ok(record) => record.as_ref().and_then(normalize),
            Err(err) => {
                warn!(?err, id = %id, "re-read after write failed; using merged record");
                None
            }
        };
        let session = reread
            .or_else(|| normalize(&local))
            .ok_or(BuilderError::NotFound { id })?;
        Ok(self.project(session))
    }

    /// Start a new builder session for the signed-in user.
    #[instrument(skip_all)]
    pub async fn create(&self) -> BuilderResult<SessionView> {
        let user = self.require_user().await?;
        let now = Utc::now();
        let session = BuilderSession {
            id: Uuid::new_v4().to_string(),
            session_id: format!("builder-{}", Uuid::new_v4().simple()),
            user_id: user.id,
            current_state: WorkflowState::Selecting,
            auto_save_config: AutoSaveConfig {
                enabled: true,
                interval_seconds: self.settings.autosave_interval_seconds,
                max_versions: self.settings.max_versions,
            },
            created_at: now,
            updated_at: now,
            ..Default::default()
        };
        let record = session
            .to_record()
            .map_err(|err| BuilderError::Persistence(err.into()))?;
        self.store
            .create(&record)
            .await
            .map_err(BuilderError::Persistence)?;
        info!(id = %session.id, user_id = %session.user_id, "builder session created");
        Ok(self.project(session))
    }

    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn get(&self, id: &str) -> BuilderResult<SessionView> {
        let session = self.load(id).await?;
        Ok(self.project(session))
    }

    /// Sessions of `user_id` updated within the inactivity window, newest first.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn list_active(&self, user_id: &str) -> BuilderResult<Vec<SessionView>> {
        let now = Utc::now();
        let cutoff = now - self.settings.inactivity_window;
        let records = self
            .store
            .list_for_user(user_id, cutoff)
            .await
            .map_err(BuilderError::Persistence)?;
        let mut sessions: Vec<BuilderSession> = records
            .iter()
            .filter_map(normalize)
            .filter(|s| s.user_id == user_id && s.updated_at >= cutoff)
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions
            .into_iter()
            .map(|s| SessionView::project(s, &self.settings, now))
            .collect())
    }

    /// Merge `patch` into the session without checking workflow legality.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn update(&self, id: &str, patch: &SessionPatch) -> BuilderResult<SessionView> {
        let current = self.load(id).await?;
        self.apply(current, patch.to_fields(), Utc::now()).await
    }

    /// Update that also stamps `lastSavedAt` and keeps the delta as a version.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn autosave(&self, id: &str, patch: &SessionPatch) -> BuilderResult<SessionView> {
        let current = self.load(id).await?;
        let now = Utc::now();
        let saved_at = current.last_saved_at.map_or(now, |prev| prev.max(now));
        let delta = patch.to_fields();
        let max_versions = patch
            .auto_save_config
            .as_ref()
            .unwrap_or(&current.auto_save_config)
            .max_versions;

        let mut fields = delta.clone();
        fields.insert("lastSavedAt".into(), json!(saved_at));
        let view = self.apply(current, fields, now).await?;

        // History only follows a save that landed; a lost entry does not undo it.
        let version = SessionVersion {
            session_id: view.session.id.clone(),
            saved_at,
            delta,
        };
        if let Err(err) = self.store.record_version(&version, max_versions).await {
            warn!(?err, "session saved but version history not recorded");
        }
        info!(
            changed = version.delta.len(),
            saved_at = %saved_at,
            "session autosaved"
        );
        Ok(view)
    }

    /// Autosave history, oldest first.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn history(&self, id: &str) -> BuilderResult<Vec<SessionVersion>> {
        let session = self.load(id).await?;
        self.store
            .versions(&session.id)
            .await
            .map_err(BuilderError::Persistence)
    }

    /// Move to `target` only when the workflow table allows it.
    #[instrument(skip_all, fields(session_id = %id, target = %target))]
    pub async fn transition(&self, id: &str, target: WorkflowState) -> BuilderResult<SessionView> {
        let current = self.load(id).await?;
        let from = current.current_state;
        if !from.can_transition_to(target) {
            return Err(BuilderError::IllegalTransition { from, to: target });
        }
        let patch = SessionPatch {
            current_state: Some(target),
            ..Default::default()
        };
        self.apply(current, patch.to_fields(), Utc::now()).await
    }

    /// Upsert the presence record for `presence.user_id`.
    ///
    /// Claims are recorded as reported; overlapping sections surface through
    /// the view's collaboration status rather than being rejected.
    #[instrument(skip_all, fields(session_id = %id, user_id = %presence.user_id))]
    pub async fn record_presence(
        &self,
        id: &str,
        presence: &PresenceUpdate,
    ) -> BuilderResult<SessionView> {
        let current = self.load(id).await?;
        let now = Utc::now();
        let mut collaborators = current.collaboration_data.clone();
        let locks = match (&presence.section, presence.lock) {
            (Some(section), true) => vec![section.clone()],
            _ => Vec::new(),
        };
        let record = Collaborator {
            user_id: presence.user_id.clone(),
            username: presence.username.clone(),
            current_section: presence.section.clone(),
            last_activity: now,
            locks,
        };
        match collaborators
            .iter_mut()
            .find(|c| c.user_id == presence.user_id)
        {
            Some(existing) => *existing = record,
            None => collaborators.push(record),
        }
        let patch = SessionPatch {
            collaboration_data: Some(collaborators),
            ..Default::default()
        };
        self.apply(current, patch.to_fields(), now).await
    }

    /// Hand the session's blocks and layout to the digest service and mark
    /// the session published. Nothing is written when a precondition fails.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn finalize(&self, id: &str, title: Option<&str>) -> BuilderResult<FinalizeOutcome> {
        let user = self.require_user().await?;
        let current = self.load(id).await?;
        let view = self.project(current.clone());
        if !view.is_ready_to_publish() {
            warn!(blockers = ?view.quality.blockers, "finalize rejected");
            return Err(BuilderError::Precondition {
                id: id.to_string(),
                blockers: view.quality.blockers,
            });
        }

        let now = Utc::now();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Digest {}", now.format("%Y-%m-%d")));
        let request = DigestRequest {
            title,
            content_blocks: current.content_blocks.clone(),
            layout_config: current.layout_config.clone(),
            styling_options: current.styling_applied.clone(),
            status: FINALIZED_DIGEST_STATUS.to_string(),
        };
        let digest = self
            .digests
            .create_digest(&request)
            .await
            .map_err(BuilderError::Digest)?;

        let mut fields = SessionPatch {
            current_state: Some(WorkflowState::Publishing),
            publish_readiness: Some(PublishReadiness::Completed),
            ..Default::default()
        }
        .to_fields();
        fields.insert("digestId".into(), json!(digest.id));

        let session = match self.apply(current, fields, now).await {
            Ok(session) => session,
            Err(err) => {
                warn!(?err, digest_id = %digest.id, "digest created but session not linked");
                return Err(err);
            }
        };
        info!(digest_id = %digest.id, user_id = %user.id, "session finalized");
        Ok(FinalizeOutcome { digest, session })
    }
}
