//! Read-only projection over a canonical session.
//!
//! A [`SessionView`] is computed once from a snapshot of the record and never
//! changes afterwards; take a new projection to observe newer data.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::collaboration::{self, CollaborationStatus};
use crate::config::BuilderSettings;
use crate::model::{BuilderSession, PublishReadiness, WorkflowState};
use crate::quality::{QualityInputs, QualityRating, QualityReport};
use crate::workflow::{AdvanceSignals, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentStatus {
    pub selected_count: usize,
    pub unique_selected_count: usize,
    pub has_duplicate_selection: bool,
    pub ordered_count: usize,
    pub has_content: bool,
    pub missing_content_count: usize,
    pub content_is_ordered: bool,
    /// Selected but not yet placed in the display order.
    pub unordered_ids: Vec<String>,
    /// Placed in the display order without being selected.
    pub orphaned_order_ids: Vec<String>,
    pub block_count: usize,
    pub has_blocks: bool,
}

impl ContentStatus {
    fn evaluate(session: &BuilderSession) -> Self {
        let selected = &session.selected_content;
        let order = &session.content_order;
        let selected_set: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let order_set: HashSet<&str> = order.iter().map(String::as_str).collect();
        let missing = selected.len().saturating_sub(order.len());

        Self {
            selected_count: selected.len(),
            unique_selected_count: selected_set.len(),
            has_duplicate_selection: selected_set.len() < selected.len(),
            ordered_count: order.len(),
            has_content: !selected.is_empty(),
            missing_content_count: missing,
            content_is_ordered: missing == 0,
            unordered_ids: selected
                .iter()
                .filter(|id| !order_set.contains(id.as_str()))
                .cloned()
                .collect(),
            orphaned_order_ids: order
                .iter()
                .filter(|id| !selected_set.contains(id.as_str()))
                .cloned()
                .collect(),
            block_count: session.content_blocks.len(),
            has_blocks: !session.content_blocks.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutStatus {
    pub template_id: Option<String>,
    pub has_template: bool,
    pub has_valid_layout: bool,
    pub layout_setting_count: usize,
    pub has_custom_styling: bool,
    pub styling_rule_count: usize,
}

impl LayoutStatus {
    fn evaluate(session: &BuilderSession, content: &ContentStatus) -> Self {
        let template_id = session
            .layout_config
            .template_id
            .clone()
            .filter(|t| !t.trim().is_empty());
        let has_template = template_id.is_some();
        Self {
            has_valid_layout: has_template && content.content_is_ordered,
            has_template,
            template_id,
            layout_setting_count: session.layout_config.settings.len(),
            has_custom_styling: !session.styling_applied.is_empty(),
            styling_rule_count: session.styling_applied.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveStatus {
    pub auto_save_enabled: bool,
    pub auto_save_interval_seconds: u32,
    pub max_versions: u32,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub has_been_saved: bool,
    pub last_saved_minutes_ago: Option<i64>,
    pub needs_save: bool,
    pub has_unsaved_changes: bool,
    pub next_auto_save_at: Option<DateTime<Utc>>,
    pub auto_save_due: bool,
}

impl SaveStatus {
    fn evaluate(session: &BuilderSession, settings: &BuilderSettings, now: DateTime<Utc>) -> Self {
        let cfg = &session.auto_save_config;
        let last = session.last_saved_at;
        let elapsed = last.map(|at| now.signed_duration_since(at));
        let next_auto_save_at = match (cfg.enabled, last) {
            // Saves stamped at the edge of the calendar have no representable next slot.
            (true, Some(at)) => {
                at.checked_add_signed(Duration::seconds(i64::from(cfg.interval_seconds)))
            }
            _ => None,
        };
        let has_unsaved_changes = match last {
            Some(at) => session.updated_at > at,
            None => true,
        };

        Self {
            auto_save_enabled: cfg.enabled,
            auto_save_interval_seconds: cfg.interval_seconds,
            max_versions: cfg.max_versions,
            last_saved_at: last,
            has_been_saved: last.is_some(),
            last_saved_minutes_ago: elapsed.map(|d| d.num_minutes()),
            needs_save: elapsed.map_or(true, |d| d >= settings.save_stale_after),
            has_unsaved_changes,
            auto_save_due: cfg.enabled
                && has_unsaved_changes
                && next_auto_save_at.map_or(true, |due| now >= due),
            next_auto_save_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationStatus {
    pub is_validated: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub has_errors: bool,
    pub has_warnings: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewStatus {
    pub device: String,
    pub dark_mode: bool,
    pub test_recipient_count: usize,
    pub has_test_recipients: bool,
    pub can_preview: bool,
    pub can_send_test: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityStatus {
    pub session_age_minutes: i64,
    pub minutes_since_update: i64,
    pub is_active: bool,
    pub is_published: bool,
    pub has_digest: bool,
}

/// Immutable projection of a session with every derived property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session: BuilderSession,
    pub computed_at: DateTime<Utc>,
    pub workflow: WorkflowStatus,
    pub content: ContentStatus,
    pub layout: LayoutStatus,
    pub save: SaveStatus,
    pub validation: ValidationStatus,
    pub collaboration: CollaborationStatus,
    pub preview: PreviewStatus,
    pub quality: QualityReport,
    pub activity: ActivityStatus,
}

impl SessionView {
    pub fn project(session: BuilderSession, settings: &BuilderSettings, now: DateTime<Utc>) -> Self {
        let content = ContentStatus::evaluate(&session);
        let layout = LayoutStatus::evaluate(&session, &content);
        let save = SaveStatus::evaluate(&session, settings, now);

        let results = &session.validation_results;
        let validation = ValidationStatus {
            is_validated: results.valid,
            error_count: results.errors.len(),
            warning_count: results.warnings.len(),
            has_errors: !results.errors.is_empty(),
            has_warnings: !results.warnings.is_empty(),
        };

        let collaboration =
            CollaborationStatus::evaluate(&session.collaboration_data, now, settings.presence_window);

        let can_preview = content.has_content && layout.has_valid_layout;
        let preview = PreviewStatus {
            device: session.preview_settings.device.clone(),
            dark_mode: session.preview_settings.dark_mode,
            test_recipient_count: session.test_recipients.len(),
            has_test_recipients: !session.test_recipients.is_empty(),
            can_preview,
            can_send_test: can_preview && !session.test_recipients.is_empty(),
        };

        let inputs = QualityInputs {
            selected_count: content.selected_count,
            has_content: content.has_content,
            content_is_ordered: content.content_is_ordered,
            has_valid_layout: layout.has_valid_layout,
            has_custom_styling: layout.has_custom_styling,
            has_blocks: content.has_blocks,
            is_validated: validation.is_validated,
            warning_count: validation.warning_count,
            has_conflicts: collaboration.has_conflicts,
            auto_save_enabled: save.auto_save_enabled,
            has_unsaved_changes: save.has_unsaved_changes,
            can_preview: preview.can_preview,
            has_test_recipients: preview.has_test_recipients,
            can_send_test: preview.can_send_test,
        };
        let quality = QualityReport::assess(&inputs, session.publish_readiness, results);

        let workflow = WorkflowStatus::evaluate(
            session.current_state,
            &AdvanceSignals {
                has_content: content.has_content,
                has_valid_layout: layout.has_valid_layout,
                is_validated: validation.is_validated,
                is_ready_to_publish: quality.is_ready_to_publish,
            },
        );

        let since_update = now.signed_duration_since(session.updated_at);
        let activity = ActivityStatus {
            session_age_minutes: now.signed_duration_since(session.created_at).num_minutes(),
            minutes_since_update: since_update.num_minutes(),
            is_active: since_update <= settings.inactivity_window,
            is_published: session.publish_readiness == PublishReadiness::Completed,
            has_digest: session.digest_id.is_some(),
        };

        Self {
            session,
            computed_at: now,
            workflow,
            content,
            layout,
            save,
            validation,
            collaboration,
            preview,
            quality,
            activity,
        }
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn state(&self) -> WorkflowState {
        self.session.current_state
    }

    pub fn state_progress(&self) -> u8 {
        self.workflow.state_progress
    }

    pub fn completion_percent(&self) -> u8 {
        self.workflow.completion_percent
    }

    pub fn quality_score(&self) -> u8 {
        self.quality.score
    }

    pub fn quality_rating(&self) -> QualityRating {
        self.quality.rating
    }

    pub fn is_ready_to_publish(&self) -> bool {
        self.quality.is_ready_to_publish
    }

    pub fn can_advance(&self) -> bool {
        self.workflow.can_advance
    }

    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        self.session.current_state.can_transition_to(target)
    }

    pub fn can_edit_section(&self, section: &str, user_id: &str) -> bool {
        collaboration::can_edit_section(&self.session.collaboration_data, section, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collaborator, ContentBlock, ValidationResults};
    use serde_json::{json, Map};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn session() -> BuilderSession {
        BuilderSession {
            id: "s1".into(),
            session_id: "builder-s1".into(),
            user_id: "u1".into(),
            created_at: now() - Duration::hours(1),
            updated_at: now() - Duration::minutes(10),
            ..Default::default()
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn project(s: BuilderSession) -> SessionView {
        SessionView::project(s, &BuilderSettings::default(), now())
    }

    #[test]
    fn progress_tracks_state() {
        for state in WorkflowState::ALL {
            let mut s = session();
            s.current_state = state;
            let view = project(s);
            assert_eq!(view.state_progress(), state.progress());
            assert_eq!(view.completion_percent(), view.state_progress() * 25);
        }
    }

    #[test]
    fn missing_content_is_reported_not_enforced() {
        let mut s = session();
        s.selected_content = ids(&["a", "b", "c"]);
        s.content_order = ids(&["b"]);
        let view = project(s);
        assert!(view.content.has_content);
        assert_eq!(view.content.missing_content_count, 2);
        assert!(!view.content.content_is_ordered);
        assert_eq!(view.content.unordered_ids, ids(&["a", "c"]));

        let mut s = session();
        s.selected_content = ids(&["a"]);
        s.content_order = ids(&["a", "x"]);
        let view = project(s);
        assert_eq!(view.content.missing_content_count, 0);
        assert!(view.content.content_is_ordered);
        assert_eq!(view.content.orphaned_order_ids, ids(&["x"]));
    }

    #[test]
    fn duplicates_are_tolerated() {
        let mut s = session();
        s.selected_content = ids(&["a", "a"]);
        s.content_order = ids(&["a"]);
        let view = project(s);
        assert!(view.content.has_duplicate_selection);
        assert_eq!(view.content.unique_selected_count, 1);
        assert_eq!(view.content.missing_content_count, 1);
    }

    #[test]
    fn valid_layout_needs_template_and_order() {
        let mut s = session();
        s.selected_content = ids(&["a", "b"]);
        s.content_order = ids(&["a"]);
        s.layout_config.template_id = Some("modern".into());
        assert!(!project(s.clone()).layout.has_valid_layout);

        s.content_order = ids(&["a", "b"]);
        assert!(project(s.clone()).layout.has_valid_layout);

        s.layout_config.template_id = Some("  ".into());
        assert!(!project(s).layout.has_valid_layout);
    }

    #[test]
    fn never_saved_session_needs_save() {
        let view = project(session());
        assert!(view.save.needs_save);
        assert!(!view.save.has_been_saved);
        assert!(view.save.last_saved_minutes_ago.is_none());
        assert!(view.save.auto_save_due);
    }

    #[test]
    fn staleness_threshold_is_five_minutes() {
        let mut s = session();
        s.last_saved_at = Some(now() - Duration::minutes(4));
        s.updated_at = now() - Duration::minutes(4);
        let view = project(s.clone());
        assert_eq!(view.save.last_saved_minutes_ago, Some(4));
        assert!(!view.save.needs_save);
        assert!(!view.save.has_unsaved_changes);
        assert!(!view.save.auto_save_due);

        s.last_saved_at = Some(now() - Duration::minutes(5));
        assert!(project(s).save.needs_save);
    }

    #[test]
    fn save_stamped_at_latest_instant_projects() {
        let latest = DateTime::<Utc>::MAX_UTC;
        let record = json!({"id": "s1", "lastSavedAt": latest.timestamp_millis()});
        let s = crate::normalize::normalize(&record).unwrap();
        assert!(s.last_saved_at.is_some());

        let view = project(s);
        assert!(view.save.has_been_saved);
        assert!(view.save.next_auto_save_at.is_none());
        assert!(!view.save.auto_save_due);
    }

    #[test]
    fn empty_session_scores_zero() {
        let view = project(session());
        assert_eq!(view.quality_score(), 0);
        assert_eq!(view.quality_rating(), QualityRating::NeedsWork);
        assert!(!view.can_advance());
        assert!(!view.is_ready_to_publish());
    }

    #[test]
    fn complete_session_scores_one_hundred() {
        let mut s = session();
        s.current_state = WorkflowState::Publishing;
        s.selected_content = ids(&["a", "b", "c", "d", "e"]);
        s.content_order = s.selected_content.clone();
        s.content_blocks = s
            .selected_content
            .iter()
            .map(|id| ContentBlock {
                id: format!("block-{id}"),
                content_id: id.clone(),
                ..Default::default()
            })
            .collect();
        s.layout_config.template_id = Some("modern".into());
        let mut styling = Map::new();
        styling.insert("primaryColor".into(), json!("#123456"));
        s.styling_applied = styling;
        s.validation_results = ValidationResults {
            valid: true,
            ..Default::default()
        };
        s.publish_readiness = PublishReadiness::Ready;
        s.test_recipients = ids(&["qa@example.com"]);
        s.last_saved_at = Some(s.updated_at);

        let view = project(s);
        assert_eq!(view.quality_score(), 100);
        assert_eq!(view.quality_rating(), QualityRating::Excellent);
        assert!(view.is_ready_to_publish());
        assert!(view.can_advance());
        assert!(view.preview.can_send_test);
    }

    #[test]
    fn collaboration_feeds_view_and_edit_checks() {
        let mut s = session();
        s.collaboration_data = vec![
            Collaborator {
                user_id: "u1".into(),
                username: "ann".into(),
                current_section: Some("intro".into()),
                last_activity: now(),
                locks: ids(&["intro"]),
            },
            Collaborator {
                user_id: "u2".into(),
                username: "bob".into(),
                current_section: Some("intro".into()),
                last_activity: now() - Duration::minutes(20),
                locks: vec![],
            },
        ];
        let view = project(s);
        assert_eq!(view.collaboration.active_user_ids, ids(&["u1"]));
        assert!(view.collaboration.has_section_conflict);
        assert!(view.can_edit_section("intro", "u1"));
        assert!(!view.can_edit_section("intro", "u2"));
    }

    #[test]
    fn activity_window_is_eight_hours() {
        let mut s = session();
        s.updated_at = now() - Duration::hours(8);
        assert!(project(s.clone()).activity.is_active);
        s.updated_at = now() - Duration::hours(9);
        assert!(!project(s).activity.is_active);
    }
}
