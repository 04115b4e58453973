use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The four linear stages of the builder workflow.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Selecting,
    Arranging,
    Previewing,
    Publishing,
}

impl WorkflowState {
    /// Workflow order, first to last.
    pub const ALL: [WorkflowState; 4] = [
        WorkflowState::Selecting,
        WorkflowState::Arranging,
        WorkflowState::Previewing,
        WorkflowState::Publishing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Selecting => "selecting",
            WorkflowState::Arranging => "arranging",
            WorkflowState::Previewing => "previewing",
            WorkflowState::Publishing => "publishing",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "selecting" => Some(WorkflowState::Selecting),
            "arranging" => Some(WorkflowState::Arranging),
            "previewing" => Some(WorkflowState::Previewing),
            "publishing" => Some(WorkflowState::Publishing),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishReadiness {
    #[default]
    NotReady,
    Ready,
    Completed,
}

impl PublishReadiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishReadiness::NotReady => "not_ready",
            PublishReadiness::Ready => "ready",
            PublishReadiness::Completed => "completed",
        }
    }

    pub fn parse_readiness(s: &str) -> Option<Self> {
        match s {
            "not_ready" => Some(PublishReadiness::NotReady),
            "ready" => Some(PublishReadiness::Ready),
            "completed" => Some(PublishReadiness::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PublishReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One layout block placed in the digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentBlock {
    pub id: String,
    pub content_id: String,
    pub block_type: String,
    pub style: Map<String, Value>,
    pub config: Map<String, Value>,
}

impl Default for ContentBlock {
    fn default() -> Self {
        Self {
            id: String::new(),
            content_id: String::new(),
            block_type: "article".into(),
            style: Map::new(),
            config: Map::new(),
        }
    }
}

/// Template selection plus any other layout settings, kept opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutConfig {
    pub template_id: Option<String>,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub interval_seconds: u32,
    pub max_versions: u32,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 30,
            max_versions: 10,
        }
    }
}

/// Presence record for one collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Collaborator {
    pub user_id: String,
    pub username: String,
    pub current_section: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub locks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewSettings {
    pub device: String,
    pub dark_mode: bool,
    pub show_images: bool,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            device: "desktop".into(),
            dark_mode: false,
            show_images: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationResults {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Rules used to pre-filter eligible content. Empty lists do not restrict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionCriteria {
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub min_quality_score: f64,
    pub max_age_days: u32,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            categories: Vec::new(),
            keywords: Vec::new(),
            min_quality_score: 0.0,
            max_age_days: 7,
        }
    }
}

/// Canonical Builder Session record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderSession {
    pub id: String,
    pub session_id: String,
    pub digest_id: Option<String>,
    pub user_id: String,
    pub current_state: WorkflowState,
    pub selected_content: Vec<String>,
    pub content_order: Vec<String>,
    pub content_blocks: Vec<ContentBlock>,
    pub layout_config: LayoutConfig,
    pub styling_applied: Map<String, Value>,
    pub auto_save_config: AutoSaveConfig,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub collaboration_data: Vec<Collaborator>,
    pub preview_settings: PreviewSettings,
    pub test_recipients: Vec<String>,
    pub validation_results: ValidationResults,
    pub publish_readiness: PublishReadiness,
    pub selection_criteria: SelectionCriteria,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuilderSession {
    pub fn to_record(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Partial update for a session. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state: Option<WorkflowState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_content: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_order: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<Vec<ContentBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_config: Option<LayoutConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styling_applied: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_save_config: Option<AutoSaveConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collaboration_data: Option<Vec<Collaborator>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_settings: Option<PreviewSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_recipients: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<ValidationResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_readiness: Option<PublishReadiness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_criteria: Option<SelectionCriteria>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.to_fields().is_empty()
    }

    /// Record fields touched by this patch, keyed the way records store them.
    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// One autosave entry kept for diffing/versioning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionVersion {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub delta: Map<String, Value>,
}
