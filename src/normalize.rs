//! Turns loosely-typed session records into canonical [`BuilderSession`]s.
//!
//! Records arrive from the store, the network, or a caller-supplied JSON
//! document, and may be partial or use `snake_case` column names. Every
//! field falls back to its baseline default when missing or malformed.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::model::{
    BuilderSession, Collaborator, ContentBlock, PublishReadiness, WorkflowState,
};

/// Normalize a raw record. Returns `None` when the record has no usable `id`.
pub fn normalize(record: &Value) -> Option<BuilderSession> {
    let obj = record.as_object()?;
    let id = id_field(obj)?;

    let session_id = string_field(obj, "sessionId", "session_id").unwrap_or_else(|| id.clone());

    Some(BuilderSession {
        session_id,
        digest_id: string_field(obj, "digestId", "digest_id"),
        user_id: string_field(obj, "userId", "user_id").unwrap_or_default(),
        current_state: string_field(obj, "currentState", "current_state")
            .and_then(|s| WorkflowState::parse_state(&s))
            .unwrap_or_default(),
        selected_content: string_list(field(obj, "selectedContent", "selected_content")),
        content_order: string_list(field(obj, "contentOrder", "content_order")),
        content_blocks: object_list::<ContentBlock>(field(obj, "contentBlocks", "content_blocks")),
        layout_config: object_or_default(field(obj, "layoutConfig", "layout_config")),
        styling_applied: field(obj, "stylingApplied", "styling_applied")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        auto_save_config: object_or_default(field(obj, "autoSaveConfig", "auto_save_config")),
        last_saved_at: field(obj, "lastSavedAt", "last_saved_at").and_then(timestamp),
        collaboration_data: collaborators(field(obj, "collaborationData", "collaboration_data")),
        preview_settings: object_or_default(field(obj, "previewSettings", "preview_settings")),
        test_recipients: string_list(field(obj, "testRecipients", "test_recipients")),
        validation_results: object_or_default(field(
            obj,
            "validationResults",
            "validation_results",
        )),
        publish_readiness: string_field(obj, "publishReadiness", "publish_readiness")
            .and_then(|s| PublishReadiness::parse_readiness(&s))
            .unwrap_or_default(),
        selection_criteria: object_or_default(field(
            obj,
            "selectionCriteria",
            "selection_criteria",
        )),
        created_at: field(obj, "createdAt", "created_at")
            .and_then(timestamp)
            .unwrap_or_default(),
        updated_at: field(obj, "updatedAt", "updated_at")
            .and_then(timestamp)
            .unwrap_or_default(),
        id,
    })
}

fn field<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel)
        .filter(|v| !v.is_null())
        .or_else(|| obj.get(snake).filter(|v| !v.is_null()))
}

fn id_field(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, camel: &str, snake: &str) -> Option<String> {
    match field(obj, camel, snake)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identifier lists keep order and duplicates; non-scalar entries are dropped.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

fn object_list<T: DeserializeOwned>(value: Option<&Value>) -> Vec<T> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Presence records are read field by field so one malformed field does not
/// drop the whole claim.
fn collaborators(value: Option<&Value>) -> Vec<Collaborator> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| Collaborator {
            user_id: string_field(entry, "userId", "user_id").unwrap_or_default(),
            username: string_field(entry, "username", "userName").unwrap_or_default(),
            current_section: string_field(entry, "currentSection", "current_section"),
            last_activity: field(entry, "lastActivity", "last_activity")
                .and_then(timestamp)
                .unwrap_or_default(),
            locks: string_list(field(entry, "locks", "locks")),
        })
        .collect()
}

fn object_or_default<T: DeserializeOwned + Default>(value: Option<&Value>) -> T {
    value
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Accepts RFC 3339 strings or epoch milliseconds.
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
