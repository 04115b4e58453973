//! Session record storage.
//!
//! This module is split into:
//! - `memory`: in-process store backed by a map, used for tests and as a cache tier.
//! - `sqlite`: SQL-backed store holding one JSON record per session.
//! - `tiered`: two-tier repository combining a primary store with a cache.
//!
//! Stores work on raw JSON records; callers run them through
//! [`crate::normalize::normalize`] before use.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::model::SessionVersion;

pub mod memory;
pub mod sqlite;
pub mod tiered;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use tiered::TieredStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Value>>;

    /// Insert a new record. The record must carry a string `id`.
    async fn create(&self, record: &Value) -> Result<()>;

    /// Merge `fields` into the stored record, last write per field wins.
    /// Fails when `id` is unknown.
    async fn update(&self, id: &str, fields: &Map<String, Value>) -> Result<()>;

    /// Records owned by `user_id` whose `updatedAt` is at or after `updated_since`.
    async fn list_for_user(&self, user_id: &str, updated_since: DateTime<Utc>)
        -> Result<Vec<Value>>;

    /// Append an autosave entry, keeping at most `max_versions` newest entries.
    async fn record_version(&self, version: &SessionVersion, max_versions: u32) -> Result<()>;

    /// Autosave history for a session, oldest first.
    async fn versions(&self, session_id: &str) -> Result<Vec<SessionVersion>>;
}

pub(crate) fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

pub(crate) fn record_user_id(record: &Value) -> Option<&str> {
    record
        .get("userId")
        .or_else(|| record.get("user_id"))
        .and_then(Value::as_str)
}

pub(crate) fn record_updated_at(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get("updatedAt")
        .or_else(|| record.get("updated_at"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn merge_fields(record: &mut Value, fields: &Map<String, Value>) {
    if let Value::Object(obj) = record {
        for (key, value) in fields {
            obj.insert(key.clone(), value.clone());
        }
    }
}
