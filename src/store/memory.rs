use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{merge_fields, record_id, record_updated_at, record_user_id, RecordStore};
use crate::model::SessionVersion;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Value>>,
    versions: RwLock<HashMap<String, Vec<SessionVersion>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn create(&self, record: &Value) -> Result<()> {
        let id = record_id(record).ok_or_else(|| anyhow!("record has no id"))?;
        self.records
            .write()
            .await
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn update(&self, id: &str, fields: &Map<String, Value>) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| anyhow!("session {} not found", id))?;
        merge_fields(record, fields);
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| record_user_id(r) == Some(user_id))
            .filter(|r| record_updated_at(r).map_or(false, |at| at >= updated_since))
            .cloned()
            .collect())
    }

    async fn record_version(&self, version: &SessionVersion, max_versions: u32) -> Result<()> {
        let mut versions = self.versions.write().await;
        let history = versions.entry(version.session_id.clone()).or_default();
        history.push(version.clone());
        let keep = max_versions.max(1) as usize;
        if history.len() > keep {
            let excess = history.len() - keep;
            history.drain(..excess);
        }
        Ok(())
    }

    async fn versions(&self, session_id: &str) -> Result<Vec<SessionVersion>> {
        Ok(self
            .versions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}
