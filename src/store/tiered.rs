use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::RecordStore;
use crate::model::SessionVersion;

/// Two-tier repository: the primary tier is authoritative, the cache tier
/// answers reads when the primary misses or fails.
///
/// Writes must succeed on the primary and are then mirrored into the cache;
/// a failed mirror is logged and does not fail the write. Version history is
/// not cached.
#[derive(Clone)]
pub struct TieredStore {
    primary: Arc<dyn RecordStore>,
    cache: Arc<dyn RecordStore>,
}

impl TieredStore {
    pub fn new(primary: Arc<dyn RecordStore>, cache: Arc<dyn RecordStore>) -> Self {
        Self { primary, cache }
    }

    async fn refresh_cache(&self, id: &str, record: &Value) {
        let result = match self.cache.find_by_id(id).await {
            Ok(Some(_)) => match record.as_object() {
                Some(fields) => self.cache.update(id, fields).await,
                None => Ok(()),
            },
            Ok(None) => self.cache.create(record).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(?err, id, "failed to refresh cache tier");
        }
    }
}

#[async_trait]
impl RecordStore for TieredStore {
    #[instrument(skip_all, fields(id = %id))]
    async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        match self.primary.find_by_id(id).await {
            Ok(Some(record)) => {
                self.refresh_cache(id, &record).await;
                Ok(Some(record))
            }
            Ok(None) => {
                debug!(id, "primary tier miss; reading cache");
                self.cache.find_by_id(id).await
            }
            Err(err) => {
                warn!(?err, id, "primary tier read failed; reading cache");
                self.cache.find_by_id(id).await
            }
        }
    }

    #[instrument(skip_all)]
    async fn create(&self, record: &Value) -> Result<()> {
        self.primary.create(record).await?;
        if let Err(err) = self.cache.create(record).await {
            warn!(?err, "failed to mirror created session into cache tier");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn update(&self, id: &str, fields: &Map<String, Value>) -> Result<()> {
        self.primary.update(id, fields).await?;
        match self.primary.find_by_id(id).await {
            Ok(Some(record)) => self.refresh_cache(id, &record).await,
            Ok(None) => {}
            Err(err) => warn!(?err, id, "could not re-read primary tier after update"),
        }
        Ok(())
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn list_for_user(
        &self,
        user_id: &str,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        match self.primary.list_for_user(user_id, updated_since).await {
            Ok(records) => Ok(records),
            Err(err) => {
                warn!(?err, user_id, "primary tier listing failed; reading cache");
                self.cache.list_for_user(user_id, updated_since).await
            }
        }
    }

    async fn record_version(&self, version: &SessionVersion, max_versions: u32) -> Result<()> {
        self.primary.record_version(version, max_versions).await
    }

    /// History lives on the primary tier only, so its failures are not masked.
    async fn versions(&self, session_id: &str) -> Result<Vec<SessionVersion>> {
        self.primary.versions(session_id).await
    }
}
