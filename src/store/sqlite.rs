use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{instrument, warn};

use super::{merge_fields, record_id, record_updated_at, record_user_id, RecordStore};
use crate::model::SessionVersion;

pub type Pool = SqlitePool;

/// Session store over SQLite. Each row keeps the full JSON record next to the
/// columns used for lookups.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url` and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // Every connection to `sqlite::memory:` opens its own database, so keep
    // exactly one alive for the lifetime of the pool.
    let options = if normalized.starts_with("sqlite::memory") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = options
        .connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(?err, path = %parent.display(), "failed to create database directory");
            }
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    // Create the file on first use.
    if !rebuilt.contains("mode=") {
        rebuilt.push(if query_part.is_some() { '&' } else { '?' });
        rebuilt.push_str("mode=rwc");
    }
    rebuilt
}

/// Fixed-width UTC text so the column sorts chronologically.
fn sortable(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn indexed_columns(record: &Value) -> (String, String) {
    let user_id = record_user_id(record).unwrap_or_default().to_string();
    let updated_at = sortable(record_updated_at(record).unwrap_or_default());
    (user_id, updated_at)
}

#[async_trait]
impl RecordStore for SqliteStore {
    #[instrument(skip_all, fields(id = %id))]
    async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        let record: Option<String> =
            sqlx::query_scalar("SELECT record FROM builder_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        record
            .map(|text| serde_json::from_str(&text).context("stored session is not valid JSON"))
            .transpose()
    }

    #[instrument(skip_all)]
    async fn create(&self, record: &Value) -> Result<()> {
        let id = record_id(record).ok_or_else(|| anyhow!("record has no id"))?;
        let (user_id, updated_at) = indexed_columns(record);
        sqlx::query(
            "INSERT INTO builder_sessions (id, user_id, updated_at, record) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(updated_at)
        .bind(record.to_string())
        .execute(&self.pool)
        .await
        .context("failed to insert session")?;
        Ok(())
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn update(&self, id: &str, fields: &Map<String, Value>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let stored: Option<String> =
            sqlx::query_scalar("SELECT record FROM builder_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(stored) = stored else {
            return Err(anyhow!("session {} not found", id));
        };
        let mut record: Value =
            serde_json::from_str(&stored).context("stored session is not valid JSON")?;
        merge_fields(&mut record, fields);
        let (user_id, updated_at) = indexed_columns(&record);
        sqlx::query(
            "UPDATE builder_sessions SET user_id = ?, updated_at = ?, record = ? WHERE id = ?",
        )
        .bind(user_id)
        .bind(updated_at)
        .bind(record.to_string())
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("failed to update session")?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn list_for_user(
        &self,
        user_id: &str,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let rows = sqlx::query(
            "SELECT record FROM builder_sessions WHERE user_id = ? AND updated_at >= ? ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .bind(sortable(updated_since))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let text: String = row.get("record");
                serde_json::from_str(&text).context("stored session is not valid JSON")
            })
            .collect()
    }

    #[instrument(skip_all)]
    async fn record_version(&self, version: &SessionVersion, max_versions: u32) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO session_versions (session_id, saved_at, delta) VALUES (?, ?, ?)")
            .bind(&version.session_id)
            .bind(sortable(version.saved_at))
            .bind(Value::Object(version.delta.clone()).to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM session_versions WHERE session_id = ? AND id NOT IN \
             (SELECT id FROM session_versions WHERE session_id = ? ORDER BY id DESC LIMIT ?)",
        )
        .bind(&version.session_id)
        .bind(&version.session_id)
        .bind(max_versions.max(1) as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn versions(&self, session_id: &str) -> Result<Vec<SessionVersion>> {
        let rows = sqlx::query(
            "SELECT saved_at, delta FROM session_versions WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let saved_at: String = row.get("saved_at");
                let delta: String = row.get("delta");
                Ok(SessionVersion {
                    session_id: session_id.to_string(),
                    saved_at: DateTime::parse_from_rfc3339(&saved_at)
                        .context("invalid saved_at")?
                        .with_timezone(&Utc),
                    delta: serde_json::from_str(&delta).context("invalid version delta")?,
                })
            })
            .collect()
    }
}
