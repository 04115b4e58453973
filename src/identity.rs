use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub username: Option<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The authenticated user, or `None` when nobody is signed in.
    async fn current_user(&self) -> Result<Option<CurrentUser>>;
}

/// Identity fixed at construction, e.g. from a CLI flag.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<CurrentUser>,
}

impl StaticIdentity {
    pub fn signed_in(user: CurrentUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Result<Option<CurrentUser>> {
        Ok(self.user.clone())
    }
}
