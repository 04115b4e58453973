use thiserror::Error;

use crate::model::WorkflowState;
use crate::quality::PublishBlocker;

pub type BuilderResult<T> = Result<T, BuilderError>;

/// Failures that abort a lifecycle operation without mutating the session.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("no authenticated user")]
    Authorization,
    #[error("session {id} not found")]
    NotFound { id: String },
    #[error("session {id} cannot be finalized: {}", format_blockers(.blockers))]
    Precondition {
        id: String,
        blockers: Vec<PublishBlocker>,
    },
    #[error("illegal workflow transition {from} -> {to}")]
    IllegalTransition {
        from: WorkflowState,
        to: WorkflowState,
    },
    #[error("record store failure: {0:#}")]
    Persistence(#[source] anyhow::Error),
    #[error("digest creation failed: {0:#}")]
    Digest(#[source] anyhow::Error),
    #[error("identity lookup failed: {0:#}")]
    Identity(#[source] anyhow::Error),
}

fn format_blockers(blockers: &[PublishBlocker]) -> String {
    blockers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl BuilderError {
    /// Blockers carried by a rejected finalize, empty for other errors.
    pub fn blockers(&self) -> &[PublishBlocker] {
        match self {
            BuilderError::Precondition { blockers, .. } => blockers,
            _ => &[],
        }
    }
}
