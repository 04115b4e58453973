//! Collaborative digest builder: the editing workflow that takes a session
//! from content selection through layout and preview to publication.

pub mod collaboration;
pub mod config;
pub mod digest;
pub mod error;
pub mod identity;
pub mod model;
pub mod normalize;
pub mod quality;
pub mod selection;
pub mod service;
pub mod store;
pub mod view;
pub mod workflow;

pub use error::{BuilderError, BuilderResult};
pub use model::{BuilderSession, SessionPatch, WorkflowState};
pub use service::BuilderService;
pub use view::SessionView;
