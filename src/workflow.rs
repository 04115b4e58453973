//! Workflow state machine for the builder.
//!
//! The machine only reports legality and readiness. Executing a transition
//! is left to the caller, and `update` stays permissive so collaborative
//! edits are never blocked at the data layer.

use serde::Serialize;

use crate::model::WorkflowState;

impl WorkflowState {
    /// 1-based position in the workflow.
    pub fn progress(&self) -> u8 {
        match self {
            WorkflowState::Selecting => 1,
            WorkflowState::Arranging => 2,
            WorkflowState::Previewing => 3,
            WorkflowState::Publishing => 4,
        }
    }

    pub fn next(&self) -> Option<WorkflowState> {
        match self {
            WorkflowState::Selecting => Some(WorkflowState::Arranging),
            WorkflowState::Arranging => Some(WorkflowState::Previewing),
            WorkflowState::Previewing => Some(WorkflowState::Publishing),
            WorkflowState::Publishing => None,
        }
    }

    pub fn previous(&self) -> Option<WorkflowState> {
        match self {
            WorkflowState::Selecting => None,
            WorkflowState::Arranging => Some(WorkflowState::Selecting),
            WorkflowState::Previewing => Some(WorkflowState::Arranging),
            WorkflowState::Publishing => Some(WorkflowState::Previewing),
        }
    }

    /// States reachable in one legal move: one step forward or one step back.
    pub fn legal_targets(&self) -> &'static [WorkflowState] {
        match self {
            WorkflowState::Selecting => &[WorkflowState::Arranging],
            WorkflowState::Arranging => &[WorkflowState::Selecting, WorkflowState::Previewing],
            WorkflowState::Previewing => &[WorkflowState::Arranging, WorkflowState::Publishing],
            WorkflowState::Publishing => &[WorkflowState::Previewing],
        }
    }

    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        self.legal_targets().contains(&target)
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkflowState::Selecting => "Select content",
            WorkflowState::Arranging => "Arrange layout",
            WorkflowState::Previewing => "Preview",
            WorkflowState::Publishing => "Publish",
        }
    }
}

/// Signals that gate moving forward out of each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceSignals {
    pub has_content: bool,
    pub has_valid_layout: bool,
    pub is_validated: bool,
    pub is_ready_to_publish: bool,
}

/// Forward readiness for `state`.
pub fn can_advance(state: WorkflowState, signals: &AdvanceSignals) -> bool {
    match state {
        WorkflowState::Selecting => signals.has_content,
        WorkflowState::Arranging => signals.has_valid_layout,
        WorkflowState::Previewing => signals.is_validated,
        WorkflowState::Publishing => signals.is_ready_to_publish,
    }
}

/// Workflow slice of the session view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStatus {
    pub state: WorkflowState,
    pub label: &'static str,
    pub state_progress: u8,
    pub completion_percent: u8,
    pub is_first_step: bool,
    pub is_final_step: bool,
    pub next_state: Option<WorkflowState>,
    pub previous_state: Option<WorkflowState>,
    pub legal_targets: Vec<WorkflowState>,
    pub can_advance: bool,
    pub can_go_back: bool,
}

impl WorkflowStatus {
    pub fn evaluate(state: WorkflowState, signals: &AdvanceSignals) -> Self {
        let progress = state.progress();
        Self {
            state,
            label: state.label(),
            state_progress: progress,
            completion_percent: progress * 25,
            is_first_step: state.previous().is_none(),
            is_final_step: state.next().is_none(),
            next_state: state.next(),
            previous_state: state.previous(),
            legal_targets: state.legal_targets().to_vec(),
            can_advance: can_advance(state, signals),
            can_go_back: state.previous().is_some(),
        }
    }
}
