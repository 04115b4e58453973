//! Quality gate: a bounded 0..=100 score and the publish-readiness verdict.

use serde::Serialize;

use crate::model::{PublishReadiness, ValidationResults};

pub const CONTENT_MAX: u8 = 30;
pub const LAYOUT_MAX: u8 = 25;
pub const VALIDATION_MAX: u8 = 25;
pub const COLLABORATION_MAX: u8 = 10;
pub const PREVIEW_MAX: u8 = 10;

/// Item count at which a selection earns the "substantial" content points.
pub const SUBSTANTIAL_CONTENT: usize = 5;

/// Derived signals the score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityInputs {
    pub selected_count: usize,
    pub has_content: bool,
    pub content_is_ordered: bool,
    pub has_valid_layout: bool,
    pub has_custom_styling: bool,
    pub has_blocks: bool,
    pub is_validated: bool,
    pub warning_count: usize,
    pub has_conflicts: bool,
    pub auto_save_enabled: bool,
    pub has_unsaved_changes: bool,
    pub can_preview: bool,
    pub has_test_recipients: bool,
    pub can_send_test: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityRating {
    Excellent,
    Good,
    Fair,
    Poor,
    NeedsWork,
}

impl QualityRating {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => QualityRating::Excellent,
            75..=89 => QualityRating::Good,
            60..=74 => QualityRating::Fair,
            40..=59 => QualityRating::Poor,
            _ => QualityRating::NeedsWork,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRating::Excellent => "excellent",
            QualityRating::Good => "good",
            QualityRating::Fair => "fair",
            QualityRating::Poor => "poor",
            QualityRating::NeedsWork => "needs-work",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityBreakdown {
    pub content: u8,
    pub layout: u8,
    pub validation: u8,
    pub collaboration: u8,
    pub preview: u8,
}

impl QualityBreakdown {
    pub fn total(&self) -> u8 {
        let sum = self.content as u16
            + self.layout as u16
            + self.validation as u16
            + self.collaboration as u16
            + self.preview as u16;
        sum.min(100) as u8
    }
}

fn points(earned: bool, weight: u8) -> u8 {
    if earned {
        weight
    } else {
        0
    }
}

pub fn score_breakdown(inputs: &QualityInputs) -> QualityBreakdown {
    let content = points(inputs.has_content, 10)
        + points(inputs.selected_count >= SUBSTANTIAL_CONTENT, 10)
        + points(inputs.has_content && inputs.content_is_ordered, 10);

    let layout = points(inputs.has_valid_layout, 10)
        + points(inputs.has_custom_styling, 8)
        + points(inputs.has_blocks, 7);

    let validation = match (inputs.is_validated, inputs.warning_count) {
        (true, 0) => VALIDATION_MAX,
        (true, _) => 15,
        (false, _) => 0,
    };

    // Nothing to collaborate on until content exists.
    let collaboration = if inputs.has_content {
        points(!inputs.has_conflicts, 4)
            + points(inputs.auto_save_enabled, 3)
            + points(!inputs.has_unsaved_changes, 3)
    } else {
        0
    };

    let preview = points(inputs.can_preview, 4)
        + points(inputs.has_test_recipients, 3)
        + points(inputs.can_send_test, 3);

    QualityBreakdown {
        content: content.min(CONTENT_MAX),
        layout: layout.min(LAYOUT_MAX),
        validation,
        collaboration: collaboration.min(COLLABORATION_MAX),
        preview: preview.min(PREVIEW_MAX),
    }
}

/// Why a session may not be published yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishBlocker {
    /// Local validation has not passed; route back to preview.
    ValidationFailed { errors: Vec<String> },
    /// The readiness flag was not asserted as `ready`.
    NotMarkedReady { readiness: PublishReadiness },
}

impl std::fmt::Display for PublishBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishBlocker::ValidationFailed { errors } if errors.is_empty() => {
                write!(f, "validation has not passed")
            }
            PublishBlocker::ValidationFailed { errors } => {
                write!(f, "validation failed: {}", errors.join("; "))
            }
            PublishBlocker::NotMarkedReady { readiness } => {
                write!(f, "publish readiness is {readiness}, expected ready")
            }
        }
    }
}

/// Both the asserted readiness flag and local validation must agree.
pub fn publish_blockers(
    readiness: PublishReadiness,
    validation: &ValidationResults,
) -> Vec<PublishBlocker> {
    let mut blockers = Vec::new();
    if !validation.valid {
        blockers.push(PublishBlocker::ValidationFailed {
            errors: validation.errors.clone(),
        });
    }
    if readiness != PublishReadiness::Ready {
        blockers.push(PublishBlocker::NotMarkedReady { readiness });
    }
    blockers
}

/// Quality slice of the session view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub score: u8,
    pub rating: QualityRating,
    pub breakdown: QualityBreakdown,
    pub is_validated: bool,
    pub is_ready_to_publish: bool,
    pub blockers: Vec<PublishBlocker>,
}

impl QualityReport {
    pub fn assess(
        inputs: &QualityInputs,
        readiness: PublishReadiness,
        validation: &ValidationResults,
    ) -> Self {
        let breakdown = score_breakdown(inputs);
        let score = breakdown.total();
        let blockers = publish_blockers(readiness, validation);
        Self {
            score,
            rating: QualityRating::from_score(score),
            breakdown,
            is_validated: validation.valid,
            is_ready_to_publish: blockers.is_empty(),
            blockers,
        }
    }
}
