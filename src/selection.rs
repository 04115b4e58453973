use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SelectionCriteria;

/// A piece of content offered to the builder for selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentCandidate {
    pub id: String,
    pub source: String,
    pub category: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub quality_score: f64,
    pub published_at: Option<DateTime<Utc>>,
}

impl SelectionCriteria {
    /// Whether `candidate` passes every configured rule.
    ///
    /// Source and category lists are allow-lists; keywords match the title or
    /// summary case-insensitively. A `max_age_days` of zero disables the age
    /// rule, and candidates without a publish date are never considered stale.
    pub fn admits(&self, candidate: &ContentCandidate, now: DateTime<Utc>) -> bool {
        if !self.sources.is_empty() && !contains_ignore_case(&self.sources, &candidate.source) {
            return false;
        }
        if !self.categories.is_empty() {
            match candidate.category.as_deref() {
                Some(category) if contains_ignore_case(&self.categories, category) => {}
                _ => return false,
            }
        }
        if !self.keywords.is_empty() {
            let haystack = format!(
                "{} {}",
                candidate.title,
                candidate.summary.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            if !self
                .keywords
                .iter()
                .any(|k| haystack.contains(&k.to_lowercase()))
            {
                return false;
            }
        }
        if candidate.quality_score < self.min_quality_score {
            return false;
        }
        if self.max_age_days > 0 {
            if let Some(published) = candidate.published_at {
                if now.signed_duration_since(published) > Duration::days(self.max_age_days as i64) {
                    return false;
                }
            }
        }
        true
    }
}

fn contains_ignore_case(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}

/// Candidates admitted by `criteria`, in their original order.
pub fn eligible_content<'a>(
    criteria: &SelectionCriteria,
    candidates: &'a [ContentCandidate],
    now: DateTime<Utc>,
) -> Vec<&'a ContentCandidate> {
    candidates
        .iter()
        .filter(|c| criteria.admits(c, now))
        .collect()
}
