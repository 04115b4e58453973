//! Presence-derived collaboration state: active editors, locks, conflicts.
//!
//! Conflicts are detected, never resolved here.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::Collaborator;

/// Records whose last activity falls within `window` of `now`.
pub fn active_collaborators<'a>(
    records: &'a [Collaborator],
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<&'a Collaborator> {
    records
        .iter()
        .filter(|c| now.signed_duration_since(c.last_activity) <= window)
        .collect()
}

/// Union of every record's locks, in first-seen order.
pub fn locked_sections(records: &[Collaborator]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .flat_map(|c| c.locks.iter())
        .filter(|section| seen.insert(section.as_str()))
        .cloned()
        .collect()
}

/// True when two records claim the same non-null `current_section`.
pub fn has_section_conflict(records: &[Collaborator]) -> bool {
    let mut claimed = HashSet::new();
    for section in records.iter().filter_map(|c| c.current_section.as_deref()) {
        if !claimed.insert(section) {
            return true;
        }
    }
    false
}

/// Sections claimed by more than one record, in first-seen order.
pub fn conflicting_sections(records: &[Collaborator]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order = Vec::new();
    for section in records.iter().filter_map(|c| c.current_section.as_deref()) {
        let count = counts.entry(section).or_insert(0);
        if *count == 0 {
            order.push(section);
        }
        *count += 1;
    }
    order
        .into_iter()
        .filter(|s| counts[s] > 1)
        .map(str::to_string)
        .collect()
}

/// True when a section is locked by two different users.
pub fn has_lock_conflict(records: &[Collaborator]) -> bool {
    let mut holders: HashMap<&str, &str> = HashMap::new();
    for record in records {
        for section in &record.locks {
            match holders.get(section.as_str()) {
                Some(holder) if *holder != record.user_id => return true,
                Some(_) => {}
                None => {
                    holders.insert(section.as_str(), record.user_id.as_str());
                }
            }
        }
    }
    false
}

/// A section is editable when nobody locks it or `user_id` is among its holders.
pub fn can_edit_section(records: &[Collaborator], section: &str, user_id: &str) -> bool {
    let mut holders = records
        .iter()
        .filter(|c| c.locks.iter().any(|s| s == section))
        .peekable();
    if holders.peek().is_none() {
        return true;
    }
    holders.any(|c| c.user_id == user_id)
}

/// Collaboration slice of the session view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollaborationStatus {
    pub collaborator_count: usize,
    pub active_user_ids: Vec<String>,
    pub active_count: usize,
    pub is_collaborative: bool,
    pub locked_sections: Vec<String>,
    pub locked_section_count: usize,
    pub has_section_conflict: bool,
    pub conflicting_sections: Vec<String>,
    pub has_lock_conflict: bool,
    pub has_conflicts: bool,
}

impl CollaborationStatus {
    pub fn evaluate(records: &[Collaborator], now: DateTime<Utc>, window: Duration) -> Self {
        let active_user_ids: Vec<String> = active_collaborators(records, now, window)
            .into_iter()
            .map(|c| c.user_id.clone())
            .collect();
        let locked = locked_sections(records);
        let section_conflict = has_section_conflict(records);
        let lock_conflict = has_lock_conflict(records);
        Self {
            collaborator_count: records.len(),
            active_count: active_user_ids.len(),
            is_collaborative: active_user_ids.len() > 1,
            active_user_ids,
            locked_section_count: locked.len(),
            locked_sections: locked,
            has_section_conflict: section_conflict,
            conflicting_sections: conflicting_sections(records),
            has_lock_conflict: lock_conflict,
            has_conflicts: section_conflict || lock_conflict,
        }
    }
}
