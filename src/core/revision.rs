use serde::{Deserialize, Serialize};

use crate::core::error::MatchingError;
use crate::models::{AgentId, Matching, PreferenceList};

/// Lists an agent may report after seeing its first-round match
///
/// Variant `p` moves the matched entry to position `p`; the last variant
/// is the original list itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionSet(Vec<PreferenceList>);

impl RevisionSet {
    pub fn variants(&self) -> &[PreferenceList] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&PreferenceList> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PreferenceList> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<PreferenceList> {
        self.0
    }
}

/// Every promotion of `matched` to a position at or before its current rank
///
/// Returns `None` when `matched` is not in `original`.
pub fn promote_matched(matched: &AgentId, original: &PreferenceList) -> Option<RevisionSet> {
    let rank = original.rank_of(matched)?;
    let rest: Vec<&AgentId> = original.iter().filter(|entry| *entry != matched).collect();

    let variants = (0..=rank)
        .map(|position| {
            let mut entries = Vec::with_capacity(original.len());
            entries.extend(rest[..position].iter().map(|e| (*e).clone()));
            entries.push(matched.clone());
            entries.extend(rest[position..].iter().map(|e| (*e).clone()));
            PreferenceList::new(entries)
        })
        .collect();

    Some(RevisionSet(variants))
}

/// Revision set for `agent` given its realized match in `matching`
pub fn derive_revisions(
    matching: &Matching,
    agent: &AgentId,
    original: &PreferenceList,
) -> Result<RevisionSet, MatchingError> {
    let matched = matching
        .partner_of(agent)
        .ok_or_else(|| MatchingError::UnmatchedAgent {
            agent: agent.clone(),
        })?;

    promote_matched(matched, original).ok_or_else(|| MatchingError::MatchedEntryNotFound {
        agent: agent.clone(),
        matched: matched.clone(),
    })
}
