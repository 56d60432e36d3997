use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::core::error::MatchingError;

/// Identifier of a participant, unique within its side of the market
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Arc<str>);

impl AgentId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Strict ranking of the opposite side, most preferred first
///
/// The list is immutable once built; revisions produce new lists.
/// Whether it is a complete permutation of a population is checked
/// when it enters a [`PreferenceProfile`] or the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferenceList(Arc<[AgentId]>);

impl PreferenceList {
    pub fn new(entries: Vec<AgentId>) -> Self {
        Self(entries.into())
    }

    /// Build a list from anything convertible into ids
    pub fn from_ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<AgentId>,
    {
        Self::new(ids.into_iter().map(Into::into).collect())
    }

    pub fn as_slice(&self) -> &[AgentId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AgentId> {
        self.0.iter()
    }

    /// Zero-based rank of `agent`, lower is more preferred
    pub fn rank_of(&self, agent: &AgentId) -> Option<usize> {
        self.0.iter().position(|entry| entry == agent)
    }

    /// Check that this list ranks every member of `population` exactly once
    pub fn check_permutation_of(
        &self,
        owner: &AgentId,
        population: &[AgentId],
    ) -> Result<(), MatchingError> {
        if self.len() != population.len() {
            return Err(MatchingError::MalformedPreferenceList {
                agent: owner.clone(),
                reason: format!(
                    "ranks {} agents but the opposite side has {}",
                    self.len(),
                    population.len()
                ),
            });
        }

        let allowed: HashSet<&AgentId> = population.iter().collect();
        let mut seen: HashSet<&AgentId> = HashSet::with_capacity(self.len());
        for entry in self.iter() {
            if !allowed.contains(entry) {
                return Err(MatchingError::MalformedPreferenceList {
                    agent: owner.clone(),
                    reason: format!("{} is not on the opposite side", entry),
                });
            }
            if !seen.insert(entry) {
                return Err(MatchingError::MalformedPreferenceList {
                    agent: owner.clone(),
                    reason: format!("{} is ranked more than once", entry),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for PreferenceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PreferenceList {
    type Item = &'a AgentId;
    type IntoIter = std::slice::Iter<'a, AgentId>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Preference lists for every agent on one side of the market
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferenceProfile {
    lists: BTreeMap<AgentId, PreferenceList>,
}

impl PreferenceProfile {
    /// Build a profile, rejecting duplicate agent keys
    pub fn new<I>(entries: I) -> Result<Self, MatchingError>
    where
        I: IntoIterator<Item = (AgentId, PreferenceList)>,
    {
        let mut lists = BTreeMap::new();
        for (agent, list) in entries {
            if lists.contains_key(&agent) {
                return Err(MatchingError::DuplicateAgent { agent });
            }
            lists.insert(agent, list);
        }
        Ok(Self { lists })
    }

    /// Build a profile whose every list must be a permutation of `opposite`
    pub fn for_population<I>(opposite: &[AgentId], entries: I) -> Result<Self, MatchingError>
    where
        I: IntoIterator<Item = (AgentId, PreferenceList)>,
    {
        let profile = Self::new(entries)?;
        profile.validate_against(opposite)?;
        Ok(profile)
    }

    /// Convenience constructor from string literals
    pub fn from_str_pairs(pairs: &[(&str, &[&str])]) -> Result<Self, MatchingError> {
        Self::new(pairs.iter().map(|(agent, list)| {
            (AgentId::from(*agent), PreferenceList::from_ids(list.iter().copied()))
        }))
    }

    pub fn validate_against(&self, opposite: &[AgentId]) -> Result<(), MatchingError> {
        for (agent, list) in &self.lists {
            list.check_permutation_of(agent, opposite)?;
        }
        Ok(())
    }

    pub fn get(&self, agent: &AgentId) -> Option<&PreferenceList> {
        self.lists.get(agent)
    }

    /// Return a copy of this profile with `agent` reporting `list` instead
    pub fn with_list(&self, agent: &AgentId, list: PreferenceList) -> Self {
        let mut lists = self.lists.clone();
        lists.insert(agent.clone(), list);
        Self { lists }
    }

    /// Replace `agent`'s report in place
    pub fn set_list(&mut self, agent: &AgentId, list: PreferenceList) {
        self.lists.insert(agent.clone(), list);
    }

    /// Agent ids in key order
    pub fn agents(&self) -> Vec<AgentId> {
        self.lists.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentId, &PreferenceList)> {
        self.lists.iter()
    }
}

/// Proposer to Receiver assignment produced by one engine run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matching {
    pairs: BTreeMap<AgentId, AgentId>,
}

impl Matching {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (AgentId, AgentId)>,
    {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    /// Receiver assigned to `proposer`
    pub fn partner_of(&self, proposer: &AgentId) -> Option<&AgentId> {
        self.pairs.get(proposer)
    }

    /// Proposer held by `receiver`
    pub fn proposer_of(&self, receiver: &AgentId) -> Option<&AgentId> {
        self.pairs
            .iter()
            .find(|(_, r)| *r == receiver)
            .map(|(p, _)| p)
    }

    /// Receiver to Proposer form
    pub fn inverse(&self) -> BTreeMap<AgentId, AgentId> {
        self.pairs
            .iter()
            .map(|(p, r)| (r.clone(), p.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentId, &AgentId)> {
        self.pairs.iter()
    }
}

impl fmt::Display for Matching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (proposer, receiver)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}→{}", proposer, receiver)?;
        }
        Ok(())
    }
}

/// The two disjoint populations of a unit-quota market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    proposers: Vec<AgentId>,
    receivers: Vec<AgentId>,
}

impl Market {
    pub fn new(proposers: Vec<AgentId>, receivers: Vec<AgentId>) -> Result<Self, MatchingError> {
        if proposers.len() != receivers.len() {
            return Err(MatchingError::PopulationMismatch {
                proposers: proposers.len(),
                receivers: receivers.len(),
            });
        }

        // Ids are unique across both sides, not just within one
        let mut seen = HashSet::with_capacity(proposers.len() + receivers.len());
        for agent in proposers.iter().chain(&receivers) {
            if !seen.insert(agent) {
                return Err(MatchingError::DuplicateAgent {
                    agent: agent.clone(),
                });
            }
        }

        Ok(Self {
            proposers,
            receivers,
        })
    }

    /// Students `s1..sn` and schools `c1..cn`
    pub fn with_population(n: usize) -> Self {
        Self {
            proposers: (1..=n).map(|i| AgentId::from(format!("s{}", i))).collect(),
            receivers: (1..=n).map(|i| AgentId::from(format!("c{}", i))).collect(),
        }
    }

    pub fn proposers(&self) -> &[AgentId] {
        &self.proposers
    }

    pub fn receivers(&self) -> &[AgentId] {
        &self.receivers
    }

    pub fn size(&self) -> usize {
        self.proposers.len()
    }

    pub fn is_proposer(&self, agent: &AgentId) -> bool {
        self.proposers.contains(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<AgentId> {
        raw.iter().map(|s| AgentId::from(*s)).collect()
    }

    #[test]
    fn test_market_with_population() {
        let market = Market::with_population(3);
        assert_eq!(market.proposers(), ids(&["s1", "s2", "s3"]).as_slice());
        assert_eq!(market.receivers(), ids(&["c1", "c2", "c3"]).as_slice());
        assert_eq!(market.size(), 3);
    }

    #[test]
    fn test_market_rejects_unequal_sides() {
        let result = Market::new(ids(&["s1", "s2"]), ids(&["c1"]));
        assert_eq!(
            result.unwrap_err(),
            MatchingError::PopulationMismatch {
                proposers: 2,
                receivers: 1
            }
        );
    }

    #[test]
    fn test_market_rejects_duplicate_ids() {
        let result = Market::new(ids(&["s1", "s1"]), ids(&["c1", "c2"]));
        assert!(matches!(result, Err(MatchingError::DuplicateAgent { .. })));
    }

    #[test]
    fn test_market_rejects_id_on_both_sides() {
        let result = Market::new(ids(&["a", "b"]), ids(&["b", "c"]));
        assert_eq!(
            result.unwrap_err(),
            MatchingError::DuplicateAgent { agent: "b".into() }
        );
    }

    #[test]
    fn test_rank_of() {
        let list = PreferenceList::from_ids(["c3", "c1", "c2"]);
        assert_eq!(list.rank_of(&"c3".into()), Some(0));
        assert_eq!(list.rank_of(&"c2".into()), Some(2));
        assert_eq!(list.rank_of(&"c9".into()), None);
    }

    #[test]
    fn test_permutation_check() {
        let population = ids(&["c1", "c2", "c3"]);
        let owner = AgentId::from("s1");

        let good = PreferenceList::from_ids(["c2", "c3", "c1"]);
        assert!(good.check_permutation_of(&owner, &population).is_ok());

        let short = PreferenceList::from_ids(["c2", "c3"]);
        assert!(short.check_permutation_of(&owner, &population).is_err());

        let repeated = PreferenceList::from_ids(["c2", "c2", "c1"]);
        assert!(repeated.check_permutation_of(&owner, &population).is_err());

        let foreign = PreferenceList::from_ids(["c2", "c4", "c1"]);
        assert!(foreign.check_permutation_of(&owner, &population).is_err());
    }

    #[test]
    fn test_profile_rejects_duplicate_keys() {
        let result = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1", "c2"]),
            ("s1", &["c2", "c1"]),
        ]);
        assert!(matches!(result, Err(MatchingError::DuplicateAgent { .. })));
    }

    #[test]
    fn test_profile_with_list_leaves_original_untouched() {
        let profile = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1", "c2"]),
            ("s2", &["c2", "c1"]),
        ])
        .unwrap();
        let swapped = profile.with_list(&"s1".into(), PreferenceList::from_ids(["c2", "c1"]));

        assert_eq!(profile.get(&"s1".into()).unwrap().as_slice(), ids(&["c1", "c2"]).as_slice());
        assert_eq!(swapped.get(&"s1".into()).unwrap().as_slice(), ids(&["c2", "c1"]).as_slice());
        assert_eq!(swapped.get(&"s2".into()), profile.get(&"s2".into()));
    }

    #[test]
    fn test_matching_inverse() {
        let matching = Matching::from_pairs([
            ("s1".into(), "c2".into()),
            ("s2".into(), "c1".into()),
        ]);
        assert_eq!(matching.proposer_of(&"c2".into()), Some(&AgentId::from("s1")));
        assert_eq!(matching.inverse().get(&AgentId::from("c1")), Some(&AgentId::from("s2")));
        assert_eq!(matching.to_string(), "s1→c2, s2→c1");
    }

    #[test]
    fn test_list_display() {
        let list = PreferenceList::from_ids(["c1", "c2", "c3"]);
        assert_eq!(list.to_string(), "c1 > c2 > c3");
    }
}
