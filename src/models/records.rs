use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::domain::{AgentId, Matching, PreferenceList, PreferenceProfile};

/// Knobs for one manipulation search run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPolicy {
    /// Populations at or below this size enumerate every permutation
    pub exhaustive_threshold: usize,
    /// Permutations drawn per agent when sampling
    pub sample_size: usize,
    pub seed: u64,
    /// Stop once this many beneficial records have been emitted
    pub beneficial_cap: Option<u64>,
    /// Stop after this many profile combinations
    pub max_combinations: Option<u64>,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            exhaustive_threshold: 3,
            sample_size: 6,
            seed: 42,
            beneficial_cap: None,
            max_combinations: None,
        }
    }
}

impl SearchPolicy {
    pub fn is_exhaustive_for(&self, population: usize) -> bool {
        population <= self.exhaustive_threshold
    }

    /// Fresh random source seeded from this policy
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

/// How the preference space of a run was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SpaceMode {
    Exhaustive,
    Sampled { sample_size: usize },
    Supplied,
}

/// A requested sample that was larger than the permutation space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleClamp {
    pub agent: AgentId,
    pub requested: usize,
    pub available: u64,
}

/// Which records a collecting sink keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Retention {
    #[default]
    All,
    Beneficial,
}

/// Selection of beneficial records handed to the diagram renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSelection {
    First,
    All,
}

/// One explored (false report, revision combination) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationRecord {
    /// Position of the profile combination in enumeration order
    pub combination_index: u64,
    pub distinguished: AgentId,
    /// First-round reports with the distinguished agent truthful
    pub proposer_profile: Arc<PreferenceProfile>,
    pub receiver_profile: Arc<PreferenceProfile>,
    pub false_report: PreferenceList,
    pub honest_first_round: Arc<Matching>,
    pub strategic_first_round: Arc<Matching>,
    /// Index into each other proposer's revision set
    pub revision_choice: BTreeMap<AgentId, usize>,
    pub second_round_profile: PreferenceProfile,
    pub strategic_second_round: Matching,
    /// Rank of the honest partner in the true list
    pub honest_rank: usize,
    /// Rank of the second-round partner in the true list
    pub strategic_rank: usize,
    pub beneficial: bool,
}

impl ExplorationRecord {
    pub fn honest_partner(&self) -> Option<&AgentId> {
        self.honest_first_round.partner_of(&self.distinguished)
    }

    pub fn strategic_partner(&self) -> Option<&AgentId> {
        self.strategic_second_round.partner_of(&self.distinguished)
    }
}

/// Aggregate counters for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchCounters {
    pub combinations_explored: u64,
    pub combinations_skipped: u64,
    pub false_reports_pruned: u64,
    pub records_emitted: u64,
    pub beneficial: u64,
}

/// Everything a persistence collaborator needs to describe a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub population: usize,
    pub distinguished: AgentId,
    pub truthful: PreferenceList,
    pub mode: SpaceMode,
    pub seed: u64,
    pub clamps: Vec<SampleClamp>,
    pub counters: SearchCounters,
    pub beneficial_cap_reached: bool,
    pub combination_cap_reached: bool,
}

impl RunMetadata {
    /// True when the run may back a universal claim about its population
    ///
    /// Sampled, supplied or capped runs only show existence.
    pub fn is_exhaustive_claim(&self) -> bool {
        self.mode == SpaceMode::Exhaustive
            && !self.beneficial_cap_reached
            && !self.combination_cap_reached
            && self.counters.combinations_skipped == 0
    }
}
