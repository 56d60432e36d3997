use rand::seq::{index, SliceRandom};
use rand::Rng;
use std::collections::{BTreeMap, HashSet};

use crate::models::{AgentId, Market, PreferenceList, SampleClamp, SearchPolicy, SpaceMode};

/// Spaces up to this size are materialized before sampling
const ENUMERATION_LIMIT: u64 = 40_320;

/// `n!`, or `None` when it does not fit in a `u64`
pub fn permutation_count(n: usize) -> Option<u64> {
    (1..=n as u64).try_fold(1u64, |acc, k| acc.checked_mul(k))
}

/// Every ordering of `population`, in lexicographic order of its positions
pub fn all_permutations(population: &[AgentId]) -> Vec<PreferenceList> {
    let mut order: Vec<usize> = (0..population.len()).collect();
    let mut out = Vec::new();
    loop {
        out.push(list_from_order(population, &order));
        if !next_permutation(&mut order) {
            break;
        }
    }
    out
}

fn list_from_order(population: &[AgentId], order: &[usize]) -> PreferenceList {
    PreferenceList::new(order.iter().map(|&i| population[i].clone()).collect())
}

/// Advance to the next lexicographic permutation, false after the last one
fn next_permutation(order: &mut [usize]) -> bool {
    if order.len() < 2 {
        return false;
    }

    let mut i = order.len() - 1;
    while i > 0 && order[i - 1] >= order[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }

    let mut j = order.len() - 1;
    while order[j] <= order[i - 1] {
        j -= 1;
    }
    order.swap(i - 1, j);
    order[i..].reverse();
    true
}

/// Uniform sample of distinct orderings of `population`
///
/// A request larger than `n!` is clamped to `n!` and reported back.
pub fn sample_permutations<R>(
    owner: &AgentId,
    population: &[AgentId],
    requested: usize,
    rng: &mut R,
) -> (Vec<PreferenceList>, Option<SampleClamp>)
where
    R: Rng + ?Sized,
{
    let available = permutation_count(population.len()).unwrap_or(u64::MAX);
    let clamp = ((requested as u64) > available).then(|| SampleClamp {
        agent: owner.clone(),
        requested,
        available,
    });
    let granted = (requested as u64).min(available) as usize;

    if available <= ENUMERATION_LIMIT {
        let all = all_permutations(population);
        let picked = index::sample(rng, all.len(), granted)
            .into_iter()
            .map(|i| all[i].clone())
            .collect();
        return (picked, clamp);
    }

    let mut seen: HashSet<Vec<usize>> = HashSet::with_capacity(granted);
    let mut picked = Vec::with_capacity(granted);
    let mut order: Vec<usize> = (0..population.len()).collect();
    while picked.len() < granted {
        order.shuffle(rng);
        if seen.insert(order.clone()) {
            picked.push(list_from_order(population, &order));
        }
    }
    (picked, clamp)
}

/// Candidate preference lists per agent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreferenceSpace {
    lists: BTreeMap<AgentId, Vec<PreferenceList>>,
}

impl PreferenceSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent: AgentId, candidates: Vec<PreferenceList>) {
        self.lists.insert(agent, candidates);
    }

    pub fn get(&self, agent: &AgentId) -> Option<&[PreferenceList]> {
        self.lists.get(agent).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

impl FromIterator<(AgentId, Vec<PreferenceList>)> for PreferenceSpace {
    fn from_iter<I: IntoIterator<Item = (AgentId, Vec<PreferenceList>)>>(iter: I) -> Self {
        Self {
            lists: iter.into_iter().collect(),
        }
    }
}

/// Output of [`SpaceGenerator::generate`]
#[derive(Debug, Clone)]
pub struct GeneratedSpace {
    pub space: PreferenceSpace,
    pub mode: SpaceMode,
    pub clamps: Vec<SampleClamp>,
}

/// Builds the preference space for every agent in a market
#[derive(Debug, Clone, Copy)]
pub struct SpaceGenerator {
    exhaustive_threshold: usize,
    sample_size: usize,
}

impl SpaceGenerator {
    pub fn new(exhaustive_threshold: usize, sample_size: usize) -> Self {
        Self {
            exhaustive_threshold,
            sample_size,
        }
    }

    pub fn from_policy(policy: &SearchPolicy) -> Self {
        Self::new(policy.exhaustive_threshold, policy.sample_size)
    }

    /// Enumerate at or below the threshold, otherwise sample per agent
    ///
    /// Agents draw from `rng` in market order, proposers first.
    pub fn generate<R>(&self, market: &Market, rng: &mut R) -> GeneratedSpace
    where
        R: Rng + ?Sized,
    {
        if market.size() <= self.exhaustive_threshold {
            let over_receivers = all_permutations(market.receivers());
            let over_proposers = all_permutations(market.proposers());

            let space = market
                .proposers()
                .iter()
                .map(|p| (p.clone(), over_receivers.clone()))
                .chain(
                    market
                        .receivers()
                        .iter()
                        .map(|r| (r.clone(), over_proposers.clone())),
                )
                .collect();

            tracing::debug!(
                population = market.size(),
                lists_per_agent = over_receivers.len(),
                "Enumerated exhaustive preference space"
            );

            return GeneratedSpace {
                space,
                mode: SpaceMode::Exhaustive,
                clamps: Vec::new(),
            };
        }

        let mut space = PreferenceSpace::new();
        let mut clamps = Vec::new();
        let sides = [
            (market.proposers(), market.receivers()),
            (market.receivers(), market.proposers()),
        ];
        for (agents, opposite) in sides {
            for agent in agents {
                let (lists, clamp) = sample_permutations(agent, opposite, self.sample_size, rng);
                if let Some(clamp) = clamp {
                    tracing::warn!(
                        "Sample size {} exceeds {} permutations for {}, clamping",
                        clamp.requested,
                        clamp.available,
                        agent
                    );
                    clamps.push(clamp);
                }
                space.insert(agent.clone(), lists);
            }
        }

        tracing::debug!(
            population = market.size(),
            sample_size = self.sample_size,
            "Sampled preference space"
        );

        GeneratedSpace {
            space,
            mode: SpaceMode::Sampled {
                sample_size: self.sample_size,
            },
            clamps,
        }
    }
}

/// Mixed-radix counter over the cross-product of several index ranges
///
/// Yields index vectors with the last position varying fastest. A product
/// over zero ranges has exactly one (empty) point; any empty range makes
/// the whole product empty.
#[derive(Debug, Clone)]
pub struct CrossProduct {
    radices: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl CrossProduct {
    pub fn new(radices: Vec<usize>) -> Self {
        let next = if radices.iter().any(|&r| r == 0) {
            None
        } else {
            Some(vec![0; radices.len()])
        };
        Self { radices, next }
    }

    /// Number of points, `None` on overflow
    pub fn total(&self) -> Option<u64> {
        self.radices
            .iter()
            .try_fold(1u64, |acc, &r| acc.checked_mul(r as u64))
    }
}

impl Iterator for CrossProduct {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        let mut successor = current.clone();
        for i in (0..successor.len()).rev() {
            successor[i] += 1;
            if successor[i] < self.radices[i] {
                self.next = Some(successor);
                return Some(current);
            }
            successor[i] = 0;
        }

        Some(current)
    }
}
