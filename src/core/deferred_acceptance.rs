use std::collections::HashMap;

use crate::core::error::MatchingError;
use crate::core::trace::{MatchObserver, NoopObserver};
use crate::models::{AgentId, Matching, PreferenceProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProposerStatus {
    Free,
    Held,
    Exhausted,
}

/// Per-proposer bookkeeping, indexed by proposer position
#[derive(Debug, Clone, Copy)]
struct ProposerState {
    cursor: usize,
    status: ProposerStatus,
}

/// Both profiles translated to dense indices
///
/// `proposer_prefs[p]` lists receiver indices in preference order and
/// `receiver_rank[r][p]` is the rank receiver `r` gives proposer `p`.
struct IndexedMarket<'a> {
    proposer_ids: Vec<&'a AgentId>,
    receiver_ids: Vec<&'a AgentId>,
    proposer_prefs: Vec<Vec<usize>>,
    receiver_rank: Vec<Vec<usize>>,
}

impl<'a> IndexedMarket<'a> {
    fn build(
        proposers: &'a PreferenceProfile,
        receivers: &'a PreferenceProfile,
    ) -> Result<Self, MatchingError> {
        if proposers.len() != receivers.len() {
            return Err(MatchingError::PopulationMismatch {
                proposers: proposers.len(),
                receivers: receivers.len(),
            });
        }

        let proposer_ids: Vec<&AgentId> = proposers.iter().map(|(id, _)| id).collect();
        let receiver_ids: Vec<&AgentId> = receivers.iter().map(|(id, _)| id).collect();
        let proposer_index = index_of(&proposer_ids);
        let receiver_index = index_of(&receiver_ids);

        let proposer_prefs = proposers
            .iter()
            .map(|(owner, list)| to_indices(owner, list.as_slice(), &receiver_index))
            .collect::<Result<Vec<_>, _>>()?;

        let receiver_rank = receivers
            .iter()
            .map(|(owner, list)| {
                let order = to_indices(owner, list.as_slice(), &proposer_index)?;
                let mut rank = vec![0; order.len()];
                for (position, proposer) in order.into_iter().enumerate() {
                    rank[proposer] = position;
                }
                Ok(rank)
            })
            .collect::<Result<Vec<_>, MatchingError>>()?;

        Ok(Self {
            proposer_ids,
            receiver_ids,
            proposer_prefs,
            receiver_rank,
        })
    }

    fn size(&self) -> usize {
        self.proposer_ids.len()
    }
}

fn index_of<'a>(ids: &[&'a AgentId]) -> HashMap<&'a AgentId, usize> {
    ids.iter().enumerate().map(|(i, id)| (*id, i)).collect()
}

/// Translate one list to indices, checking it is a permutation of `index`'s keys
fn to_indices(
    owner: &AgentId,
    list: &[AgentId],
    index: &HashMap<&AgentId, usize>,
) -> Result<Vec<usize>, MatchingError> {
    if list.len() != index.len() {
        return Err(MatchingError::MalformedPreferenceList {
            agent: owner.clone(),
            reason: format!(
                "ranks {} agents but the opposite side has {}",
                list.len(),
                index.len()
            ),
        });
    }

    let mut seen = vec![false; index.len()];
    let mut out = Vec::with_capacity(list.len());
    for entry in list {
        let i = *index.get(entry).ok_or_else(|| MatchingError::MalformedPreferenceList {
            agent: owner.clone(),
            reason: format!("{} is not on the opposite side", entry),
        })?;
        if seen[i] {
            return Err(MatchingError::MalformedPreferenceList {
                agent: owner.clone(),
                reason: format!("{} is ranked more than once", entry),
            });
        }
        seen[i] = true;
        out.push(i);
    }
    Ok(out)
}

/// Proposer-optimal stable matching via synchronous deferred acceptance
///
/// Both profiles must cover populations of equal size and every list must
/// rank the whole opposite side. Validation happens before the first round.
pub fn deferred_acceptance(
    proposers: &PreferenceProfile,
    receivers: &PreferenceProfile,
) -> Result<Matching, MatchingError> {
    deferred_acceptance_observed(proposers, receivers, &mut NoopObserver)
}

/// [`deferred_acceptance`] reporting every round to `observer`
pub fn deferred_acceptance_observed<O>(
    proposers: &PreferenceProfile,
    receivers: &PreferenceProfile,
    observer: &mut O,
) -> Result<Matching, MatchingError>
where
    O: MatchObserver + ?Sized,
{
    let market = IndexedMarket::build(proposers, receivers)?;
    let n = market.size();

    let mut states = vec![
        ProposerState {
            cursor: 0,
            status: ProposerStatus::Free,
        };
        n
    ];
    let mut holds: Vec<Option<usize>> = vec![None; n];
    let mut offers: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut round = 0;

    loop {
        let free: Vec<usize> = (0..n)
            .filter(|&p| states[p].status == ProposerStatus::Free)
            .collect();
        if free.is_empty() {
            break;
        }

        round += 1;
        observer.round_started(round, free.len());

        // Proposal phase: every free proposer advances its cursor once
        for p in free {
            let state = &mut states[p];
            if state.cursor >= market.proposer_prefs[p].len() {
                state.status = ProposerStatus::Exhausted;
                observer.exhausted(market.proposer_ids[p]);
                continue;
            }

            let r = market.proposer_prefs[p][state.cursor];
            state.cursor += 1;
            offers[r].push(p);
            observer.proposed(market.proposer_ids[p], market.receiver_ids[r]);
        }

        // Decision phase: each receiver keeps the best of its pool
        for r in 0..n {
            if offers[r].is_empty() {
                continue;
            }

            let incumbent = holds[r];
            let rank = &market.receiver_rank[r];
            let best = match offers[r]
                .iter()
                .copied()
                .chain(incumbent)
                .min_by_key(|&p| rank[p])
            {
                Some(best) => best,
                None => continue,
            };

            holds[r] = Some(best);
            states[best].status = ProposerStatus::Held;
            observer.held(
                market.receiver_ids[r],
                market.proposer_ids[best],
                incumbent
                    .filter(|&p| p != best)
                    .map(|p| market.proposer_ids[p]),
            );

            for p in offers[r].drain(..).chain(incumbent) {
                if p != best {
                    states[p].status = ProposerStatus::Free;
                    observer.rejected(market.receiver_ids[r], market.proposer_ids[p]);
                }
            }
        }
    }

    Ok(Matching::from_pairs(holds.iter().enumerate().filter_map(
        |(r, hold)| {
            hold.map(|p| {
                (
                    market.proposer_ids[p].clone(),
                    market.receiver_ids[r].clone(),
                )
            })
        },
    )))
}

/// First pair that would rather be matched to each other, if any
///
/// An unmatched agent prefers any partner to none.
pub fn find_blocking_pair(
    proposers: &PreferenceProfile,
    receivers: &PreferenceProfile,
    matching: &Matching,
) -> Option<(AgentId, AgentId)> {
    let holders = matching.inverse();

    for (proposer, list) in proposers.iter() {
        let current_rank = matching
            .partner_of(proposer)
            .and_then(|partner| list.rank_of(partner))
            .unwrap_or(list.len());

        for receiver in &list.as_slice()[..current_rank] {
            let receiver_list = match receivers.get(receiver) {
                Some(l) => l,
                None => continue,
            };
            let proposer_rank = match receiver_list.rank_of(proposer) {
                Some(rank) => rank,
                None => continue,
            };
            let holder_rank = holders
                .get(receiver)
                .and_then(|holder| receiver_list.rank_of(holder))
                .unwrap_or(receiver_list.len());

            if proposer_rank < holder_rank {
                return Some((proposer.clone(), receiver.clone()));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trace::{RecordingObserver, TraceEvent};

    fn scenario_a() -> (PreferenceProfile, PreferenceProfile) {
        let students = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1", "c3", "c2"]),
            ("s2", &["c1", "c2", "c3"]),
            ("s3", &["c3", "c1", "c2"]),
        ])
        .unwrap();
        let schools = PreferenceProfile::from_str_pairs(&[
            ("c1", &["s3", "s2", "s1"]),
            ("c2", &["s1", "s2", "s3"]),
            ("c3", &["s1", "s2", "s3"]),
        ])
        .unwrap();
        (students, schools)
    }

    #[test]
    fn test_scenario_a_matching() {
        let (students, schools) = scenario_a();
        let matching = deferred_acceptance(&students, &schools).unwrap();

        let expected = Matching::from_pairs([
            ("s1".into(), "c3".into()),
            ("s2".into(), "c2".into()),
            ("s3".into(), "c1".into()),
        ]);
        assert_eq!(matching, expected);
        assert_eq!(find_blocking_pair(&students, &schools, &matching), None);
    }

    #[test]
    fn test_scenario_a_trace() {
        let (students, schools) = scenario_a();
        let mut observer = RecordingObserver::new();
        deferred_acceptance_observed(&students, &schools, &mut observer).unwrap();

        // c1 keeps s2 over s1, c3 later trades s3 for s1, c1 trades s2 for s3
        assert_eq!(observer.rounds(), 4);
        assert!(observer.events.contains(&TraceEvent::Held {
            receiver: "c3".into(),
            proposer: "s1".into(),
            displaced: Some("s3".into()),
        }));
        assert!(observer.events.contains(&TraceEvent::Rejected {
            receiver: "c1".into(),
            proposer: "s1".into(),
        }));
        assert!(!observer
            .events
            .iter()
            .any(|e| matches!(e, TraceEvent::Exhausted { .. })));
    }

    #[test]
    fn test_population_mismatch() {
        let students = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1", "c2"]),
            ("s2", &["c2", "c1"]),
        ])
        .unwrap();
        let schools = PreferenceProfile::from_str_pairs(&[("c1", &["s1", "s2"])]).unwrap();

        assert_eq!(
            deferred_acceptance(&students, &schools),
            Err(MatchingError::PopulationMismatch {
                proposers: 2,
                receivers: 1
            })
        );
    }

    #[test]
    fn test_malformed_lists_rejected() {
        let schools = PreferenceProfile::from_str_pairs(&[
            ("c1", &["s1", "s2"]),
            ("c2", &["s1", "s2"]),
        ])
        .unwrap();

        let truncated = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1"]),
            ("s2", &["c2", "c1"]),
        ])
        .unwrap();
        let repeated = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1", "c1"]),
            ("s2", &["c2", "c1"]),
        ])
        .unwrap();
        let foreign = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1", "c7"]),
            ("s2", &["c2", "c1"]),
        ])
        .unwrap();

        for students in [truncated, repeated, foreign] {
            let err = deferred_acceptance(&students, &schools).unwrap_err();
            let blamed_s1 = matches!(
                err,
                MatchingError::MalformedPreferenceList { ref agent, .. } if agent.as_str() == "s1"
            );
            assert!(blamed_s1, "unexpected error: {}", err);
        }
    }

    #[test]
    fn test_receiver_list_validated() {
        let students = PreferenceProfile::from_str_pairs(&[
            ("s1", &["c1", "c2"]),
            ("s2", &["c2", "c1"]),
        ])
        .unwrap();
        let schools = PreferenceProfile::from_str_pairs(&[
            ("c1", &["s1", "s2"]),
            ("c2", &["s2", "s9"]),
        ])
        .unwrap();

        assert!(matches!(
            deferred_acceptance(&students, &schools),
            Err(MatchingError::MalformedPreferenceList { .. })
        ));
    }

    #[test]
    fn test_idempotent() {
        let (students, schools) = scenario_a();
        let first = deferred_acceptance(&students, &schools).unwrap();
        let second = deferred_acceptance(&students, &schools).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_market() {
        let empty = PreferenceProfile::default();
        let matching = deferred_acceptance(&empty, &empty).unwrap();
        assert!(matching.is_empty());
    }

    #[test]
    fn test_blocking_pair_detected() {
        let (students, schools) = scenario_a();
        // s1 sits at its last choice and c3 would rather hold s1 than s2
        let unstable = Matching::from_pairs([
            ("s1".into(), "c2".into()),
            ("s2".into(), "c3".into()),
            ("s3".into(), "c1".into()),
        ]);
        assert_eq!(
            find_blocking_pair(&students, &schools, &unstable),
            Some(("s1".into(), "c3".into()))
        );
    }
}
