use chrono::Utc;
use rand::Rng;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::deferred_acceptance::{deferred_acceptance_observed, find_blocking_pair};
use crate::core::error::MatchingError;
use crate::core::revision::{derive_revisions, RevisionSet};
use crate::core::space::{CrossProduct, PreferenceSpace, SpaceGenerator};
use crate::core::trace::{MatchObserver, TracingObserver};
use crate::models::{
    AgentId, ExplorationRecord, Market, Matching, PreferenceList, PreferenceProfile,
    RecordSelection, Retention, RunMetadata, SampleClamp, SearchCounters, SearchPolicy, SpaceMode,
};

/// Destination for exploration records as they are produced
pub trait RecordSink {
    fn accept(&mut self, record: ExplorationRecord);
}

impl<F> RecordSink for F
where
    F: FnMut(ExplorationRecord),
{
    fn accept(&mut self, record: ExplorationRecord) {
        self(record)
    }
}

/// Sink that keeps records in memory
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    retention: Retention,
    records: Vec<ExplorationRecord>,
}

impl CollectingSink {
    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[ExplorationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ExplorationRecord> {
        self.records
    }
}

impl RecordSink for CollectingSink {
    fn accept(&mut self, record: ExplorationRecord) {
        if self.retention == Retention::All || record.beneficial {
            self.records.push(record);
        }
    }
}

/// Sink that only counts
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingSink {
    pub records: u64,
    pub beneficial: u64,
}

impl RecordSink for CountingSink {
    fn accept(&mut self, record: ExplorationRecord) {
        self.records += 1;
        if record.beneficial {
            self.beneficial += 1;
        }
    }
}

/// Beneficial records in emission order, or only the first of them
pub fn select_beneficial(
    records: &[ExplorationRecord],
    selection: RecordSelection,
) -> Vec<&ExplorationRecord> {
    let beneficial = records.iter().filter(|r| r.beneficial);
    match selection {
        RecordSelection::First => beneficial.take(1).collect(),
        RecordSelection::All => beneficial.collect(),
    }
}

/// Everything one search run explores
#[derive(Debug, Clone)]
pub struct SearchInput {
    pub market: Market,
    pub distinguished: AgentId,
    pub truthful: PreferenceList,
    pub false_reports: Vec<PreferenceList>,
    /// Candidate lists for every other proposer and every receiver
    pub space: PreferenceSpace,
    pub mode: SpaceMode,
    pub clamps: Vec<SampleClamp>,
}

impl SearchInput {
    /// Input over a caller-supplied space
    pub fn new(
        market: Market,
        distinguished: AgentId,
        truthful: PreferenceList,
        false_reports: Vec<PreferenceList>,
        space: PreferenceSpace,
    ) -> Self {
        Self {
            market,
            distinguished,
            truthful,
            false_reports,
            space,
            mode: SpaceMode::Supplied,
            clamps: Vec::new(),
        }
    }
}

/// Manipulation search orchestrator
///
/// For every combination of the other agents' reports it runs DA with the
/// distinguished proposer truthful, then with each false report. Whenever a
/// false report changes the first round, every other proposer's revision
/// set is derived from the strategic matching and the distinguished agent
/// returns to its true list for a second DA run over the cross-product of
/// revisions. A second-round outcome is beneficial when the distinguished
/// agent ends strictly higher in its true list than under honest play.
#[derive(Debug, Clone)]
pub struct ManipulationSearch {
    policy: SearchPolicy,
}

impl ManipulationSearch {
    pub fn new(policy: SearchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    /// Generate the preference space for `market` and derive the false reports
    pub fn prepare<R>(
        &self,
        market: Market,
        distinguished: AgentId,
        truthful: PreferenceList,
        rng: &mut R,
    ) -> Result<SearchInput, MatchingError>
    where
        R: Rng + ?Sized,
    {
        if !market.is_proposer(&distinguished) {
            return Err(MatchingError::UnknownAgent {
                agent: distinguished,
            });
        }
        truthful.check_permutation_of(&distinguished, market.receivers())?;

        let generated = SpaceGenerator::from_policy(&self.policy).generate(&market, rng);
        let false_reports = generated
            .space
            .get(&distinguished)
            .unwrap_or_default()
            .iter()
            .filter(|list| **list != truthful)
            .cloned()
            .collect();

        Ok(SearchInput {
            market,
            distinguished,
            truthful,
            false_reports,
            space: generated.space,
            mode: generated.mode,
            clamps: generated.clamps,
        })
    }

    fn validate(&self, input: &SearchInput) -> Result<(), MatchingError> {
        if !input.market.is_proposer(&input.distinguished) {
            return Err(MatchingError::UnknownAgent {
                agent: input.distinguished.clone(),
            });
        }

        let receivers = input.market.receivers();
        input
            .truthful
            .check_permutation_of(&input.distinguished, receivers)?;
        for report in &input.false_reports {
            report.check_permutation_of(&input.distinguished, receivers)?;
        }
        Ok(())
    }

    /// Explore every combination, pushing records into `sink`
    ///
    /// A combination whose reports fail validation is skipped and counted.
    /// Invariant violations abort the run. Engine events go to `tracing`.
    pub fn run<S>(&self, input: &SearchInput, sink: &mut S) -> Result<RunMetadata, MatchingError>
    where
        S: RecordSink + ?Sized,
    {
        self.run_observed(input, sink, &mut TracingObserver)
    }

    /// [`ManipulationSearch::run`] reporting every engine call to `observer`
    ///
    /// Per combination the observer sees the honest first round, then each
    /// strategic first round, then the second rounds of reports that were
    /// not pruned.
    pub fn run_observed<S, O>(
        &self,
        input: &SearchInput,
        sink: &mut S,
        observer: &mut O,
    ) -> Result<RunMetadata, MatchingError>
    where
        S: RecordSink + ?Sized,
        O: MatchObserver + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.validate(input)?;

        let others: Vec<&AgentId> = input
            .market
            .proposers()
            .iter()
            .filter(|p| **p != input.distinguished)
            .collect();

        let axes = others
            .iter()
            .copied()
            .chain(input.market.receivers())
            .map(|agent| match input.space.get(agent) {
                Some(lists) if !lists.is_empty() => Ok((agent, lists)),
                _ => Err(MatchingError::EmptySpace {
                    agent: agent.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let combinations = CrossProduct::new(axes.iter().map(|(_, lists)| lists.len()).collect());
        info!(
            %run_id,
            population = input.market.size(),
            distinguished = %input.distinguished,
            false_reports = input.false_reports.len(),
            combinations = ?combinations.total(),
            "Starting manipulation search"
        );

        let mut counters = SearchCounters::default();
        let mut beneficial_cap_reached = false;
        let mut combination_cap_reached = false;

        for (index, choice) in combinations.enumerate() {
            let index = index as u64;
            if let Some(max) = self.policy.max_combinations {
                if index >= max {
                    combination_cap_reached = true;
                    info!(max, "Combination cap reached");
                    break;
                }
            }

            let explored = self.explore_combination(
                index,
                input,
                &others,
                &axes,
                &choice,
                sink,
                observer,
                &mut counters,
            );
            match explored {
                Ok(flow) => {
                    counters.combinations_explored += 1;
                    if flow.is_break() {
                        beneficial_cap_reached = true;
                        info!(beneficial = counters.beneficial, "Beneficial cap reached");
                        break;
                    }
                }
                Err(e) if e.is_invariant_violation() => {
                    error!(combination = index, "Aborting search: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(combination = index, "Skipping combination: {}", e);
                    counters.combinations_skipped += 1;
                }
            }
        }

        let metadata = RunMetadata {
            run_id,
            started_at,
            finished_at: Utc::now(),
            population: input.market.size(),
            distinguished: input.distinguished.clone(),
            truthful: input.truthful.clone(),
            mode: input.mode,
            seed: self.policy.seed,
            clamps: input.clamps.clone(),
            counters,
            beneficial_cap_reached,
            combination_cap_reached,
        };

        info!(
            %run_id,
            explored = counters.combinations_explored,
            skipped = counters.combinations_skipped,
            pruned = counters.false_reports_pruned,
            records = counters.records_emitted,
            beneficial = counters.beneficial,
            exhaustive = metadata.is_exhaustive_claim(),
            "Manipulation search finished"
        );

        Ok(metadata)
    }

    #[allow(clippy::too_many_arguments)]
    fn explore_combination<S, O>(
        &self,
        index: u64,
        input: &SearchInput,
        others: &[&AgentId],
        axes: &[(&AgentId, &[PreferenceList])],
        choice: &[usize],
        sink: &mut S,
        observer: &mut O,
        counters: &mut SearchCounters,
    ) -> Result<ControlFlow<()>, MatchingError>
    where
        S: RecordSink + ?Sized,
        O: MatchObserver + ?Sized,
    {
        let distinguished = &input.distinguished;
        let split = others.len();

        let honest_profile = PreferenceProfile::new(
            std::iter::once((distinguished.clone(), input.truthful.clone())).chain(
                axes[..split]
                    .iter()
                    .zip(&choice[..split])
                    .map(|((agent, lists), &pick)| ((*agent).clone(), lists[pick].clone())),
            ),
        )?;
        let receiver_profile = PreferenceProfile::new(
            axes[split..]
                .iter()
                .zip(&choice[split..])
                .map(|((agent, lists), &pick)| ((*agent).clone(), lists[pick].clone())),
        )?;

        let honest = deferred_acceptance_observed(&honest_profile, &receiver_profile, observer)?;
        debug_assert!(find_blocking_pair(&honest_profile, &receiver_profile, &honest).is_none());
        let honest_rank = self.rank_in_truth(input, &honest)?;

        let honest_profile = Arc::new(honest_profile);
        let receiver_profile = Arc::new(receiver_profile);
        let honest = Arc::new(honest);

        for false_report in &input.false_reports {
            let strategic_profile = honest_profile.with_list(distinguished, false_report.clone());
            let strategic =
                deferred_acceptance_observed(&strategic_profile, &receiver_profile, observer)?;

            if strategic == *honest {
                counters.false_reports_pruned += 1;
                debug!(
                    combination = index,
                    false_report = %false_report,
                    "False report leaves first round unchanged, pruning"
                );
                continue;
            }

            let revision_sets = others
                .iter()
                .map(|agent| {
                    let reported = strategic_profile.get(agent).ok_or_else(|| {
                        MatchingError::UnknownAgent {
                            agent: (*agent).clone(),
                        }
                    })?;
                    derive_revisions(&strategic, agent, reported).map(|set| (*agent, set))
                })
                .collect::<Result<Vec<(&AgentId, RevisionSet)>, _>>()?;
            let strategic = Arc::new(strategic);

            let revision_points =
                CrossProduct::new(revision_sets.iter().map(|(_, set)| set.len()).collect());
            for point in revision_points {
                let mut second_profile = (*honest_profile).clone();
                let mut revision_choice = BTreeMap::new();
                for ((agent, set), &pick) in revision_sets.iter().zip(&point) {
                    if let Some(list) = set.get(pick) {
                        second_profile.set_list(agent, list.clone());
                    }
                    revision_choice.insert((*agent).clone(), pick);
                }

                let second =
                    deferred_acceptance_observed(&second_profile, &receiver_profile, observer)?;
                let strategic_rank = self.rank_in_truth(input, &second)?;
                let beneficial = strategic_rank < honest_rank;

                sink.accept(ExplorationRecord {
                    combination_index: index,
                    distinguished: distinguished.clone(),
                    proposer_profile: Arc::clone(&honest_profile),
                    receiver_profile: Arc::clone(&receiver_profile),
                    false_report: false_report.clone(),
                    honest_first_round: Arc::clone(&honest),
                    strategic_first_round: Arc::clone(&strategic),
                    revision_choice,
                    second_round_profile: second_profile,
                    strategic_second_round: second,
                    honest_rank,
                    strategic_rank,
                    beneficial,
                });
                counters.records_emitted += 1;

                if beneficial {
                    counters.beneficial += 1;
                    debug!(
                        combination = index,
                        false_report = %false_report,
                        honest_rank,
                        strategic_rank,
                        "Beneficial manipulation found"
                    );
                    if let Some(cap) = self.policy.beneficial_cap {
                        if counters.beneficial >= cap {
                            return Ok(ControlFlow::Break(()));
                        }
                    }
                }
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Rank of the distinguished agent's partner in its true list
    fn rank_in_truth(
        &self,
        input: &SearchInput,
        matching: &Matching,
    ) -> Result<usize, MatchingError> {
        let partner = matching
            .partner_of(&input.distinguished)
            .ok_or_else(|| MatchingError::UnmatchedAgent {
                agent: input.distinguished.clone(),
            })?;
        input
            .truthful
            .rank_of(partner)
            .ok_or_else(|| MatchingError::MatchedEntryNotFound {
                agent: input.distinguished.clone(),
                matched: partner.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::all_permutations;
    use crate::core::trace::{RecordingObserver, TraceEvent};

    fn list(raw: &[&str]) -> PreferenceList {
        PreferenceList::from_ids(raw.iter().copied())
    }

    /// One fixed combination where s1 is honestly matched to its second choice
    fn single_combination_input() -> SearchInput {
        let market = Market::with_population(3);
        let truthful = list(&["c1", "c2", "c3"]);
        let false_reports = all_permutations(market.receivers())
            .into_iter()
            .filter(|l| *l != truthful)
            .collect();
        let space: PreferenceSpace = [
            ("s2", list(&["c1", "c2", "c3"])),
            ("s3", list(&["c3", "c1", "c2"])),
            ("c1", list(&["s3", "s2", "s1"])),
            ("c2", list(&["s1", "s2", "s3"])),
            ("c3", list(&["s1", "s2", "s3"])),
        ]
        .into_iter()
        .map(|(agent, l)| (AgentId::from(agent), vec![l]))
        .collect();

        SearchInput::new(market, "s1".into(), truthful, false_reports, space)
    }

    #[test]
    fn test_beneficial_flags_follow_ranks() {
        let input = single_combination_input();
        let mut sink = CollectingSink::new(Retention::All);
        let metadata = ManipulationSearch::new(SearchPolicy::default())
            .run(&input, &mut sink)
            .unwrap();

        assert_eq!(metadata.counters.combinations_explored, 1);
        assert_eq!(metadata.counters.records_emitted, 12);
        assert_eq!(metadata.counters.beneficial, 3);
        assert_eq!(metadata.counters.false_reports_pruned, 2);

        for record in sink.records() {
            assert_eq!(record.honest_rank, 1);
            assert_eq!(record.honest_partner(), Some(&AgentId::from("c2")));
            assert_eq!(record.beneficial, record.strategic_rank < 1);
        }

        let beneficial = select_beneficial(sink.records(), RecordSelection::All);
        assert_eq!(beneficial.len(), 3);
        for record in beneficial {
            assert_eq!(record.strategic_rank, 0);
            assert_eq!(record.strategic_partner(), Some(&AgentId::from("c1")));
            assert_eq!(
                record.second_round_profile.get(&"s2".into()),
                Some(&list(&["c2", "c1", "c3"]))
            );
            assert_eq!(
                record.second_round_profile.get(&"s1".into()),
                Some(&list(&["c1", "c2", "c3"]))
            );
        }
    }

    #[test]
    fn test_unchanged_first_round_is_pruned() {
        let input = single_combination_input();
        let mut sink = CollectingSink::new(Retention::All);
        ManipulationSearch::new(SearchPolicy::default())
            .run(&input, &mut sink)
            .unwrap();

        for pruned in [list(&["c2", "c1", "c3"]), list(&["c2", "c3", "c1"])] {
            assert!(sink.records().iter().all(|r| r.false_report != pruned));
        }
    }

    #[test]
    fn test_beneficial_cap_stops_search() {
        let input = single_combination_input();
        let policy = SearchPolicy {
            beneficial_cap: Some(1),
            ..SearchPolicy::default()
        };
        let mut sink = CollectingSink::new(Retention::Beneficial);
        let metadata = ManipulationSearch::new(policy).run(&input, &mut sink).unwrap();

        assert!(metadata.beneficial_cap_reached);
        assert!(!metadata.is_exhaustive_claim());
        assert_eq!(metadata.counters.beneficial, 1);
        assert_eq!(sink.records().len(), 1);
        // [c1,c3,c2] is the first false report; its second revision point is beneficial
        assert_eq!(metadata.counters.records_emitted, 2);
    }

    #[test]
    fn test_combination_cap() {
        let market = Market::with_population(3);
        let search = ManipulationSearch::new(SearchPolicy {
            max_combinations: Some(10),
            ..SearchPolicy::default()
        });
        let input = search
            .prepare(
                market,
                "s1".into(),
                list(&["c1", "c2", "c3"]),
                &mut search.policy().rng(),
            )
            .unwrap();
        let mut sink = CountingSink::default();
        let metadata = search.run(&input, &mut sink).unwrap();

        assert!(metadata.combination_cap_reached);
        assert_eq!(metadata.counters.combinations_explored, 10);
        assert_eq!(sink.records, metadata.counters.records_emitted);
    }

    #[test]
    fn test_malformed_combination_is_skipped() {
        let mut input = single_combination_input();
        input.space.insert(
            "c1".into(),
            vec![list(&["s3", "s2", "s1"]), list(&["s3", "s2"])],
        );

        let mut sink = CountingSink::default();
        let metadata = ManipulationSearch::new(SearchPolicy::default())
            .run(&input, &mut sink)
            .unwrap();

        assert_eq!(metadata.counters.combinations_explored, 1);
        assert_eq!(metadata.counters.combinations_skipped, 1);
        assert_eq!(sink.records, 12);
    }

    #[test]
    fn test_unknown_distinguished_agent() {
        let mut input = single_combination_input();
        input.distinguished = "s9".into();
        let search = ManipulationSearch::new(SearchPolicy::default());
        let result = search.run(&input, &mut CountingSink::default());
        assert!(matches!(result, Err(MatchingError::UnknownAgent { .. })));
    }

    #[test]
    fn test_missing_space_rejected() {
        let mut input = single_combination_input();
        input.space.insert("c2".into(), Vec::new());
        let search = ManipulationSearch::new(SearchPolicy::default());
        let result = search.run(&input, &mut CountingSink::default());
        assert_eq!(result.unwrap_err(), MatchingError::EmptySpace { agent: "c2".into() });
    }

    #[test]
    fn test_prepare_excludes_truthful_report() {
        let search = ManipulationSearch::new(SearchPolicy::default());
        let truthful = list(&["c1", "c2", "c3"]);
        let input = search
            .prepare(
                Market::with_population(3),
                "s1".into(),
                truthful.clone(),
                &mut search.policy().rng(),
            )
            .unwrap();

        assert_eq!(input.mode, SpaceMode::Exhaustive);
        assert_eq!(input.false_reports.len(), 5);
        assert!(!input.false_reports.contains(&truthful));
    }

    #[test]
    fn test_closure_sink() {
        let input = single_combination_input();
        let mut seen = 0u64;
        let mut sink = |_record: ExplorationRecord| seen += 1;
        ManipulationSearch::new(SearchPolicy::default())
            .run(&input, &mut sink)
            .unwrap();
        assert_eq!(seen, 12);
    }

    #[test]
    fn test_observer_sees_every_engine_call() {
        let input = single_combination_input();
        let mut observer = RecordingObserver::new();
        let metadata = ManipulationSearch::new(SearchPolicy::default())
            .run_observed(&input, &mut CountingSink::default(), &mut observer)
            .unwrap();

        // One honest run, five strategic first rounds, twelve second rounds
        let runs = observer
            .events
            .iter()
            .filter(|e| matches!(e, TraceEvent::RoundStarted { round: 1, .. }))
            .count();
        assert_eq!(metadata.counters.records_emitted, 12);
        assert_eq!(runs, 1 + 5 + 12);

        // The first beneficial second round lets c1 hold s1 over s3
        assert!(observer.events.contains(&TraceEvent::Held {
            receiver: "c1".into(),
            proposer: "s1".into(),
            displaced: None,
        }));
    }
}
