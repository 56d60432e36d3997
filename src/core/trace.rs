use serde::{Deserialize, Serialize};

use crate::models::AgentId;

/// Receives the events of one deferred-acceptance run
///
/// Every method has an empty default so observers only implement what
/// they care about.
pub trait MatchObserver {
    fn round_started(&mut self, _round: usize, _unmatched: usize) {}

    fn proposed(&mut self, _proposer: &AgentId, _receiver: &AgentId) {}

    /// `receiver` now holds `proposer`; `displaced` lost its hold this round
    fn held(&mut self, _receiver: &AgentId, _proposer: &AgentId, _displaced: Option<&AgentId>) {}

    fn rejected(&mut self, _receiver: &AgentId, _proposer: &AgentId) {}

    fn exhausted(&mut self, _proposer: &AgentId) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MatchObserver for NoopObserver {}

/// Observer that forwards events to `tracing` at trace level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MatchObserver for TracingObserver {
    fn round_started(&mut self, round: usize, unmatched: usize) {
        tracing::trace!(round, unmatched, "DA round started");
    }

    fn proposed(&mut self, proposer: &AgentId, receiver: &AgentId) {
        tracing::trace!("{} proposes to {}", proposer, receiver);
    }

    fn held(&mut self, receiver: &AgentId, proposer: &AgentId, displaced: Option<&AgentId>) {
        match displaced {
            Some(previous) => {
                tracing::trace!("{} holds {}, displacing {}", receiver, proposer, previous)
            }
            None => tracing::trace!("{} holds {}", receiver, proposer),
        }
    }

    fn rejected(&mut self, receiver: &AgentId, proposer: &AgentId) {
        tracing::trace!("{} rejects {}", receiver, proposer);
    }

    fn exhausted(&mut self, proposer: &AgentId) {
        tracing::warn!("{} exhausted its preference list", proposer);
    }
}

/// A single engine event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    RoundStarted { round: usize, unmatched: usize },
    Proposed { proposer: AgentId, receiver: AgentId },
    Held { receiver: AgentId, proposer: AgentId, displaced: Option<AgentId> },
    Rejected { receiver: AgentId, proposer: AgentId },
    Exhausted { proposer: AgentId },
}

/// Observer that keeps the full event log
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub events: Vec<TraceEvent>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::RoundStarted { .. }))
            .count()
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl MatchObserver for RecordingObserver {
    fn round_started(&mut self, round: usize, unmatched: usize) {
        self.events.push(TraceEvent::RoundStarted { round, unmatched });
    }

    fn proposed(&mut self, proposer: &AgentId, receiver: &AgentId) {
        self.events.push(TraceEvent::Proposed {
            proposer: proposer.clone(),
            receiver: receiver.clone(),
        });
    }

    fn held(&mut self, receiver: &AgentId, proposer: &AgentId, displaced: Option<&AgentId>) {
        self.events.push(TraceEvent::Held {
            receiver: receiver.clone(),
            proposer: proposer.clone(),
            displaced: displaced.cloned(),
        });
    }

    fn rejected(&mut self, receiver: &AgentId, proposer: &AgentId) {
        self.events.push(TraceEvent::Rejected {
            receiver: receiver.clone(),
            proposer: proposer.clone(),
        });
    }

    fn exhausted(&mut self, proposer: &AgentId) {
        self.events.push(TraceEvent::Exhausted {
            proposer: proposer.clone(),
        });
    }
}
