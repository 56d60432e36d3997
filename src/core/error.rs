use thiserror::Error;

use crate::models::AgentId;

/// Errors raised by the engine, the revision generator and the search
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchingError {
    #[error("population mismatch: {proposers} proposers vs {receivers} receivers")]
    PopulationMismatch { proposers: usize, receivers: usize },

    #[error("malformed preference list for {agent}: {reason}")]
    MalformedPreferenceList { agent: AgentId, reason: String },

    #[error("duplicate agent id: {agent}")]
    DuplicateAgent { agent: AgentId },

    #[error("{agent} was matched to {matched}, which its preference list does not contain")]
    MatchedEntryNotFound { agent: AgentId, matched: AgentId },

    #[error("{agent} is unmatched in a completed matching")]
    UnmatchedAgent { agent: AgentId },

    #[error("unknown agent: {agent}")]
    UnknownAgent { agent: AgentId },

    #[error("no candidate preference lists for {agent}")]
    EmptySpace { agent: AgentId },
}

impl MatchingError {
    /// Errors that signal an engine/revision invariant break rather than bad input
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            MatchingError::MatchedEntryNotFound { .. } | MatchingError::UnmatchedAgent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_classification() {
        let fatal = MatchingError::MatchedEntryNotFound {
            agent: "s2".into(),
            matched: "c9".into(),
        };
        let input = MatchingError::PopulationMismatch {
            proposers: 3,
            receivers: 2,
        };
        assert!(fatal.is_invariant_violation());
        assert!(!input.is_invariant_violation());
    }

    #[test]
    fn test_error_messages() {
        let err = MatchingError::PopulationMismatch {
            proposers: 3,
            receivers: 2,
        };
        assert_eq!(err.to_string(), "population mismatch: 3 proposers vs 2 receivers");
    }
}
