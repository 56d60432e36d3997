//! Twostage DA - deferred-acceptance matching and two-round manipulation search
//!
//! This library provides a proposer-optimal deferred-acceptance engine for
//! one-to-one markets, the bounded preference revisions an agent may report
//! in a second round, and a search that looks for profiles where misreporting
//! in the first round pays off after the second.

pub mod config;
pub mod core;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use crate::core::{
    deferred_acceptance, derive_revisions, ManipulationSearch, MatchingError, RecordSink,
    SearchInput,
};
pub use crate::models::{
    AgentId, ExplorationRecord, Market, Matching, PreferenceList, PreferenceProfile, RunMetadata,
    SearchPolicy,
};
