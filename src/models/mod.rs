// Model exports
pub mod domain;
pub mod records;

pub use domain::{AgentId, Market, Matching, PreferenceList, PreferenceProfile};
pub use records::{
    ExplorationRecord, RecordSelection, Retention, RunMetadata, SampleClamp, SearchCounters,
    SearchPolicy, SpaceMode,
};
