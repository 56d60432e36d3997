// Core algorithm exports
pub mod deferred_acceptance;
pub mod error;
pub mod revision;
pub mod search;
pub mod space;
pub mod trace;

pub use deferred_acceptance::{
    deferred_acceptance, deferred_acceptance_observed, find_blocking_pair,
};
pub use error::MatchingError;
pub use revision::{derive_revisions, promote_matched, RevisionSet};
pub use search::{
    select_beneficial, CollectingSink, CountingSink, ManipulationSearch, RecordSink, SearchInput,
};
pub use space::{
    all_permutations, permutation_count, sample_permutations, CrossProduct, GeneratedSpace,
    PreferenceSpace, SpaceGenerator,
};
pub use trace::{MatchObserver, NoopObserver, RecordingObserver, TraceEvent, TracingObserver};
