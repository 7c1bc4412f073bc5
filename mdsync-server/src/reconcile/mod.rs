//! Reconciliation engine
//!
//! Normalizes titles, indexes the remote catalog and resolves which remote
//! records correspond to which imported titles. [`pipeline`] composes the
//! phases into the follow job run by the worker.

pub mod index;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod types;

pub use index::{OwnerSets, TitleIndex};
pub use matcher::{distance_threshold, match_direct, match_fuzzy, match_search_results};
pub use normalize::normalize;
pub use pipeline::{run_follow, FollowRequest, FollowSummary, SyncError};
pub use types::{
    CatalogRecord, ImportEntry, LocalizedTitles, MatchInfo, MatchResult, MatchType, RecordId,
};
