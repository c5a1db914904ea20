//! Cross-session aggregation of profiling call trees.
//!
//! One [`Aggregator`] instance consumes the raw profiles of many sessions of
//! the same platform, buckets every completed function call, selects the
//! slowest functions by their 75th-percentile duration, and merges the call
//! trees containing each of them into deduplicated patterns carrying
//! duration distributions. [`aggregate_profiles`] drives a whole batch.
//!
//! Aggregator instances share nothing: concurrent runs are independent
//! values, and a single run is strictly sequential.

use serde::{Deserialize, Serialize};

mod androidtrace;
mod backtrace;
mod error;
mod functions;
mod merge;
mod registry;
mod types;
mod utils;

pub use crate::androidtrace::AndroidTraceAggregator;
pub use crate::backtrace::BacktraceProfileAggregator;
pub use crate::error::AggregateError;
pub use crate::merge::merge_all_call_trees;
pub use crate::registry::{aggregator_from_platform, Aggregator};
pub use crate::types::{Aggregate, CallTree, Frame, FunctionCall, Quantiles};
pub use crate::utils::{DisplayMode, DEFAULT_TOP_N_FUNCTIONS};

/// One profiling session as handed over by the storage layer: the raw
/// profile document plus the metadata identifying the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub platform: String,
    /// The raw profile document, still serialized.
    pub payload: Vec<u8>,
    pub profile_id: String,
    pub transaction_name: String,
}

/// An [`Aggregate`] along with how many profiles produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationResult {
    pub row_count: u32,
    pub aggregation: Aggregate,
}

/// Aggregates a batch of profiles of one platform.
///
/// The profiles must all belong to the platform of the first one. A profile
/// that fails to convert aborts the batch; callers wanting skip-and-log
/// semantics drive an [`Aggregator`] themselves.
pub fn aggregate_profiles(
    profiles: &[ProfileRecord],
    top_n_functions: usize,
) -> Result<AggregationResult, AggregateError> {
    let Some(first) = profiles.first() else {
        return Ok(AggregationResult::default());
    };

    let mut aggregator = aggregator_from_platform(&first.platform)?;
    if top_n_functions > 0 {
        aggregator.set_top_n_functions(top_n_functions);
    }

    for profile in profiles {
        aggregator.update_from_profile(profile)?;
    }

    Ok(AggregationResult {
        row_count: profiles.len() as u32,
        aggregation: aggregator.result()?,
    })
}
