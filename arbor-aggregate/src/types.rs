use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use arbor_calltree::frame_identifier;
use arbor_quantile::Quantile;

/// The final result of one aggregation run: the ranked function statistics
/// and, per function key, its deduplicated call trees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(rename = "function_call")]
    pub function_calls: Vec<FunctionCall>,
    pub function_to_call_trees: BTreeMap<String, Vec<CallTree>>,
}

/// Aggregated statistics for one function across all profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The name of the binary or package the function is in.
    pub image: String,
    /// String representation of the function name.
    pub symbol: String,

    /// Wall time distribution for executions of the function.
    pub duration_ns: Quantiles,

    /// How frequently the function is called per profile, including zero
    /// entries for the profiles that never called it.
    pub frequency: Quantiles,

    /// Share of calls that happened on the main thread, in [0, 1].
    pub main_thread_percent: f32,

    /// Share of calls per thread name, in [0, 1], main thread included.
    pub thread_name_to_percent: BTreeMap<String, f32>,

    /// Line of the function in its original source file, 0 when unknown.
    pub line: u32,

    /// Path to the source file containing the function, empty when unknown.
    pub path: String,

    /// Unique, sorted list of the profiles this function appears in.
    pub profile_ids: Vec<String>,

    pub profile_id_to_thread_id: BTreeMap<String, u64>,

    /// The key to look this function up in the function-to-call-trees map.
    pub key: String,

    /// Unique list of transaction names where this function is found.
    pub transaction_names: Vec<String>,
}

/// One deduplicated call tree pattern and how often it was recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallTree {
    /// Identifies the pattern of this call tree: an MD5 hash over the image
    /// and symbol of its frames, recursively.
    pub id: String,

    /// The number of times this call tree pattern was recorded.
    pub count: u64,

    /// How often this pattern was recorded per thread name.
    pub thread_name_to_count: BTreeMap<String, u64>,

    /// Profiles this pattern appears in, down-sampled to a bounded number
    /// of exemplars.
    pub profile_ids: Vec<String>,

    pub root_frame: Frame,
}

/// One node of an aggregated call tree as exposed to consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    /// A stable identifier for this frame within its tree: an MD5 hash over
    /// the image and symbol of this node and all of its ancestors, so a
    /// function appearing at several positions gets one ID per position.
    pub id: String,

    pub image: String,
    pub symbol: String,

    /// Whether the symbol lives in application code rather than system or
    /// SDK code.
    pub is_application_symbol: bool,

    pub line: u32,
    #[serde(skip)]
    pub path: String,

    /// Wall time distribution for the function and its callees.
    pub total_duration_ns: Quantiles,
    #[serde(skip)]
    pub total_duration_ns_values: Vec<f64>,

    pub children: Vec<Frame>,

    /// Wall time distribution for the function alone.
    pub self_duration_ns: Quantiles,
    #[serde(skip)]
    pub self_duration_ns_values: Vec<f64>,
}

impl Frame {
    pub fn identifier(&self) -> String {
        frame_identifier(&self.image, &self.symbol)
    }
}

/// The fixed percentile summary attached to every duration distribution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Quantiles {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl From<&Quantile> for Quantiles {
    fn from(quantile: &Quantile) -> Self {
        Quantiles {
            p50: quantile.percentile(0.5),
            p75: quantile.percentile(0.75),
            p90: quantile.percentile(0.90),
            p95: quantile.percentile(0.95),
            p99: quantile.percentile(0.99),
        }
    }
}
