use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use arbor_calltree::{AggregateCallTree, CallTreeAggregator, Node};
use arbor_quantile::Quantile;

use crate::types::{CallTree, FunctionCall, Quantiles};
use crate::utils::{
    new_call_tree_frame, select_exemplar_profile_ids, sort_call_trees, DisplayMode,
    DEFAULT_EXEMPLAR_PROFILES,
};

/// Points at one completed call tree within the archived per-profile
/// forests.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TreeRef {
    pub profile_id: String,
    pub thread_id: u64,
    pub index: usize,
}

/// One closed call of one function, ready to be bucketed.
#[derive(Clone, Debug)]
pub(crate) struct FunctionOccurrence {
    pub key: String,
    pub image: String,
    pub symbol: String,
    pub path: String,
    pub line: u32,
    pub duration_ns: u64,
    pub is_main_thread: bool,
    pub thread_id: u64,
    pub thread_name: String,
    pub profile_id: String,
    pub tree: TreeRef,
}

/// Accumulated data about one function across all profiles.
#[derive(Debug, Default)]
pub(crate) struct FunctionData {
    pub image: String,
    pub symbol: String,
    pub count: u64,
    pub durations_ns: Quantile,
    pub line: u32,
    pub path: String,
    pub main_thread_count: u64,
    pub profile_id_to_count: BTreeMap<String, u64>,
    pub profile_id_to_thread_id: BTreeMap<String, u64>,
    pub thread_names: BTreeMap<String, u64>,
    pub unique_call_trees: BTreeSet<TreeRef>,
}

/// A function selected by the ranking pass.
#[derive(Debug)]
pub(crate) struct RankedFunction<'a> {
    pub key: String,
    pub data: &'a FunctionData,
    pub duration_ns_p75: f64,
}

/// Buckets function call occurrences by function key and ranks them.
#[derive(Debug, Default)]
pub(crate) struct FunctionStats {
    buckets: HashMap<String, FunctionData>,
    profile_ids: BTreeSet<String>,
}

impl FunctionStats {
    /// Registers a profile, whether or not any of its calls survive
    /// filtering; the frequency distribution needs the full population.
    pub fn record_profile(&mut self, profile_id: &str) {
        self.profile_ids.insert(profile_id.to_owned());
    }

    pub fn add_occurrence(&mut self, occurrence: FunctionOccurrence) {
        let data = self
            .buckets
            .entry(occurrence.key)
            .or_insert_with(|| FunctionData {
                image: occurrence.image,
                symbol: occurrence.symbol,
                ..Default::default()
            });
        data.profile_id_to_thread_id
            .insert(occurrence.profile_id.clone(), occurrence.thread_id);
        *data
            .thread_names
            .entry(occurrence.thread_name)
            .or_default() += 1;
        data.durations_ns.add(occurrence.duration_ns as f64);
        *data
            .profile_id_to_count
            .entry(occurrence.profile_id)
            .or_default() += 1;
        data.count += 1;
        if occurrence.is_main_thread {
            data.main_thread_count += 1;
        }
        if data.path.is_empty() && !occurrence.path.is_empty() {
            data.path = occurrence.path;
            data.line = occurrence.line;
        }
        data.unique_call_trees.insert(occurrence.tree);
    }

    /// Ranks the buckets by their 75th-percentile duration, longest first,
    /// and returns the first `n`.
    ///
    /// Functions without a resolved display name and placeholder `unknown`
    /// symbols are not useful to show and are dropped before ranking. The
    /// function key breaks ties so the ranking is a total order, and `NaN`
    /// percentiles sort last.
    pub fn top_functions(&self, n: usize) -> Vec<RankedFunction<'_>> {
        let mut ranked: Vec<RankedFunction> = self
            .buckets
            .iter()
            .filter(|(_, data)| !data.symbol.is_empty() && !data.symbol.starts_with("unknown"))
            .map(|(key, data)| RankedFunction {
                key: key.clone(),
                data,
                duration_ns_p75: data.durations_ns.percentile(0.75),
            })
            .collect();

        ranked.sort_by(|a, b| {
            match (a.duration_ns_p75.is_nan(), b.duration_ns_p75.is_nan()) {
                (true, true) => a.key.cmp(&b.key),
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => b
                    .duration_ns_p75
                    .partial_cmp(&a.duration_ns_p75)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.key.cmp(&b.key)),
            }
        });
        ranked.truncate(n);
        ranked
    }

    /// Builds the final statistics records for the selected functions.
    pub fn build_function_calls(
        &self,
        top: &[RankedFunction<'_>],
        transaction_names: &HashMap<String, String>,
    ) -> Vec<FunctionCall> {
        let total_profiles = self.profile_ids.len();
        top.iter()
            .map(|ranked| {
                let data = ranked.data;
                let mut frequency: Vec<f64> = Vec::with_capacity(total_profiles);
                let mut profile_ids = Vec::with_capacity(data.profile_id_to_count.len());
                let mut interactions: Vec<String> = Vec::new();
                for (profile_id, &count) in &data.profile_id_to_count {
                    frequency.push(count as f64);
                    profile_ids.push(profile_id.clone());
                    let Some(name) = transaction_names.get(profile_id) else {
                        continue;
                    };
                    if !name.is_empty() && !interactions.contains(name) {
                        interactions.push(name.clone());
                    }
                }
                // One zero entry for every profile that did not contain any
                // occurrence of this function, so the frequency percentiles
                // describe the whole population.
                if frequency.len() < total_profiles {
                    frequency.resize(total_profiles, 0.0);
                }

                let total_count = data.count as f32;
                let thread_name_to_percent = data
                    .thread_names
                    .iter()
                    .map(|(name, &count)| (name.clone(), count as f32 / total_count))
                    .collect();

                FunctionCall {
                    image: data.image.clone(),
                    symbol: data.symbol.clone(),
                    duration_ns: Quantiles::from(&data.durations_ns),
                    frequency: Quantiles::from(&Quantile::from(frequency)),
                    main_thread_percent: data.main_thread_count as f32 / total_count,
                    thread_name_to_percent,
                    line: data.line,
                    path: data.path.clone(),
                    profile_ids,
                    profile_id_to_thread_id: data.profile_id_to_thread_id.clone(),
                    key: ranked.key.clone(),
                    transaction_names: interactions,
                }
            })
            .collect()
    }
}

/// One call of one closed node, pointing back at the tree it came from.
pub(crate) struct ClosedCall<'a> {
    pub root: &'a Node,
    pub node: &'a Node,
}

/// Collects every closed node of a tree as a function call occurrence.
///
/// Open nodes are skipped but their subtrees are still visited. A child
/// reporting a longer duration than its parent cannot be trusted; its whole
/// branch is skipped and logged with enough context to find the sample.
pub(crate) fn collect_closed_calls<'a>(
    profile_id: &str,
    root: &'a Node,
    node: &'a Node,
    calls: &mut Vec<ClosedCall<'a>>,
) {
    if node.end_ns == arbor_calltree::NO_END_TIME {
        for child in &node.children {
            collect_closed_calls(profile_id, root, child, calls);
        }
        return;
    }

    let duration_ns = node.total_duration();
    for child in &node.children {
        let child_duration_ns = child.total_duration();
        if child_duration_ns > duration_ns {
            arbor_log::error!(
                profile_id = profile_id,
                address = child.address.as_str(),
                symbol = child.name.as_str(),
                duration_ns = duration_ns,
                child_duration_ns = child_duration_ns,
                "child has longer duration than its parent"
            );
            continue;
        }
        collect_closed_calls(profile_id, root, child, calls);
    }
    calls.push(ClosedCall { root, node });
}

/// An aggregate call tree with the context needed to attribute it.
pub(crate) struct CallTreeInfo {
    pub call_tree: AggregateCallTree,
    pub thread_name: String,
    pub profile_id: String,
}

/// Deduplicates the call trees containing one target function and converts
/// the survivors to their display form.
pub(crate) fn unique_call_trees(
    infos: &[CallTreeInfo],
    target_image: &str,
    target_symbol: &str,
    display_mode: DisplayMode,
) -> Vec<CallTree> {
    let mut aggregator = CallTreeAggregator::new();
    let mut thread_counts: HashMap<String, BTreeMap<String, u64>> = HashMap::new();
    let mut profile_ids: HashMap<String, BTreeSet<String>> = HashMap::new();

    for info in infos {
        for key in aggregator.update(&info.call_tree, target_image, target_symbol) {
            *thread_counts
                .entry(key.clone())
                .or_default()
                .entry(info.thread_name.clone())
                .or_default() += 1;
            profile_ids
                .entry(key)
                .or_default()
                .insert(info.profile_id.clone());
        }
    }

    let mut call_trees = Vec::with_capacity(aggregator.unique_root_call_trees.len());
    for (key, tree) in &aggregator.unique_root_call_trees {
        let thread_name_to_count = thread_counts.get(key).cloned().unwrap_or_default();
        let count = thread_name_to_count.values().sum();
        let ids: Vec<String> = profile_ids
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let mut exemplars = select_exemplar_profile_ids(ids, DEFAULT_EXEMPLAR_PROFILES);
        exemplars.sort_unstable();

        call_trees.push(CallTree {
            id: key.clone(),
            count,
            thread_name_to_count,
            profile_ids: exemplars,
            root_frame: new_call_tree_frame(tree, &[], display_mode),
        });
    }
    sort_call_trees(&mut call_trees);
    call_trees
}
