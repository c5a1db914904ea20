use std::collections::BTreeMap;

use hashbrown::HashMap;
use itertools::Itertools;

use arbor_calltree::{function_key, AggregateCallTree, Backtrace, Node, NO_END_TIME};
use arbor_profiling::parse_sample_profile;

use crate::error::AggregateError;
use crate::functions::{
    collect_closed_calls, unique_call_trees, CallTreeInfo, FunctionOccurrence, FunctionStats,
    TreeRef,
};
use crate::registry::Aggregator;
use crate::types::Aggregate;
use crate::utils::{DisplayMode, DEFAULT_TOP_N_FUNCTIONS};
use crate::ProfileRecord;

/// A root address that appears in some cocoa backtraces above
/// `start_wqthread`. It can never be symbolicated and would otherwise
/// produce a synthetic extra root, so it is unwrapped before aggregation.
const BOGUS_ROOT_ADDRESS: &str = "0xffffffffc";

/// Symbols of functions that only mean the thread was waiting; counting
/// them as hot functions would drown out everything else.
const WAITING_SYMBOLS: &[&str] = &[
    "0x0",
    "_sigtramp",
    "__psynch_cvwait",
    "__select",
    "__semwait_signal",
    "__ulock_wait",
    "kevent",
    "mach_msg_trap",
    "read",
    "semaphore_wait_trap",
    "_dispatch_worker_thread2",
    "_dispatch_workloop_invoke2",
    "_dispatch_workloop_worker_thread",
    "_dispatch_client_callout",
    "_dispatch_client_callout2",
    "__CFRunLoopRun",
    "__CFRUNLOOP_IS_CALLING_OUT_TO_AN_OBSERVER_CALLBACK_FUNCTION__",
    "start_wqthread",
    "__workq_kernreturn",
];

/// A resolved symbol for one backtrace address.
#[derive(Clone, Debug, Default)]
struct Symbol {
    image: String,
    name: String,
    filename: String,
    path: String,
    line: u32,
}

impl Symbol {
    /// Returns the source location if it is usable for display.
    fn source_path(&self) -> Option<(u32, &str)> {
        if !self.filename.is_empty() && self.filename != "<compiler-generated>" {
            Some((self.line, self.path.as_str()))
        } else {
            None
        }
    }
}

/// Aggregates sample-format profiles by streaming their snapshots through
/// the backtrace splicer, then bucketing every completed call by function.
#[derive(Debug, Default)]
pub struct BacktraceProfileAggregator {
    aggregator: arbor_calltree::BacktraceAggregator,
    top_n_functions: usize,
    transaction_names: HashMap<String, String>,
    // profile ID -> address -> resolved symbol
    symbols: HashMap<String, HashMap<String, Symbol>>,
}

impl BacktraceProfileAggregator {
    pub fn new() -> Self {
        BacktraceProfileAggregator {
            top_n_functions: DEFAULT_TOP_N_FUNCTIONS,
            ..Default::default()
        }
    }
}

impl Aggregator for BacktraceProfileAggregator {
    fn set_top_n_functions(&mut self, n: usize) {
        self.top_n_functions = n;
    }

    fn update_from_profile(&mut self, record: &ProfileRecord) -> Result<(), AggregateError> {
        let profile = parse_sample_profile(&record.payload)?;
        self.transaction_names
            .insert(record.profile_id.clone(), record.transaction_name.clone());
        let main_thread_id = profile.main_thread_id();
        let symbols = self.symbols.entry(record.profile_id.clone()).or_default();

        for sample in &profile.trace.samples {
            let stack = &profile.trace.stacks[sample.stack_id];
            let on_main_thread = if main_thread_id != 0 {
                sample.thread_id == main_thread_id
            } else {
                profile.stack_contains_main(stack)
            };
            let queue = profile.trace.queue_metadata.get(&sample.queue_address);
            // Some samples carry the main queue label while running on a
            // different thread; they would corrupt the main thread's trees.
            if queue.is_some_and(|queue| queue.labeled_as_main_thread()) && !on_main_thread {
                continue;
            }

            let thread_name = profile
                .trace
                .thread_metadata
                .get(&sample.thread_id.to_string())
                .map(|metadata| metadata.name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| sample.thread_id.to_string());
            let queue_name = queue.map(|queue| queue.label.clone()).unwrap_or_default();

            let mut addresses = Vec::with_capacity(stack.len());
            for &frame_index in stack {
                let frame = &profile.trace.frames[frame_index];
                let address = if frame.instruction_addr.is_empty() {
                    frame.id()
                } else {
                    frame.instruction_addr.clone()
                };

                let (image, name) = if frame.function.is_empty() {
                    (String::new(), format!("unknown ({address})"))
                } else {
                    (frame.package_base_name().to_owned(), frame.function.clone())
                };
                symbols.entry(address.clone()).or_insert_with(|| Symbol {
                    image,
                    name,
                    filename: frame.filename.clone(),
                    path: frame.abs_path.clone(),
                    line: frame.lineno,
                });
                addresses.push(address);
            }

            self.aggregator.update(Backtrace {
                addresses,
                is_main_thread: on_main_thread,
                profile_id: record.profile_id.clone(),
                queue_name,
                session_key: String::new(),
                thread_id: sample.thread_id,
                thread_name,
                timestamp_ns: sample.elapsed_since_start_ns,
            });
        }

        Ok(())
    }

    fn result(&mut self) -> Result<Aggregate, AggregateError> {
        self.aggregator.finalize();
        let profiles = std::mem::take(&mut self.aggregator).into_profiles();

        let mut stats = FunctionStats::default();
        for profile_id in profiles.keys().sorted() {
            stats.record_profile(profile_id);
            let thread_trees = &profiles[profile_id];

            // All rows of one profile must agree on their session key; a
            // profile mixing several would corrupt the shared buckets, so
            // it is discarded as a whole.
            if !session_keys_consistent(profile_id, thread_trees) {
                continue;
            }

            let Some(symbols) = self.symbols.get(profile_id) else {
                continue;
            };
            for thread_id in thread_trees.keys().copied().sorted() {
                for (index, tree) in thread_trees[&thread_id].iter().enumerate() {
                    let mut calls = Vec::new();
                    collect_closed_calls(profile_id, tree, tree, &mut calls);
                    for call in calls {
                        let Some(symbol) = symbols.get(&call.node.address) else {
                            continue;
                        };
                        if WAITING_SYMBOLS.contains(&symbol.name.as_str()) {
                            continue;
                        }
                        let (line, path) = match symbol.source_path() {
                            Some((line, path)) => (line, path.to_owned()),
                            None => (0, String::new()),
                        };
                        stats.add_occurrence(FunctionOccurrence {
                            key: function_key(&symbol.image, &symbol.name),
                            image: symbol.image.clone(),
                            symbol: symbol.name.clone(),
                            path,
                            line,
                            duration_ns: call.node.total_duration(),
                            is_main_thread: call.root.is_main_thread,
                            thread_id: call.node.thread_id,
                            thread_name: call.root.thread_name.clone(),
                            profile_id: profile_id.clone(),
                            tree: TreeRef {
                                profile_id: profile_id.clone(),
                                thread_id,
                                index,
                            },
                        });
                    }
                }
            }
        }

        let top = stats.top_functions(self.top_n_functions);
        let function_calls = stats.build_function_calls(&top, &self.transaction_names);

        let mut function_to_call_trees = BTreeMap::new();
        for ranked in &top {
            let data = ranked.data;
            let mut infos = Vec::with_capacity(data.unique_call_trees.len());
            for tree_ref in &data.unique_call_trees {
                let Some(tree) = profiles
                    .get(&tree_ref.profile_id)
                    .and_then(|threads| threads.get(&tree_ref.thread_id))
                    .and_then(|trees| trees.get(tree_ref.index))
                else {
                    continue;
                };
                let symbols = self.symbols.get(&tree_ref.profile_id);
                let root = if tree.address == BOGUS_ROOT_ADDRESS && tree.children.len() == 1 {
                    new_aggregate_call_tree(&tree.children[0], symbols)
                } else {
                    new_aggregate_call_tree(tree, symbols)
                };
                infos.push(CallTreeInfo {
                    call_tree: root,
                    thread_name: tree.thread_name.clone(),
                    profile_id: tree_ref.profile_id.clone(),
                });
            }
            let trees = unique_call_trees(&infos, &data.image, &data.symbol, DisplayMode::Ios);
            function_to_call_trees.insert(ranked.key.clone(), trees);
        }

        Ok(Aggregate {
            function_calls,
            function_to_call_trees,
        })
    }
}

fn session_keys_consistent(
    profile_id: &str,
    thread_trees: &std::collections::HashMap<u64, Vec<Node>>,
) -> bool {
    let mut session_key: Option<&str> = None;
    for trees in thread_trees.values() {
        for tree in trees {
            match session_key {
                None => session_key = Some(&tree.session_key),
                Some(key) if key != tree.session_key => {
                    arbor_log::error!(
                        profile_id = profile_id,
                        session_key = key,
                        other_session_key = tree.session_key.as_str(),
                        "multiple session keys in the same profile"
                    );
                    return false;
                }
                Some(_) => {}
            }
        }
    }
    true
}

/// Converts one completed session tree into an aggregate call tree, mapping
/// its addresses to the profile's resolved symbols. Open nodes contribute
/// no duration samples but keep their place in the tree.
fn new_aggregate_call_tree(
    node: &Node,
    symbols: Option<&HashMap<String, Symbol>>,
) -> AggregateCallTree {
    let mut tree = AggregateCallTree::default();
    if node.end_ns != NO_END_TIME {
        tree.total_durations_ns.push(node.total_duration() as f64);
        tree.self_durations_ns.push(node.self_ns as f64);
    }
    tree.children = node
        .children
        .iter()
        .map(|child| new_aggregate_call_tree(child, symbols))
        .collect();
    if let Some(symbol) = symbols.and_then(|symbols| symbols.get(&node.address)) {
        tree.image = symbol.image.clone();
        tree.symbol = symbol.name.clone();
        if let Some((line, path)) = symbol.source_path() {
            tree.line = line;
            tree.path = path.to_owned();
        }
    }
    tree
}
