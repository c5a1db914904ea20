use std::collections::BTreeMap;

use hashbrown::HashMap;

use arbor_calltree::{function_key, AggregateCallTree, Node, NO_END_TIME};

use crate::error::AggregateError;
use crate::functions::{
    collect_closed_calls, unique_call_trees, CallTreeInfo, FunctionOccurrence, FunctionStats,
    TreeRef,
};
use crate::registry::Aggregator;
use crate::types::Aggregate;
use crate::utils::{DisplayMode, DEFAULT_TOP_N_FUNCTIONS};
use crate::ProfileRecord;

/// Aggregates Android trace profiles: the event stream of each profile is
/// built into per-thread call trees, and every completed method call is
/// bucketed by its class and method name.
#[derive(Debug, Default)]
pub struct AndroidTraceAggregator {
    top_n_functions: usize,
    stats: FunctionStats,
    transaction_names: HashMap<String, String>,
    // profile ID -> thread ID -> completed call trees
    profiles: BTreeMap<String, BTreeMap<u64, Vec<Node>>>,
}

impl AndroidTraceAggregator {
    pub fn new() -> Self {
        AndroidTraceAggregator {
            top_n_functions: DEFAULT_TOP_N_FUNCTIONS,
            ..Default::default()
        }
    }
}

impl Aggregator for AndroidTraceAggregator {
    fn set_top_n_functions(&mut self, n: usize) {
        self.top_n_functions = n;
    }

    fn update_from_profile(&mut self, record: &ProfileRecord) -> Result<(), AggregateError> {
        let mut profile = arbor_profiling::android::parse_android_profile(&record.payload)?;
        let main_thread_id = profile.main_thread_id().unwrap_or(0);
        let mut forest: BTreeMap<u64, Vec<Node>> = profile.call_trees().into_iter().collect();

        // Roots carry the thread attribution for everything below them.
        for (&thread_id, trees) in &mut forest {
            let thread_name = profile.thread_name(thread_id);
            for tree in trees {
                tree.thread_name = thread_name.clone();
                tree.is_main_thread = thread_id == main_thread_id && main_thread_id != 0;
            }
        }

        self.stats.record_profile(&record.profile_id);
        self.transaction_names
            .insert(record.profile_id.clone(), record.transaction_name.clone());

        for (&thread_id, trees) in &forest {
            for (index, tree) in trees.iter().enumerate() {
                let mut calls = Vec::new();
                collect_closed_calls(&record.profile_id, tree, tree, &mut calls);
                for call in calls {
                    let node = call.node;
                    self.stats.add_occurrence(FunctionOccurrence {
                        key: function_key(&node.package, &node.name),
                        image: node.package.clone(),
                        symbol: node.name.clone(),
                        path: node.path.clone(),
                        line: node.line,
                        duration_ns: node.total_duration(),
                        is_main_thread: call.root.is_main_thread,
                        thread_id,
                        thread_name: call.root.thread_name.clone(),
                        profile_id: record.profile_id.clone(),
                        tree: TreeRef {
                            profile_id: record.profile_id.clone(),
                            thread_id,
                            index,
                        },
                    });
                }
            }
        }

        self.profiles.insert(record.profile_id.clone(), forest);
        Ok(())
    }

    fn result(&mut self) -> Result<Aggregate, AggregateError> {
        let top = self.stats.top_functions(self.top_n_functions);
        let function_calls = self.stats.build_function_calls(&top, &self.transaction_names);

        let mut function_to_call_trees = BTreeMap::new();
        for ranked in &top {
            let data = ranked.data;
            let mut infos = Vec::with_capacity(data.unique_call_trees.len());
            for tree_ref in &data.unique_call_trees {
                let Some(tree) = self
                    .profiles
                    .get(&tree_ref.profile_id)
                    .and_then(|threads| threads.get(&tree_ref.thread_id))
                    .and_then(|trees| trees.get(tree_ref.index))
                else {
                    continue;
                };
                infos.push(CallTreeInfo {
                    call_tree: node_to_aggregate_call_tree(tree),
                    thread_name: tree.thread_name.clone(),
                    profile_id: tree_ref.profile_id.clone(),
                });
            }
            let trees = unique_call_trees(&infos, &data.image, &data.symbol, DisplayMode::Android);
            function_to_call_trees.insert(ranked.key.clone(), trees);
        }

        Ok(Aggregate {
            function_calls,
            function_to_call_trees,
        })
    }
}

/// Converts one completed session tree into an aggregate call tree. The
/// frames are already resolved, so this is a direct mapping; open nodes
/// contribute no duration samples but keep their place in the tree.
fn node_to_aggregate_call_tree(node: &Node) -> AggregateCallTree {
    let (total_durations_ns, self_durations_ns) = if node.end_ns == NO_END_TIME {
        (Vec::new(), Vec::new())
    } else {
        (
            vec![node.total_duration() as f64],
            vec![node.self_ns as f64],
        )
    };
    AggregateCallTree {
        image: node.package.clone(),
        symbol: node.name.clone(),
        line: node.line,
        path: node.path.clone(),
        total_durations_ns,
        self_durations_ns,
        children: node
            .children
            .iter()
            .map(node_to_aggregate_call_tree)
            .collect(),
        ..Default::default()
    }
}
