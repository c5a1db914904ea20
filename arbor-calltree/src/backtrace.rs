use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::node::{Node, NO_END_TIME};

/// A single backtrace row: one call stack captured for one thread at a given
/// point in time.
#[derive(Clone, Debug, Default)]
pub struct Backtrace {
    /// Frame addresses, ordered leaf first.
    pub addresses: Vec<String>,
    pub is_main_thread: bool,
    pub profile_id: String,
    pub queue_name: String,
    pub session_key: String,
    pub thread_id: u64,
    pub thread_name: String,
    pub timestamp_ns: u64,
}

/// Aggregates call trees from an ordered stream of backtrace rows.
///
/// Rows must arrive ordered by timestamp, with all rows of one profile
/// contiguous before the next profile starts. Call [`update`](Self::update)
/// for each row and [`finalize`](Self::finalize) once after the last one.
#[derive(Debug, Default)]
pub struct BacktraceAggregator {
    // state for the profile currently being consumed
    current_profile_id: String,
    open_trees: HashMap<u64, Node>,
    completed_trees: HashMap<u64, Vec<Node>>,

    // accumulated state across all profiles
    profile_trees: HashMap<String, HashMap<u64, Vec<Node>>>,
    finalized: bool,
}

impl BacktraceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the next backtrace row.
    ///
    /// # Panics
    ///
    /// Panics when called after [`finalize`](Self::finalize); feeding more
    /// rows into a finalized aggregator is a caller bug, not a data
    /// condition.
    pub fn update(&mut self, mut backtrace: Backtrace) {
        assert!(
            !self.finalized,
            "cannot call update() after finalize()"
        );
        if backtrace.addresses.is_empty() {
            return;
        }

        if !self.current_profile_id.is_empty()
            && self.current_profile_id != backtrace.profile_id
        {
            self.flush_current_profile();
        }
        self.current_profile_id = backtrace.profile_id.clone();

        // Addresses arrive leaf first; the splice below walks root first.
        backtrace.addresses.reverse();

        match self.open_trees.entry(backtrace.thread_id) {
            Entry::Vacant(entry) => {
                // There is no existing call tree for this thread to append
                // to, start a new one.
                entry.insert(backtrace_to_call_tree(&backtrace));
            }
            Entry::Occupied(mut entry) => {
                if entry.get().address != backtrace.addresses[0] {
                    // The previous call tree is complete, start a new one.
                    let mut finished = entry.insert(backtrace_to_call_tree(&backtrace));
                    finished.close(backtrace.timestamp_ns);
                    self.completed_trees
                        .entry(backtrace.thread_id)
                        .or_default()
                        .push(finished);
                } else {
                    // This backtrace continues the previous call tree for
                    // this thread.
                    splice(entry.get_mut(), &backtrace);
                }
            }
        }
    }

    /// Flushes any still-open call trees into the per-profile results.
    ///
    /// Must be called once after the last row; the results are incomplete
    /// otherwise. Calling it again has no effect.
    pub fn finalize(&mut self) {
        if !self.finalized && !self.current_profile_id.is_empty() {
            self.flush_current_profile();
        }
        self.finalized = true;
    }

    /// Returns the completed call trees per profile and thread.
    pub fn profiles(&self) -> &HashMap<String, HashMap<u64, Vec<Node>>> {
        &self.profile_trees
    }

    /// Consumes the aggregator, returning the completed call trees per
    /// profile and thread.
    pub fn into_profiles(mut self) -> HashMap<String, HashMap<u64, Vec<Node>>> {
        self.finalize();
        self.profile_trees
    }

    fn flush_current_profile(&mut self) {
        for (thread_id, tree) in self.open_trees.drain() {
            self.completed_trees.entry(thread_id).or_default().push(tree);
        }
        let completed = std::mem::take(&mut self.completed_trees);
        self.profile_trees
            .insert(std::mem::take(&mut self.current_profile_id), completed);
    }
}

/// Builds a fresh root-to-leaf chain for a row, every node starting at the
/// row timestamp and still open.
fn backtrace_to_call_tree(backtrace: &Backtrace) -> Node {
    let thread_name = call_tree_thread_name(backtrace);
    let mut root = node_from_backtrace(&backtrace.addresses[0], backtrace, &thread_name);
    let mut current = &mut root;
    for address in &backtrace.addresses[1..] {
        let node = node_from_backtrace(address, backtrace, &thread_name);
        current.children.push(node);
        current = current.children.last_mut().expect("just pushed");
    }
    root
}

fn node_from_backtrace(address: &str, backtrace: &Backtrace, thread_name: &str) -> Node {
    Node {
        address: address.to_owned(),
        thread_id: backtrace.thread_id,
        thread_name: thread_name.to_owned(),
        is_main_thread: backtrace.is_main_thread,
        profile_id: backtrace.profile_id.clone(),
        session_key: backtrace.session_key.clone(),
        start_ns: backtrace.timestamp_ns,
        end_ns: NO_END_TIME,
        ..Default::default()
    }
}

/// Walks the open tree along the row's addresses, extending the matched
/// path and retiring everything that diverged from it.
///
/// At each depth, the open child matching the next address is kept; every
/// other sibling is closed at the row timestamp. Where no child matches, a
/// new branch starting at this row's timestamp is opened for the remaining
/// addresses. Open children hanging below the row's leaf ended one sample
/// ago and are closed conservatively at this row's timestamp.
fn splice(tree: &mut Node, backtrace: &Backtrace) {
    let thread_name = call_tree_thread_name(backtrace);
    let mut current = tree;
    for address in &backtrace.addresses[1..] {
        let mut matched = None;
        for (index, child) in current.children.iter_mut().enumerate() {
            if matched.is_none()
                && child.address == *address
                && child.end_ns == NO_END_TIME
            {
                matched = Some(index);
            } else {
                child.close(backtrace.timestamp_ns);
            }
        }

        let index = match matched {
            Some(index) => index,
            None => {
                let node = node_from_backtrace(address, backtrace, &thread_name);
                current.children.push(node);
                current.children.len() - 1
            }
        };
        let parent = current;
        current = &mut parent.children[index];
    }

    for child in &mut current.children {
        child.close(backtrace.timestamp_ns);
    }
}

fn call_tree_thread_name(backtrace: &Backtrace) -> String {
    if !backtrace.queue_name.is_empty() {
        backtrace.queue_name.clone()
    } else {
        backtrace.thread_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(profile_id: &str, thread_id: u64, timestamp_ns: u64, addresses: &[&str]) -> Backtrace {
        Backtrace {
            addresses: addresses.iter().map(|s| (*s).to_owned()).collect(),
            profile_id: profile_id.to_owned(),
            thread_id,
            timestamp_ns,
            ..Default::default()
        }
    }

    #[test]
    fn test_continuing_stack_splices_diverged_leaf() {
        let mut aggregator = BacktraceAggregator::new();
        // Addresses are leaf first: both rows share the root "0" and the
        // child "1"; the deeper frame "2" disappears in the second row.
        aggregator.update(row("p1", 1, 0, &["2", "1", "0"]));
        aggregator.update(row("p1", 1, 10, &["1", "0"]));
        let profiles = aggregator.into_profiles();

        let trees = &profiles["p1"][&1];
        assert_eq!(trees.len(), 1);
        let root = &trees[0];
        assert_eq!(root.address, "0");
        assert_eq!(root.end_ns, NO_END_TIME);
        assert_eq!(root.children.len(), 1);
        let child = &root.children[0];
        assert_eq!(child.address, "1");
        assert_eq!(child.end_ns, NO_END_TIME);
        assert_eq!(child.children.len(), 1);
        let leaf = &child.children[0];
        assert_eq!(leaf.address, "2");
        assert_eq!(leaf.end_ns, 10);
        assert_eq!(leaf.total_duration(), 10);
    }

    #[test]
    fn test_new_root_completes_previous_tree() {
        let mut aggregator = BacktraceAggregator::new();
        aggregator.update(row("p1", 1, 0, &["1", "0"]));
        aggregator.update(row("p1", 1, 10, &["3", "2"]));
        aggregator.update(row("p1", 1, 20, &["3", "2"]));
        let profiles = aggregator.into_profiles();

        let trees = &profiles["p1"][&1];
        // The first tree was closed when the root changed, the second is
        // still open at finalization.
        assert_eq!(trees.len(), 2);
        let closed = trees.iter().find(|t| t.address == "0").unwrap();
        assert_eq!(closed.end_ns, 10);
        assert_eq!(closed.total_duration(), 10);
        assert_eq!(closed.children[0].total_duration(), 10);
        let open = trees.iter().find(|t| t.address == "2").unwrap();
        assert_eq!(open.end_ns, NO_END_TIME);
        assert_eq!(open.total_duration(), 0);
    }

    #[test]
    fn test_divergent_branch_closes_siblings() {
        let mut aggregator = BacktraceAggregator::new();
        aggregator.update(row("p1", 1, 0, &["a", "0"]));
        aggregator.update(row("p1", 1, 5, &["b", "0"]));
        aggregator.update(row("p1", 1, 9, &["b", "0"]));
        let profiles = aggregator.into_profiles();

        let root = &profiles["p1"][&1][0];
        assert_eq!(root.children.len(), 2);
        let a = root.children.iter().find(|c| c.address == "a").unwrap();
        assert_eq!(a.end_ns, 5);
        assert_eq!(a.self_ns, 5);
        let b = root.children.iter().find(|c| c.address == "b").unwrap();
        assert_eq!(b.start_ns, 5);
        assert_eq!(b.end_ns, NO_END_TIME);
    }

    #[test]
    fn test_profile_change_flushes_previous_session() {
        let mut aggregator = BacktraceAggregator::new();
        aggregator.update(row("p1", 1, 0, &["1", "0"]));
        aggregator.update(row("p2", 1, 0, &["1", "0"]));
        let profiles = aggregator.into_profiles();

        assert_eq!(profiles.len(), 2);
        assert!(profiles.contains_key("p1"));
        assert!(profiles.contains_key("p2"));
        // p1's chain was flushed open: it contributes zero durations.
        assert_eq!(profiles["p1"][&1][0].total_duration(), 0);
    }

    #[test]
    fn test_threads_are_independent() {
        let mut aggregator = BacktraceAggregator::new();
        aggregator.update(row("p1", 1, 0, &["1", "0"]));
        aggregator.update(row("p1", 2, 0, &["9", "8"]));
        aggregator.update(row("p1", 1, 10, &["1", "0"]));
        let profiles = aggregator.into_profiles();

        assert_eq!(profiles["p1"].len(), 2);
        assert_eq!(profiles["p1"][&1][0].address, "0");
        assert_eq!(profiles["p1"][&2][0].address, "8");
    }

    #[test]
    fn test_empty_addresses_ignored() {
        let mut aggregator = BacktraceAggregator::new();
        aggregator.update(row("p1", 1, 0, &[]));
        let profiles = aggregator.into_profiles();
        assert!(profiles.is_empty());
    }

    #[test]
    #[should_panic(expected = "after finalize")]
    fn test_update_after_finalize_panics() {
        let mut aggregator = BacktraceAggregator::new();
        aggregator.finalize();
        aggregator.update(row("p1", 1, 0, &["1", "0"]));
    }
}
