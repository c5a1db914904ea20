use std::collections::BTreeMap;

use arbor_quantile::Quantile;

use crate::error::AggregateError;
use crate::types::{Aggregate, CallTree, Frame, Quantiles};
use crate::utils::sort_call_trees;

/// Merges every call tree of an aggregate into a single tree per root
/// frame.
///
/// The per-function aggregation of a single profile returns one call tree
/// per contained function, which are all views of the same physical trees;
/// callers displaying one profile need them deduplicated back into whole
/// trees.
pub fn merge_all_call_trees(aggregate: &Aggregate) -> Result<Vec<CallTree>, AggregateError> {
    let mut trees_by_root: BTreeMap<String, Vec<&CallTree>> = BTreeMap::new();
    for call_trees in aggregate.function_to_call_trees.values() {
        for call_tree in call_trees {
            trees_by_root
                .entry(call_tree.root_frame.id.clone())
                .or_default()
                .push(call_tree);
        }
    }

    let mut merged_call_trees = Vec::with_capacity(trees_by_root.len());
    for (_, call_trees) in trees_by_root {
        let mut merged = merge_call_trees(&call_trees)?;
        merged.profile_ids.truncate(1);
        merged_call_trees.push(merged);
    }
    sort_call_trees(&mut merged_call_trees);
    Ok(merged_call_trees)
}

fn merge_call_trees(call_trees: &[&CallTree]) -> Result<CallTree, AggregateError> {
    let Some((&first, rest)) = call_trees.split_first() else {
        return Ok(CallTree::default());
    };
    let mut head = first.clone();
    let mut rest_root_frames = Vec::with_capacity(rest.len());
    for tree in rest {
        head.count += tree.count;
        for (thread_name, count) in &tree.thread_name_to_count {
            *head
                .thread_name_to_count
                .entry(thread_name.clone())
                .or_default() += count;
        }
        head.profile_ids.extend(tree.profile_ids.iter().cloned());
        rest_root_frames.push(tree.root_frame.clone());
    }
    head.profile_ids.sort_unstable();
    head.profile_ids.dedup();
    merge_call_tree_frames(&mut head.root_frame, rest_root_frames)?;
    Ok(head)
}

/// Folds `rest` into `head`, pairing nodes by identity at every level.
///
/// Quantile summaries are recomputed from the concatenated sample vectors,
/// which are cleared afterwards; a merged tree cannot be merged again.
fn merge_call_tree_frames(head: &mut Frame, rest: Vec<Frame>) -> Result<(), AggregateError> {
    let mut children: Vec<Frame> = std::mem::take(&mut head.children);
    for frame in rest {
        let (expected, found) = (head.identifier(), frame.identifier());
        if expected != found {
            return Err(AggregateError::MismatchedIdentifiers { expected, found });
        }
        if !frame.path.is_empty() {
            head.path = frame.path;
            head.line = frame.line;
        }
        head.total_duration_ns_values
            .extend(frame.total_duration_ns_values);
        head.self_duration_ns_values
            .extend(frame.self_duration_ns_values);
        children.extend(frame.children);
    }

    head.total_duration_ns =
        Quantiles::from(&Quantile::from(std::mem::take(&mut head.total_duration_ns_values)));
    head.self_duration_ns =
        Quantiles::from(&Quantile::from(std::mem::take(&mut head.self_duration_ns_values)));

    let mut grouped: BTreeMap<String, Vec<Frame>> = BTreeMap::new();
    for child in children {
        grouped.entry(child.identifier()).or_default().push(child);
    }
    for (_, mut group) in grouped {
        let mut child = group.remove(0);
        merge_call_tree_frames(&mut child, group)?;
        head.children.push(child);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn frame(image: &str, symbol: &str, totals: Vec<f64>, children: Vec<Frame>) -> Frame {
        Frame {
            id: format!("{image}:{symbol}"),
            image: image.to_owned(),
            symbol: symbol.to_owned(),
            total_duration_ns_values: totals.clone(),
            self_duration_ns_values: totals,
            children,
            ..Default::default()
        }
    }

    fn call_tree(id: &str, root: Frame, profile_id: &str) -> CallTree {
        CallTree {
            id: id.to_owned(),
            count: 1,
            thread_name_to_count: [("main".to_owned(), 1)].into_iter().collect(),
            profile_ids: vec![profile_id.to_owned()],
            root_frame: root,
        }
    }

    #[test]
    fn test_merges_trees_with_the_same_root() {
        let mut aggregate = Aggregate::default();
        aggregate.function_to_call_trees.insert(
            "f1".to_owned(),
            vec![call_tree(
                "t1",
                frame("App", "main", vec![10.0], vec![frame("App", "a", vec![4.0], vec![])]),
                "p1",
            )],
        );
        aggregate.function_to_call_trees.insert(
            "f2".to_owned(),
            vec![call_tree(
                "t1",
                frame("App", "main", vec![20.0], vec![frame("App", "b", vec![6.0], vec![])]),
                "p1",
            )],
        );

        let merged = merge_all_call_trees(&aggregate).unwrap();
        assert_eq!(merged.len(), 1);
        let tree = &merged[0];
        assert_eq!(tree.count, 2);
        assert_eq!(tree.thread_name_to_count["main"], 2);
        assert_eq!(tree.profile_ids, vec!["p1"]);
        // Both sample vectors contribute to the recomputed summary.
        assert_eq!(tree.root_frame.total_duration_ns.p99, 20.0);
        // Children with different identities are unioned, sorted by
        // identity.
        let names: Vec<&str> = tree
            .root_frame
            .children
            .iter()
            .map(|child| child.symbol.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_keeps_distinct_roots_apart() {
        let mut aggregate = Aggregate::default();
        aggregate.function_to_call_trees.insert(
            "f1".to_owned(),
            vec![
                call_tree("t1", frame("App", "main", vec![10.0], vec![]), "p1"),
                call_tree("t2", frame("App", "worker", vec![5.0], vec![]), "p1"),
            ],
        );

        let merged = merge_all_call_trees(&aggregate).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_mismatched_identifiers_fail() {
        let mut head = frame("App", "main", vec![1.0], vec![]);
        let other = frame("App", "other", vec![1.0], vec![]);
        let error = merge_call_tree_frames(&mut head, vec![other]).unwrap_err();
        assert!(error.is_data_integrity());
    }
}
