use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::frame::{image_base_name, is_image_equal};

/// A sequence of child indices describing a path through a call tree. The
/// first element corresponds to a child of the root node.
type TreePath = Vec<usize>;

/// A call tree representing the aggregation of multiple instances of the
/// same call pattern across many profiles.
///
/// Every node carries one duration entry per contributing occurrence, so the
/// lengths of the duration vectors grow with each merge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregateCallTree {
    pub image: String,
    pub symbol: String,
    pub demangled_symbol: String,
    pub line: u32,
    pub path: String,
    pub package: String,
    pub total_durations_ns: Vec<f64>,
    pub self_durations_ns: Vec<f64>,
    pub children: Vec<AggregateCallTree>,
}

impl AggregateCallTree {
    /// Returns the identity used to pair nodes during merging:
    /// `basename(image):symbol`.
    ///
    /// The demangled symbol is display metadata and intentionally not part
    /// of the identity.
    pub fn identifier(&self) -> String {
        format!("{}:{}", image_base_name(&self.image), self.symbol)
    }

    /// Returns the deduplicated set of symbols in this subtree, sorted.
    pub fn symbols(&self) -> Vec<String> {
        fn collect(tree: &AggregateCallTree, symbols: &mut Vec<String>) {
            symbols.push(tree.symbol.clone());
            for child in &tree.children {
                collect(child, symbols);
            }
        }
        let mut symbols = Vec::new();
        collect(self, &mut symbols);
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }

    /// Returns a copy of the node without its children.
    fn shallow_copy(&self) -> AggregateCallTree {
        AggregateCallTree {
            image: self.image.clone(),
            symbol: self.symbol.clone(),
            demangled_symbol: self.demangled_symbol.clone(),
            line: self.line,
            path: self.path.clone(),
            package: self.package.clone(),
            total_durations_ns: self.total_durations_ns.clone(),
            self_durations_ns: self.self_durations_ns.clone(),
            children: Vec::new(),
        }
    }

    /// Returns a copy that only descends along the given path, then copies
    /// the remaining subtree in full.
    fn path_copy(&self, path: &[usize]) -> AggregateCallTree {
        match path.split_first() {
            None => self.clone(),
            Some((&head, rest)) => {
                let mut clone = self.shallow_copy();
                clone.children.push(self.children[head].path_copy(rest));
                clone
            }
        }
    }

    /// Feeds this node's identity into the hash buffer, without children.
    fn shallow_hash(&self, buffer: &mut Vec<u8>) {
        // Use placeholders in place of empty strings, because otherwise we
        // could be generating the same hash for two different call tree
        // structures. Take this example:
        //
        // A -> unknown -> B
        // A -> B
        //
        // If the unknown node is hashed as an empty string, then the first
        // call tree will have the same hash as the second one, even though
        // they are not the same.
        let image = image_base_name(&self.image);
        let image = if image.is_empty() { "$i" } else { image };
        let symbol = if self.symbol.is_empty() {
            "$s"
        } else {
            &self.symbol
        };
        buffer.extend_from_slice(image.as_bytes());
        buffer.extend_from_slice(symbol.as_bytes());
    }

    /// Hashes the tree recursively, children in their stored order.
    fn deep_hash(&self, buffer: &mut Vec<u8>) {
        self.shallow_hash(buffer);
        for child in &self.children {
            child.deep_hash(buffer);
        }
    }

    /// Hashes only the nodes along the given path.
    fn path_hash(&self, path: &[usize], buffer: &mut Vec<u8>) {
        self.shallow_hash(buffer);
        if let Some((&head, rest)) = path.split_first() {
            self.children[head].path_hash(rest, buffer);
        }
    }

    /// Merges another node into this one, without touching children.
    fn shallow_merge(&mut self, other: &AggregateCallTree) {
        if self.demangled_symbol.is_empty() {
            self.demangled_symbol = other.demangled_symbol.clone();
        }
        // Paths and line numbers can change as the source code of an
        // application changes, so always bias toward the newer value when
        // merging.
        if !other.path.is_empty() {
            self.path = other.path.clone();
            self.line = other.line;
        }
        self.total_durations_ns
            .extend_from_slice(&other.total_durations_ns);
        self.self_durations_ns
            .extend_from_slice(&other.self_durations_ns);
    }

    /// Merges another tree into this one recursively, pairing children by
    /// identity and adopting children that have no counterpart yet.
    fn deep_merge(&mut self, other: &AggregateCallTree) {
        self.shallow_merge(other);
        let mut child_indexes: HashMap<String, usize> =
            HashMap::with_capacity(self.children.len());
        for (index, child) in self.children.iter().enumerate() {
            child_indexes.insert(child.identifier(), index);
        }
        let mut new_children = Vec::new();
        for other_child in &other.children {
            match child_indexes.get(&other_child.identifier()) {
                Some(&index) => self.children[index].deep_merge(other_child),
                None => new_children.push(other_child.clone()),
            }
        }
        self.children.append(&mut new_children);
    }

    /// Merges another tree by only merging the nodes included in the given
    /// path, then deep-merging everything at and beyond the path's end.
    fn path_merge(&mut self, other: &AggregateCallTree, path: &[usize]) {
        let (&head, rest) = match path.split_first() {
            None => return self.deep_merge(other),
            Some(split) => split,
        };
        self.shallow_merge(other);
        let other_child = &other.children[head];
        for child in &mut self.children {
            if is_image_equal(&child.image, &other_child.image)
                && child.symbol == other_child.symbol
            {
                child.path_merge(other_child, rest);
                break;
            }
        }
    }
}

/// Deduplicates aggregate call trees into a map of unique root call trees,
/// keyed by a hash that identifies the call tree pattern.
///
/// The same shape always maps to the same key, so repeated occurrences land
/// in the same bucket regardless of arrival order.
#[derive(Debug, Default)]
pub struct CallTreeAggregator {
    pub unique_root_call_trees: HashMap<String, AggregateCallTree>,
}

impl CallTreeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a new call tree into the accumulated data.
    ///
    /// `target_image`/`target_symbol` optionally identify a function to
    /// target: the unique paths through the tree to nodes matching that
    /// identity are computed and merged *independently*. When no target is
    /// given, the entire tree is merged as-is.
    ///
    /// The input tree is never mutated; the aggregator works on copies.
    ///
    /// Returns the keys of the unique root call trees that were created or
    /// updated.
    pub fn update(
        &mut self,
        root: &AggregateCallTree,
        target_image: &str,
        target_symbol: &str,
    ) -> Vec<String> {
        // Without a target node, a hash over the entire tree decides whether
        // this shape was seen before.
        if target_image.is_empty() && target_symbol.is_empty() {
            let mut buffer = Vec::new();
            root.deep_hash(&mut buffer);
            let key = format!("{:x}", md5::compute(&buffer));

            match self.unique_root_call_trees.entry(key.clone()) {
                Entry::Occupied(mut entry) => entry.get_mut().deep_merge(root),
                Entry::Vacant(entry) => {
                    entry.insert(root.clone());
                }
            }
            return vec![key];
        }

        // Find the set of paths through the tree that include the target
        // node(s), ignore all other paths.
        let paths = find_matching_paths(root, target_image, target_symbol);
        let mut keys = Vec::with_capacity(paths.len());
        for path in &paths {
            let mut buffer = Vec::new();
            root.path_hash(path, &mut buffer);
            let key = format!("{:x}", md5::compute(&buffer));

            match self.unique_root_call_trees.entry(key.clone()) {
                Entry::Occupied(mut entry) => entry.get_mut().path_merge(root, path),
                Entry::Vacant(entry) => {
                    entry.insert(root.path_copy(path));
                }
            }
            keys.push(key);
        }
        keys
    }
}

/// Depth-first search for all unique paths from the root to a node matching
/// the given image and symbol.
///
/// A match whose immediate child matches the same identity is skipped: a
/// single physical recursive call would otherwise register once per
/// recursion depth, and the outermost occurrence already subsumes the inner
/// ones.
fn find_matching_paths(root: &AggregateCallTree, image: &str, symbol: &str) -> Vec<TreePath> {
    fn walk(
        node: &AggregateCallTree,
        image: &str,
        symbol: &str,
        current: &mut TreePath,
        paths: &mut Vec<TreePath>,
    ) {
        if is_image_equal(&node.image, image) && node.symbol == symbol {
            let recursive_call = node
                .children
                .iter()
                .any(|child| is_image_equal(&child.image, image) && child.symbol == symbol);
            if !recursive_call {
                paths.push(current.clone());
            }
        }

        for (index, child) in node.children.iter().enumerate() {
            current.push(index);
            walk(child, image, symbol, current, paths);
            current.pop();
        }
    }

    let mut paths = Vec::new();
    walk(root, image, symbol, &mut Vec::new(), &mut paths);
    paths
}
