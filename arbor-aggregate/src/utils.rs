use rand::seq::SliceRandom;

use arbor_calltree::{is_android_system_package, is_ios_application_image, AggregateCallTree};
use arbor_quantile::Quantile;

use crate::types::{CallTree, Frame, Quantiles};

/// The default maximum number of top functions to select.
pub const DEFAULT_TOP_N_FUNCTIONS: usize = 100;

/// The default maximum number of exemplar profiles to keep per call tree.
// TODO: select exemplars that are representative of the population instead
// of sampling them uniformly.
pub const DEFAULT_EXEMPLAR_PROFILES: usize = 25;

/// How frames decide whether a symbol is application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Ios,
    Android,
}

/// Converts an aggregated call tree into its display form, recursively.
///
/// Every frame gets a stable per-position ID: the hash of its own identity
/// appended to the hash of all of its ancestors.
pub(crate) fn new_call_tree_frame(
    root: &AggregateCallTree,
    hash_of_parents: &[u8],
    display_mode: DisplayMode,
) -> Frame {
    let mut bytes = Vec::with_capacity(root.image.len() + root.symbol.len() + 16);
    bytes.extend_from_slice(root.image.as_bytes());
    bytes.extend_from_slice(root.symbol.as_bytes());
    bytes.extend_from_slice(hash_of_parents);
    let current_hash = md5::compute(bytes);

    let children = root
        .children
        .iter()
        .map(|child| new_call_tree_frame(child, &current_hash.0, display_mode))
        .collect();

    let is_application_symbol = match display_mode {
        DisplayMode::Ios => is_ios_application_image(&root.path),
        DisplayMode::Android => !is_android_system_package(&root.image),
    };

    Frame {
        id: format!("{current_hash:x}"),
        image: root.image.clone(),
        symbol: root.symbol.clone(),
        is_application_symbol,
        line: root.line,
        path: root.path.clone(),
        total_duration_ns: Quantiles::from(&Quantile::from(root.total_durations_ns.clone())),
        total_duration_ns_values: root.total_durations_ns.clone(),
        children,
        self_duration_ns: Quantiles::from(&Quantile::from(root.self_durations_ns.clone())),
        self_duration_ns_values: root.self_durations_ns.clone(),
    }
}

pub(crate) fn sort_call_trees(call_trees: &mut [CallTree]) {
    call_trees.sort_by(|a, b| a.id.cmp(&b.id));
}

/// Selects up to `n` profile IDs intended to represent the overall set.
/// They are currently picked uniformly at random.
pub(crate) fn select_exemplar_profile_ids(mut ids: Vec<String>, n: usize) -> Vec<String> {
    let mut rng = rand::rng();
    ids.shuffle(&mut rng);
    ids.truncate(n);
    ids
}
