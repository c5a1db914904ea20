use crate::frame::image_base_name;

/// Signifies that a function call or call tree does not have an end time
/// because the data necessary to compute the end time was missing.
pub const NO_END_TIME: u64 = 0;

/// One function occurrence on a call stack during one profiling session.
///
/// A node is created when a frame first appears on a stack and closed when
/// the frame disappears from subsequent samples, an explicit exit or unwind
/// event is observed, or the session ends. Closed nodes are never removed
/// from the forest. A node whose end time is still [`NO_END_TIME`]
/// contributes a zero duration to every aggregate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    /// Raw frame address for inputs that are resolved late, empty otherwise.
    pub address: String,
    /// Binary or package name, normalized to its basename.
    pub package: String,
    /// Display name of the function, empty when unresolved.
    pub name: String,
    /// Path to the source file defining the function, if known.
    pub path: String,
    /// Line of the function in its source file, if known.
    pub line: u32,
    /// Whether the frame belongs to application code.
    pub is_application: bool,
    /// Structural hash over this node and its ancestors, used to decide
    /// whether two temporally adjacent samples continue the same call.
    pub fingerprint: u64,
    pub thread_id: u64,
    pub thread_name: String,
    pub is_main_thread: bool,
    pub profile_id: String,
    pub session_key: String,
    pub start_ns: u64,
    pub end_ns: u64,
    pub self_ns: u64,
    pub children: Vec<Node>,
}

impl Node {
    /// Creates a node from a resolved frame.
    #[allow(clippy::too_many_arguments)]
    pub fn from_frame(
        package: &str,
        name: &str,
        path: &str,
        line: u32,
        start_ns: u64,
        end_ns: u64,
        fingerprint: u64,
        is_application: bool,
    ) -> Self {
        Node {
            package: image_base_name(package).to_owned(),
            name: name.to_owned(),
            path: path.to_owned(),
            line,
            start_ns,
            end_ns,
            fingerprint,
            is_application,
            ..Default::default()
        }
    }

    /// Returns the total duration of the call, or 0 if the node has no end
    /// time and a duration cannot be computed.
    pub fn total_duration(&self) -> u64 {
        if self.end_ns == NO_END_TIME {
            return 0;
        }
        self.end_ns - self.start_ns
    }

    /// Extends the call to the given end timestamp.
    pub fn set_duration(&mut self, end_ns: u64) {
        self.end_ns = end_ns;
    }

    /// Closes this node and every still-open descendant at the given
    /// timestamp, computing self times bottom-up.
    ///
    /// Already-closed subtrees are left untouched. Self time only counts the
    /// durations of closed children: an open child could not have been
    /// measured, so it is excluded from the subtraction.
    pub fn close(&mut self, timestamp_ns: u64) {
        if self.end_ns != NO_END_TIME {
            return;
        }
        self.end_ns = timestamp_ns;
        let mut children_duration_ns: u64 = 0;
        for child in &mut self.children {
            child.close(timestamp_ns);
            if child.end_ns != NO_END_TIME {
                children_duration_ns += child.total_duration();
            }
        }
        self.self_ns = self.total_duration().saturating_sub(children_duration_ns);
    }

    /// Recomputes self times bottom-up for a tree whose end times are
    /// already in place.
    ///
    /// Builders that extend nodes sample by sample only know the final
    /// extent of a call once the whole session is processed; this pass
    /// settles `self_ns` afterwards. Open nodes keep a self time of zero.
    pub fn update_self_times(&mut self) {
        let mut children_duration_ns: u64 = 0;
        for child in &mut self.children {
            child.update_self_times();
            if child.end_ns != NO_END_TIME {
                children_duration_ns += child.total_duration();
            }
        }
        if self.end_ns != NO_END_TIME {
            self.self_ns = self.total_duration().saturating_sub(children_duration_ns);
        }
    }
}
