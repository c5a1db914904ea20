use std::collections::HashMap;
use std::hash::Hasher;

use fxhash::FxHasher;
use serde::{Deserialize, Serialize};

use arbor_calltree::{is_android_system_package, Node, NO_END_TIME};

use crate::error::ProfileError;
use crate::utils::{deserialize_number_from_string, parse_json};

const NS_PER_SECOND: u64 = 1_000_000_000;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AndroidThread {
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AndroidMethod {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class_name: String,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub id: u64,
    /// Frames inlined into this method by the compiler, pre-expanded by the
    /// deobfuscation step upstream. Carried through for wire compatibility;
    /// the method itself is the frame the builder records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_frames: Vec<AndroidMethod>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_file: String,
    #[serde(default)]
    pub source_line: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct Duration {
    #[serde(default)]
    pub secs: u64,
    #[serde(default)]
    pub nanos: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct EventMonotonic {
    #[serde(default)]
    pub wall: Duration,
    #[serde(default)]
    pub cpu: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct EventTime {
    #[serde(default)]
    pub global: Duration,
    #[serde(default, alias = "Monotonic")]
    pub monotonic: EventMonotonic,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Enter,
    Exit,
    Unwind,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct AndroidEvent {
    pub action: Action,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub thread_id: u64,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub method_id: u64,
    #[serde(default)]
    pub time: EventTime,
}

/// The clock the profiler stamped events with.
///
/// Values unknown to this engine deserialize as [`Clock::Unknown`] and fall
/// back to the wall clock; upstream data evolves independently and must not
/// fail the session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    Dual,
    Cpu,
    Wall,
    Global,
    #[serde(other)]
    Unknown,
}

/// A profile in the Android trace format: an ordered stream of explicit
/// method enter/exit/unwind events per thread.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AndroidProfile {
    #[serde(default)]
    pub clock: Clock,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<AndroidEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<AndroidMethod>,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub start_time: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<AndroidThread>,
}

impl AndroidProfile {
    /// Returns a function converting an event's raw time struct into a
    /// single relative nanosecond value, according to the profile's clock.
    pub fn timestamp_getter(&self) -> impl Fn(&EventTime) -> u64 {
        let clock = self.clock;
        let start_time = self.start_time;
        move |time: &EventTime| match clock {
            Clock::Global => (time.global.secs * NS_PER_SECOND + time.global.nanos)
                .saturating_sub(start_time),
            Clock::Cpu => time.monotonic.cpu.secs * NS_PER_SECOND + time.monotonic.cpu.nanos,
            _ => time.monotonic.wall.secs * NS_PER_SECOND + time.monotonic.wall.nanos,
        }
    }

    /// Returns the ID of the thread named `main`, if any.
    pub fn main_thread_id(&self) -> Option<u64> {
        self.threads
            .iter()
            .find(|thread| thread.name == "main")
            .map(|thread| thread.id)
    }

    /// Returns the name recorded for a thread, or its ID rendered as a
    /// string when the thread list does not know it.
    pub fn thread_name(&self, thread_id: u64) -> String {
        self.threads
            .iter()
            .find(|thread| thread.id == thread_id && !thread.name.is_empty())
            .map_or_else(|| thread_id.to_string(), |thread| thread.name.clone())
    }

    /// Builds one call tree forest per thread from the event stream.
    ///
    /// Every `Enter` pushes an open node onto its thread's stack; `Exit` and
    /// `Unwind` pop and close the top node identically, attaching it to its
    /// parent. An exit on an empty stack is dropped and logged. Methods that
    /// never exit stay in the forest with the open sentinel, contributing
    /// zero durations.
    pub fn call_trees(&mut self) -> HashMap<u64, Vec<Node>> {
        let timestamp_ns = self.timestamp_getter();
        self.events.sort_by_key(|event| timestamp_ns(&event.time));

        let methods: HashMap<u64, &AndroidMethod> =
            self.methods.iter().map(|method| (method.id, method)).collect();

        // thread ID -> stack of still-open nodes, callers below callees
        let mut open: HashMap<u64, Vec<Node>> = HashMap::new();
        let mut trees: HashMap<u64, Vec<Node>> = HashMap::new();

        for event in &self.events {
            let event_ns = timestamp_ns(&event.time);
            match event.action {
                Action::Enter => {
                    let stack = open.entry(event.thread_id).or_default();
                    let mut node = match methods.get(&event.method_id) {
                        Some(method) => Node::from_frame(
                            &method.class_name,
                            &method.name,
                            &method.source_file,
                            method.source_line,
                            event_ns,
                            NO_END_TIME,
                            0,
                            !is_android_system_package(&method.class_name),
                        ),
                        None => Node::from_frame(
                            "unknown",
                            "unknown",
                            "",
                            0,
                            event_ns,
                            NO_END_TIME,
                            0,
                            false,
                        ),
                    };
                    node.thread_id = event.thread_id;
                    node.fingerprint = stack_fingerprint(event.thread_id, stack, &node);
                    stack.push(node);
                }
                Action::Exit | Action::Unwind => {
                    let stack = open.entry(event.thread_id).or_default();
                    match stack.pop() {
                        Some(mut node) => {
                            node.set_duration(event_ns);
                            attach(stack, &mut trees, event.thread_id, node);
                        }
                        None => {
                            arbor_log::warn!(
                                thread_id = event.thread_id,
                                method_id = event.method_id,
                                "exit event with no matching enter"
                            );
                        }
                    }
                }
            }
        }

        // Whatever is still on a stack never exited during the capture;
        // keep the nodes with their open end time.
        for (thread_id, mut stack) in open {
            while let Some(node) = stack.pop() {
                attach(&mut stack, &mut trees, thread_id, node);
            }
        }

        for thread_trees in trees.values_mut() {
            for tree in thread_trees {
                tree.update_self_times();
            }
        }

        trees
    }
}

/// Parses an Android trace profile payload.
pub fn parse_android_profile(payload: &[u8]) -> Result<AndroidProfile, ProfileError> {
    parse_json(payload)
}

fn attach(stack: &mut [Node], trees: &mut HashMap<u64, Vec<Node>>, thread_id: u64, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => trees.entry(thread_id).or_default().push(node),
    }
}

/// Hashes the whole open stack plus the entering frame, so a node's
/// fingerprint identifies its full call context on that thread.
fn stack_fingerprint(thread_id: u64, stack: &[Node], node: &Node) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(thread_id);
    for ancestor in stack {
        hasher.write(ancestor.package.as_bytes());
        hasher.write(ancestor.name.as_bytes());
    }
    hasher.write(node.package.as_bytes());
    hasher.write(node.name.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn wall(nanos: u64) -> EventTime {
        EventTime {
            monotonic: EventMonotonic {
                wall: Duration { secs: 0, nanos },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn event(action: Action, thread_id: u64, method_id: u64, nanos: u64) -> AndroidEvent {
        AndroidEvent {
            action,
            thread_id,
            method_id,
            time: wall(nanos),
        }
    }

    fn method(id: u64, class_name: &str, name: &str) -> AndroidMethod {
        AndroidMethod {
            id,
            class_name: class_name.to_owned(),
            name: name.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_nested_calls_build_a_tree() {
        let mut profile = AndroidProfile {
            clock: Clock::Wall,
            methods: vec![
                method(1, "com.example.MainActivity", "onCreate"),
                method(2, "com.example.MainActivity", "setup"),
            ],
            events: vec![
                event(Action::Enter, 1, 1, 10),
                event(Action::Enter, 1, 2, 20),
                event(Action::Exit, 1, 2, 30),
                event(Action::Exit, 1, 1, 50),
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        let roots = &trees[&1];
        assert_eq!(roots.len(), 1);
        let on_create = &roots[0];
        assert_eq!(on_create.name, "onCreate");
        assert_eq!(on_create.total_duration(), 40);
        assert_eq!(on_create.self_ns, 30);
        assert!(on_create.is_application);
        let setup = &on_create.children[0];
        assert_eq!(setup.name, "setup");
        assert_eq!(setup.total_duration(), 10);
        assert_eq!(setup.self_ns, 10);
    }

    #[test]
    fn test_unwind_closes_like_exit() {
        let mut profile = AndroidProfile {
            clock: Clock::Wall,
            methods: vec![method(1, "com.example.App", "throwing")],
            events: vec![
                event(Action::Enter, 1, 1, 10),
                event(Action::Unwind, 1, 1, 25),
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        let root = &trees[&1][0];
        assert_eq!(root.end_ns, 25);
        assert_eq!(root.total_duration(), 15);
    }

    #[test]
    fn test_exit_without_enter_is_dropped() {
        let mut profile = AndroidProfile {
            clock: Clock::Wall,
            methods: vec![method(1, "com.example.App", "run")],
            events: vec![
                event(Action::Exit, 1, 1, 10),
                event(Action::Enter, 1, 1, 20),
                event(Action::Exit, 1, 1, 30),
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        let roots = &trees[&1];
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].start_ns, 20);
        assert_eq!(roots[0].total_duration(), 10);
    }

    #[test]
    fn test_unterminated_call_stays_open() {
        let mut profile = AndroidProfile {
            clock: Clock::Wall,
            methods: vec![
                method(1, "com.example.App", "mainLoop"),
                method(2, "com.example.App", "tick"),
            ],
            events: vec![
                event(Action::Enter, 1, 1, 10),
                event(Action::Enter, 1, 2, 20),
                event(Action::Exit, 1, 2, 30),
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        let main_loop = &trees[&1][0];
        assert_eq!(main_loop.end_ns, NO_END_TIME);
        assert_eq!(main_loop.total_duration(), 0);
        assert_eq!(main_loop.self_ns, 0);
        // The completed child is preserved underneath the open parent.
        assert_eq!(main_loop.children[0].name, "tick");
        assert_eq!(main_loop.children[0].total_duration(), 10);
    }

    #[test]
    fn test_unknown_method_id_becomes_unknown_frame() {
        let mut profile = AndroidProfile {
            clock: Clock::Wall,
            events: vec![
                event(Action::Enter, 1, 42, 10),
                event(Action::Exit, 1, 42, 20),
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        let root = &trees[&1][0];
        assert_eq!(root.package, "unknown");
        assert_eq!(root.name, "unknown");
        assert_eq!(root.total_duration(), 10);
    }

    #[test]
    fn test_threads_have_separate_stacks() {
        let mut profile = AndroidProfile {
            clock: Clock::Wall,
            methods: vec![
                method(1, "com.example.App", "uiWork"),
                method(2, "com.example.App", "ioWork"),
            ],
            events: vec![
                event(Action::Enter, 1, 1, 10),
                event(Action::Enter, 2, 2, 15),
                event(Action::Exit, 1, 1, 20),
                event(Action::Exit, 2, 2, 25),
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        assert_eq!(trees[&1][0].name, "uiWork");
        assert_eq!(trees[&1][0].total_duration(), 10);
        assert_eq!(trees[&2][0].name, "ioWork");
        assert_eq!(trees[&2][0].total_duration(), 10);
    }

    #[test]
    fn test_global_clock_is_relative_to_start_time() {
        let mut profile = AndroidProfile {
            clock: Clock::Global,
            start_time: 100,
            methods: vec![method(1, "com.example.App", "run")],
            events: vec![
                AndroidEvent {
                    action: Action::Enter,
                    thread_id: 1,
                    method_id: 1,
                    time: EventTime {
                        global: Duration { secs: 0, nanos: 150 },
                        ..Default::default()
                    },
                },
                AndroidEvent {
                    action: Action::Exit,
                    thread_id: 1,
                    method_id: 1,
                    time: EventTime {
                        global: Duration { secs: 0, nanos: 250 },
                    ..Default::default()
                    },
                },
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        let root = &trees[&1][0];
        assert_eq!(root.start_ns, 50);
        assert_eq!(root.end_ns, 150);
    }

    #[test]
    fn test_unknown_clock_falls_back_to_wall() {
        let clock: Clock = serde_json::from_str("\"SomeFutureClock\"").unwrap();
        assert_eq!(clock, Clock::Unknown);

        let profile = AndroidProfile {
            clock,
            ..Default::default()
        };
        let timestamp_ns = profile.timestamp_getter();
        assert_eq!(timestamp_ns(&wall(42)), 42);
    }

    #[test]
    fn test_invalid_action_fails_deserialization() {
        let result: Result<AndroidEvent, _> = serde_json::from_str(
            r#"{"action": "Pause", "thread_id": 1, "method_id": 1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_fingerprint_depends_on_call_context() {
        let mut profile = AndroidProfile {
            clock: Clock::Wall,
            methods: vec![
                method(1, "com.example.App", "a"),
                method(2, "com.example.App", "b"),
                method(3, "com.example.App", "shared"),
            ],
            events: vec![
                event(Action::Enter, 1, 1, 10),
                event(Action::Enter, 1, 3, 20),
                event(Action::Exit, 1, 3, 30),
                event(Action::Exit, 1, 1, 40),
                event(Action::Enter, 1, 2, 50),
                event(Action::Enter, 1, 3, 60),
                event(Action::Exit, 1, 3, 70),
                event(Action::Exit, 1, 2, 80),
            ],
            ..Default::default()
        };

        let trees = profile.call_trees();
        let roots = &trees[&1];
        let shared_under_a = &roots[0].children[0];
        let shared_under_b = &roots[1].children[0];
        assert_eq!(shared_under_a.name, "shared");
        assert_eq!(shared_under_b.name, "shared");
        assert_ne!(shared_under_a.fingerprint, shared_under_b.fingerprint);
    }
}
