use std::collections::HashMap;
use std::hash::Hasher;

use chrono::{DateTime, Utc};
use fxhash::FxHasher;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arbor_calltree::{image_base_name, is_ios_application_image, Node};

use crate::error::ProfileError;
use crate::transaction_metadata::TransactionMetadata;
use crate::utils::{deserialize_number_from_string, is_zero, parse_json};

const MAIN_QUEUE_LABEL: &str = "com.apple.main-thread";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub abs_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function: String,
    #[serde(default)]
    pub in_app: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instruction_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lang: String,
    #[serde(default)]
    pub lineno: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub package: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sym_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub symbol: String,
}

impl Frame {
    /// Returns whether the function is considered the process entry point,
    /// along with an offset indicating whether the previous frame should be
    /// kept.
    pub fn is_main(&self) -> (bool, i32) {
        if self.status != "symbolicated" {
            (false, 0)
        } else if self.function == "main" {
            (true, 0)
        } else if self.function == "UIApplicationMain" {
            (true, -1)
        } else {
            (false, 0)
        }
    }

    /// Returns an identifier for the frame that stays unique across inlined
    /// frames sharing one instruction address and across symbolicated frames
    /// reusing one symbol address.
    pub fn id(&self) -> String {
        let digest = md5::compute(format!(
            "{}:{}:{}:{}",
            self.filename, self.function, self.lineno, self.instruction_addr
        ));
        format!("{digest:x}")
    }

    pub fn package_base_name(&self) -> &str {
        if !self.module.is_empty() {
            &self.module
        } else if !self.package.is_empty() {
            image_base_name(&self.package)
        } else {
            ""
        }
    }

    /// Feeds the frame identity into a fingerprint hasher, substituting `-`
    /// for fields that are unavailable.
    pub fn write_hash(&self, hasher: &mut FxHasher) {
        let package = if !self.package.is_empty() {
            self.package_base_name()
        } else if !self.filename.is_empty() {
            &self.filename
        } else {
            "-"
        };
        hasher.write(package.as_bytes());
        let function = if !self.function.is_empty() {
            &self.function
        } else {
            "-"
        };
        hasher.write(function.as_bytes());
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Sample {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub elapsed_since_start_ns: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub queue_address: String,
    pub stack_id: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub thread_id: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ThreadMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QueueMetadata {
    pub label: String,
}

impl QueueMetadata {
    pub fn labeled_as_main_thread(&self) -> bool {
        self.label == MAIN_QUEUE_LABEL
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Trace {
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub queue_metadata: HashMap<String, QueueMetadata>,
    pub samples: Vec<Sample>,
    pub stacks: Vec<Vec<usize>>,
    #[serde(default)]
    pub thread_metadata: HashMap<String, ThreadMetadata>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub enum Version {
    #[default]
    Unknown,
    #[serde(rename = "1")]
    V1,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DeviceMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_emulator: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OSMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RuntimeMetadata {
    pub name: String,
    pub version: String,
}

/// A profile in the sample format: periodic snapshots of every thread's full
/// call stack, with frames and stacks deduplicated into side tables.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SampleProfile {
    #[serde(default)]
    pub version: Version,

    #[serde(default)]
    pub device: DeviceMetadata,
    #[serde(default)]
    pub os: OSMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeMetadata>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    #[serde(default, alias = "profile_id", skip_serializing_if = "Uuid::is_nil")]
    pub event_id: Uuid,
    pub platform: String,
    #[serde(rename = "profile")]
    pub trace: Trace,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(
        default,
        deserialize_with = "deserialize_number_from_string",
        skip_serializing_if = "is_zero"
    )]
    pub duration_ns: u64,
    #[serde(default, skip_serializing_if = "Uuid::is_nil")]
    pub trace_id: Uuid,
    #[serde(default, skip_serializing_if = "Uuid::is_nil")]
    pub transaction_id: Uuid,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transaction_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<TransactionMetadata>,
}

impl SampleProfile {
    /// Removes samples from threads that were captured only once; no
    /// duration can be computed from a single snapshot.
    pub fn remove_single_samples_per_thread(&mut self) {
        let mut sample_count_by_thread_id: HashMap<u64, u32> = HashMap::new();

        for sample in &self.trace.samples {
            *sample_count_by_thread_id
                .entry(sample.thread_id)
                .or_default() += 1;
        }

        sample_count_by_thread_id.retain(|_, count| *count > 1);

        self.trace
            .samples
            .retain(|sample| sample_count_by_thread_id.contains_key(&sample.thread_id));
    }

    /// Returns `true` if any frame of the stack is the process entry point.
    pub fn stack_contains_main(&self, stack: &[usize]) -> bool {
        stack
            .iter()
            .filter_map(|&index| self.trace.frames.get(index))
            .any(|frame| frame.is_main().0)
    }

    /// Returns what we believe is the main thread ID of the profile.
    ///
    /// A transaction with an active thread wins; otherwise any stack holding
    /// a symbolicated entry-point frame marks its thread; otherwise threads
    /// pinned to the main queue are elected by deepest observed stack, then
    /// lowest thread ID.
    pub fn main_thread_id(&self) -> u64 {
        if let Some(transaction) = self.transactions.first() {
            if transaction.active_thread_id != 0 {
                return transaction.active_thread_id;
            }
        }

        for sample in &self.trace.samples {
            let Some(stack) = self.trace.stacks.get(sample.stack_id) else {
                continue;
            };
            if self.stack_contains_main(stack) {
                return sample.thread_id;
            }
        }

        // thread ID -> queue label -> deepest stack observed on that queue
        let mut queues: HashMap<u64, HashMap<String, usize>> = HashMap::new();
        for sample in &self.trace.samples {
            if sample.queue_address.is_empty() {
                continue;
            }
            let Some(queue) = self.trace.queue_metadata.get(&sample.queue_address) else {
                continue;
            };
            let depth = self.trace.stacks.get(sample.stack_id).map_or(0, Vec::len);
            let deepest = queues
                .entry(sample.thread_id)
                .or_default()
                .entry(queue.label.clone())
                .or_insert(0);
            if *deepest < depth {
                *deepest = depth;
            }
        }

        // Only threads scheduled on a single queue are considered.
        let mut candidates: Vec<(u64, usize)> = Vec::new();
        for (thread_id, labels) in &queues {
            if labels.len() == 1 {
                for (label, depth) in labels {
                    if label == MAIN_QUEUE_LABEL {
                        candidates.push((*thread_id, *depth));
                    }
                }
            }
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.first().map_or(0, |candidate| candidate.0)
    }

    pub fn is_application_package(&self, package: &str) -> bool {
        match self.platform.as_str() {
            "cocoa" => is_ios_application_image(package),
            _ => true,
        }
    }

    /// Builds one call tree forest per thread from the interval snapshots.
    ///
    /// Samples are sorted by timestamp first; out-of-order input would tear
    /// every continuing call apart. A node is extended by a sample only when
    /// its fingerprint matches at the same position and it was still alive
    /// at the previous sample's timestamp; anything else opens a new node
    /// spanning from the previous timestamp to the current one.
    pub fn call_trees(&mut self) -> Result<HashMap<u64, Vec<Node>>, ProfileError> {
        self.trace
            .samples
            .sort_by_key(|sample| sample.elapsed_since_start_ns);

        let mut trees: HashMap<u64, Vec<Node>> = HashMap::new();
        let mut previous_timestamp: HashMap<u64, u64> = HashMap::new();

        for sample in &self.trace.samples {
            let stack = self
                .trace
                .stacks
                .get(sample.stack_id)
                .ok_or(ProfileError::MalformedSamples)?;
            let previous_ns = previous_timestamp
                .get(&sample.thread_id)
                .copied()
                .unwrap_or(0);
            let timestamp_ns = sample.elapsed_since_start_ns;

            let mut hasher = FxHasher::default();
            hasher.write_u64(sample.thread_id);

            let mut stack_iter = stack.iter().rev();
            if let Some(&root_index) = stack_iter.next() {
                let frame = self
                    .trace
                    .frames
                    .get(root_index)
                    .ok_or(ProfileError::MalformedStacks)?;
                frame.write_hash(&mut hasher);
                let fingerprint = hasher.finish();

                let thread_trees = trees.entry(sample.thread_id).or_default();
                let extend = matches!(
                    thread_trees.last(),
                    Some(last) if last.fingerprint == fingerprint && last.end_ns == previous_ns
                );
                if !extend {
                    thread_trees.push(self.node_from_frame(
                        frame,
                        previous_ns,
                        timestamp_ns,
                        fingerprint,
                    ));
                }
                let mut current = thread_trees.last_mut().expect("tree just ensured");
                if extend {
                    current.set_duration(timestamp_ns);
                }

                for &frame_index in stack_iter {
                    let frame = self
                        .trace
                        .frames
                        .get(frame_index)
                        .ok_or(ProfileError::MalformedStacks)?;
                    frame.write_hash(&mut hasher);
                    let fingerprint = hasher.finish();

                    let extend = matches!(
                        current.children.last(),
                        Some(last) if last.fingerprint == fingerprint && last.end_ns == previous_ns
                    );
                    if !extend {
                        let node = self.node_from_frame(
                            frame,
                            previous_ns,
                            timestamp_ns,
                            fingerprint,
                        );
                        current.children.push(node);
                    }
                    let parent = current;
                    current = parent.children.last_mut().expect("child just ensured");
                    if extend {
                        current.set_duration(timestamp_ns);
                    }
                }
            }

            previous_timestamp.insert(sample.thread_id, timestamp_ns);
        }

        for thread_trees in trees.values_mut() {
            for tree in thread_trees {
                tree.update_self_times();
            }
        }

        Ok(trees)
    }

    fn node_from_frame(
        &self,
        frame: &Frame,
        start_ns: u64,
        end_ns: u64,
        fingerprint: u64,
    ) -> Node {
        Node::from_frame(
            frame.package_base_name(),
            &frame.function,
            &frame.abs_path,
            frame.lineno,
            start_ns,
            end_ns,
            fingerprint,
            self.is_application_package(&frame.package),
        )
    }
}

/// Parses and normalizes a sample-format profile.
pub fn parse_sample_profile(payload: &[u8]) -> Result<SampleProfile, ProfileError> {
    let mut profile: SampleProfile = parse_json(payload)?;

    for stack in &profile.trace.stacks {
        if stack
            .iter()
            .any(|&index| index >= profile.trace.frames.len())
        {
            return Err(ProfileError::MalformedStacks);
        }
    }
    if profile
        .trace
        .samples
        .iter()
        .any(|sample| sample.stack_id >= profile.trace.stacks.len())
    {
        return Err(ProfileError::MalformedSamples);
    }

    for transaction in &profile.transactions {
        if !transaction.valid() {
            return Err(ProfileError::InvalidTransactionMetadata);
        }
    }

    profile.remove_single_samples_per_thread();

    if profile.trace.samples.is_empty() {
        return Err(ProfileError::NotEnoughSamples);
    }

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn frame(package: &str, function: &str) -> Frame {
        Frame {
            package: package.to_owned(),
            function: function.to_owned(),
            ..Default::default()
        }
    }

    fn sample(thread_id: u64, timestamp_ns: u64, stack_id: usize) -> Sample {
        Sample {
            elapsed_since_start_ns: timestamp_ns,
            thread_id,
            stack_id,
            ..Default::default()
        }
    }

    fn profile(frames: Vec<Frame>, stacks: Vec<Vec<usize>>, samples: Vec<Sample>) -> SampleProfile {
        SampleProfile {
            platform: "cocoa".to_owned(),
            trace: Trace {
                frames,
                stacks,
                samples,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_continuous_stack_builds_one_chain() {
        // Stacks are leaf first: main -> work -> render.
        let mut profile = profile(
            vec![frame("App", "render"), frame("App", "work"), frame("App", "main")],
            vec![vec![0, 1, 2]],
            vec![sample(1, 1, 0), sample(1, 2, 0)],
        );

        let trees = profile.call_trees().unwrap();
        let roots = &trees[&1];
        assert_eq!(roots.len(), 1);

        let main = &roots[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.total_duration(), 2);
        let work = &main.children[0];
        assert_eq!(work.total_duration(), 2);
        let render = &work.children[0];
        assert_eq!(render.total_duration(), 2);
        assert_eq!(render.children.len(), 0);
        // All time is attributed to the leaf.
        assert_eq!(main.self_ns, 0);
        assert_eq!(work.self_ns, 0);
        assert_eq!(render.self_ns, 2);
    }

    #[test]
    fn test_appearing_leaf_nests_correctly() {
        let mut profile = profile(
            vec![frame("App", "render"), frame("App", "work"), frame("App", "main")],
            vec![vec![1, 2], vec![0, 1, 2]],
            vec![sample(1, 1, 0), sample(1, 2, 1)],
        );

        let trees = profile.call_trees().unwrap();
        let main = &trees[&1][0];
        assert_eq!(main.total_duration(), 2);
        let work = &main.children[0];
        assert_eq!(work.total_duration(), 2);
        // The deeper frame only covers the second interval.
        let render = &work.children[0];
        assert_eq!(render.start_ns, 1);
        assert_eq!(render.end_ns, 2);
        assert_eq!(render.total_duration(), 1);
        assert_eq!(work.self_ns, 1);
    }

    #[test]
    fn test_interrupted_call_is_not_merged() {
        let mut profile = profile(
            vec![frame("App", "a"), frame("App", "x")],
            vec![vec![0], vec![1]],
            vec![sample(1, 1, 0), sample(1, 2, 1), sample(1, 3, 0)],
        );

        let trees = profile.call_trees().unwrap();
        let roots = &trees[&1];
        // a, then x, then a again: the second a is a new call, not a
        // continuation across the gap.
        assert_eq!(roots.len(), 3);
        assert_eq!(roots[0].name, "a");
        assert_eq!(roots[1].name, "x");
        assert_eq!(roots[2].name, "a");
        assert_eq!(roots[0].total_duration(), 1);
        assert_eq!(roots[2].total_duration(), 1);
        assert_eq!(roots[2].start_ns, 2);
    }

    #[test]
    fn test_out_of_order_samples_are_sorted() {
        let mut profile = profile(
            vec![frame("App", "main")],
            vec![vec![0]],
            vec![sample(1, 3, 0), sample(1, 1, 0), sample(1, 2, 0)],
        );

        let trees = profile.call_trees().unwrap();
        let roots = &trees[&1];
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].total_duration(), 3);
    }

    #[test]
    fn test_threads_do_not_share_state() {
        let mut profile = profile(
            vec![frame("App", "main"), frame("App", "worker")],
            vec![vec![0], vec![1]],
            vec![
                sample(1, 1, 0),
                sample(2, 1, 1),
                sample(1, 2, 0),
                sample(2, 2, 1),
            ],
        );

        let trees = profile.call_trees().unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[&1][0].name, "main");
        assert_eq!(trees[&2][0].name, "worker");
        assert_eq!(trees[&1][0].total_duration(), 2);
    }

    #[test]
    fn test_remove_single_samples_per_thread() {
        let mut profile = profile(
            vec![frame("App", "main")],
            vec![vec![0]],
            vec![
                sample(1, 1, 0),
                sample(1, 2, 0),
                sample(2, 1, 0),
                sample(3, 1, 0),
            ],
        );

        profile.remove_single_samples_per_thread();
        assert_eq!(profile.trace.samples.len(), 2);
        assert!(profile.trace.samples.iter().all(|s| s.thread_id == 1));
    }

    #[test]
    fn test_parse_rejects_malformed_stacks() {
        let profile = profile(
            vec![frame("App", "main")],
            vec![vec![7]],
            vec![sample(1, 1, 0), sample(1, 2, 0)],
        );
        let payload = serde_json::to_vec(&profile).unwrap();
        assert!(matches!(
            parse_sample_profile(&payload),
            Err(ProfileError::MalformedStacks)
        ));
    }

    #[test]
    fn test_parse_rejects_unparsable_numbers() {
        let payload = br#"{
            "platform": "cocoa",
            "profile": {
                "frames": [],
                "stacks": [[]],
                "samples": [
                    {"elapsed_since_start_ns": "not-a-number", "thread_id": 1, "stack_id": 0}
                ]
            }
        }"#;
        assert!(matches!(
            parse_sample_profile(payload),
            Err(ProfileError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_transactions() {
        let mut profile = profile(
            vec![frame("App", "main")],
            vec![vec![0]],
            vec![sample(1, 1, 0), sample(1, 2, 0)],
        );
        profile.transactions.push(TransactionMetadata {
            relative_start_ns: 10,
            relative_end_ns: 5,
            name: "backwards".to_owned(),
            ..Default::default()
        });
        let payload = serde_json::to_vec(&profile).unwrap();
        assert!(matches!(
            parse_sample_profile(&payload),
            Err(ProfileError::InvalidTransactionMetadata)
        ));
    }

    #[test]
    fn test_main_thread_from_queue_metadata() {
        let mut profile = profile(
            vec![frame("App", "deep"), frame("App", "main_work")],
            vec![vec![0], vec![1]],
            vec![sample(1, 1, 0), sample(1, 2, 0), sample(2, 1, 1), sample(2, 2, 1)],
        );
        profile.trace.queue_metadata.insert(
            "0x1".to_owned(),
            QueueMetadata {
                label: MAIN_QUEUE_LABEL.to_owned(),
            },
        );
        for sample in &mut profile.trace.samples {
            if sample.thread_id == 2 {
                sample.queue_address = "0x1".to_owned();
            }
        }

        assert_eq!(profile.main_thread_id(), 2);
    }

    #[test]
    fn test_main_thread_from_main_frame() {
        let mut main_frame = frame("App", "main");
        main_frame.status = "symbolicated".to_owned();
        let profile = profile(
            vec![main_frame, frame("App", "other")],
            vec![vec![0], vec![1]],
            vec![sample(7, 1, 0), sample(2, 1, 1)],
        );

        assert_eq!(profile.main_thread_id(), 7);
    }
}
