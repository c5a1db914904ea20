use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::{deserialize_number_from_string, is_zero};

/// Metadata about the transaction (interaction) a profile was captured for.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TransactionMetadata {
    /// The thread the transaction's work was scheduled on.
    #[serde(
        default,
        deserialize_with = "deserialize_number_from_string",
        skip_serializing_if = "is_zero"
    )]
    pub active_thread_id: u64,

    #[serde(default, skip_serializing_if = "Uuid::is_nil")]
    pub id: Uuid,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(
        default,
        deserialize_with = "deserialize_number_from_string",
        skip_serializing_if = "is_zero"
    )]
    pub relative_end_ns: u64,

    #[serde(
        default,
        deserialize_with = "deserialize_number_from_string",
        skip_serializing_if = "is_zero"
    )]
    pub relative_start_ns: u64,

    #[serde(default, skip_serializing_if = "Uuid::is_nil")]
    pub trace_id: Uuid,
}

impl TransactionMetadata {
    pub fn valid(&self) -> bool {
        !self.name.is_empty() && self.relative_start_ns <= self.relative_end_ns
    }

    pub fn duration_ns(&self) -> u64 {
        self.relative_end_ns - self.relative_start_ns
    }
}
