//! Engine configuration.

use serde::{Deserialize, Serialize};

/// What happens to answers under a node that becomes non-relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonRelevantPolicy {
    /// Keep the answers; they come back if the node becomes relevant again.
    #[default]
    Retain,
    /// Blank the node and its descendants.
    Clear,
}

/// Tunables for [`Dag`](crate::engine::Dag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub non_relevant: NonRelevantPolicy,
    /// Publish per-instance summaries during repeat insert and delete.
    pub publish_summaries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            non_relevant: NonRelevantPolicy::Retain,
            publish_summaries: true,
        }
    }
}
