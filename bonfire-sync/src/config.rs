//! Aggregation settings.

use serde::{Deserialize, Serialize};

/// Settings shared by every aggregation session a service opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Log per-identifier resolution failures at `warn`. Failures still reach
    /// the failure sink when this is off.
    pub log_resolution_failures: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            log_resolution_failures: true,
        }
    }
}
