//! Engine configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::trust::OperationType;

fn default_world_limit() -> i64 {
    30_000_000
}

fn default_starting_claim_blocks() -> u64 {
    100
}

fn default_cascade_delete_children() -> bool {
    true
}

fn default_prune_after_days() -> u64 {
    60
}

fn default_minimum_claim_area() -> u64 {
    1
}

fn default_wilderness_flags() -> BTreeSet<OperationType> {
    OperationType::ALL.into_iter().collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Maximum absolute coordinate a claim corner may reach.
    #[serde(default = "default_world_limit")]
    pub world_limit: i64,
    /// Claim blocks granted when a user is first seen.
    #[serde(default = "default_starting_claim_blocks")]
    pub starting_claim_blocks: u64,
    /// Charge child claims their own area instead of treating them as free
    /// subdivisions of the parent footprint.
    #[serde(default)]
    pub child_claims_cost_blocks: bool,
    /// Delete children with their parent; when false, children are
    /// promoted to top-level claims instead.
    #[serde(default = "default_cascade_delete_children")]
    pub cascade_delete_children: bool,
    /// Days of inactivity before the prune sweep removes a user's claims.
    #[serde(default = "default_prune_after_days")]
    pub prune_after_days: u64,
    #[serde(default = "default_minimum_claim_area")]
    pub minimum_claim_area: u64,
    /// Wilderness defaults applied to newly created worlds and to worlds
    /// with no claim state yet.
    #[serde(default = "default_wilderness_flags")]
    pub default_wilderness_flags: BTreeSet<OperationType>,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            world_limit: default_world_limit(),
            starting_claim_blocks: default_starting_claim_blocks(),
            child_claims_cost_blocks: false,
            cascade_delete_children: default_cascade_delete_children(),
            prune_after_days: default_prune_after_days(),
            minimum_claim_area: default_minimum_claim_area(),
            default_wilderness_flags: default_wilderness_flags(),
        }
    }
}

impl ClaimConfig {
    pub fn prune_cutoff_ms(&self, now_ms: i64) -> i64 {
        now_ms - (self.prune_after_days as i64) * 86_400_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ClaimConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config, ClaimConfig::default());
        assert!(config.cascade_delete_children);
        assert!(!config.child_claims_cost_blocks);
    }

    #[test]
    fn prune_cutoff_subtracts_whole_days() {
        let config = ClaimConfig {
            prune_after_days: 30,
            ..ClaimConfig::default()
        };
        assert_eq!(config.prune_cutoff_ms(86_400_000 * 31), 86_400_000);
    }
}
