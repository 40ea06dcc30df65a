//! Per-world claim state: top-level claims, the user identity cache, and
//! wilderness defaults.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::claim::Claim;
use crate::geometry::{BlockPos, Region};
use crate::trust::{OperationType, TrustContext, TrustLevelRegistry};

/// An abstract in-world action, reduced from a platform interaction event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub actor: Uuid,
    pub kind: OperationType,
    pub world_id: String,
    pub pos: BlockPos,
}

/// The claim found at a position: the top-level claim plus the innermost
/// child covering the position, when one exists.
#[derive(Debug, Clone, Copy)]
pub struct ClaimAt<'a> {
    pub top: &'a Claim,
    pub child: Option<&'a Claim>,
}

impl<'a> ClaimAt<'a> {
    /// The claim whose rules apply at the position.
    pub fn innermost(&self) -> &'a Claim {
        self.child.unwrap_or(self.top)
    }
}

/// Complete claim state for one game world. Persisted as a whole unit on
/// every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimWorld {
    pub world_id: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
    /// Last-known display name for every user referenced by this world's
    /// claims, so lookups never need a store round-trip.
    #[serde(default)]
    pub user_cache: BTreeMap<Uuid, String>,
    /// Operations allowed in unclaimed space.
    #[serde(default)]
    pub wilderness_flags: BTreeSet<OperationType>,
}

impl ClaimWorld {
    pub fn new(world_id: impl Into<String>) -> Self {
        Self {
            world_id: world_id.into(),
            claims: Vec::new(),
            user_cache: BTreeMap::new(),
            wilderness_flags: BTreeSet::new(),
        }
    }

    pub fn claim_at(&self, pos: BlockPos) -> Option<&Claim> {
        self.claims.iter().find(|claim| claim.region.contains(pos))
    }

    pub fn claim_index_at(&self, pos: BlockPos) -> Option<usize> {
        self.claims
            .iter()
            .position(|claim| claim.region.contains(pos))
    }

    /// Resolves the top-level claim and innermost child at `pos`.
    pub fn resolve_at(&self, pos: BlockPos) -> Option<ClaimAt<'_>> {
        let top = self.claim_at(pos)?;
        Some(ClaimAt {
            top,
            child: top.child_at(pos),
        })
    }

    /// First top-level claim overlapping `region`, skipping the claim at
    /// index `exclude` so resize can ignore itself.
    pub fn intersecting(&self, region: &Region, exclude: Option<usize>) -> Option<&Claim> {
        self.claims
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != exclude)
            .map(|(_, claim)| claim)
            .find(|claim| claim.region.intersects(region))
    }

    pub fn claims_by(&self, owner: Uuid) -> Vec<&Claim> {
        self.claims
            .iter()
            .filter(|claim| claim.owner == Some(owner))
            .collect()
    }

    /// Removes every claim owned by `owner` and returns the refundable
    /// area: parent regions, plus child regions when `count_children`.
    pub fn remove_claims_of(&mut self, owner: Uuid, count_children: bool) -> u64 {
        let mut refunded = 0;
        self.claims.retain(|claim| {
            if claim.owner != Some(owner) {
                return true;
            }
            refunded += claim.region.surface_area();
            if count_children {
                refunded += claim
                    .children
                    .iter()
                    .map(|child| child.region.surface_area())
                    .sum::<u64>();
            }
            false
        });
        refunded
    }

    pub fn cache_user(&mut self, uuid: Uuid, name: impl Into<String>) {
        self.user_cache.insert(uuid, name.into());
    }

    pub fn cached_name(&self, uuid: Uuid) -> Option<&str> {
        self.user_cache.get(&uuid).map(String::as_str)
    }

    /// Drops cache entries for users no claim references anymore.
    pub fn prune_user_cache(&mut self) {
        let mut referenced = BTreeSet::new();
        for claim in &self.claims {
            referenced.extend(claim.referenced_users());
        }
        self.user_cache.retain(|uuid, _| referenced.contains(uuid));
    }

    /// Evaluates an operation against the claim (or wilderness) at its
    /// position. Reads only in-memory state.
    pub fn is_operation_allowed(
        &self,
        op: &Operation,
        registry: &TrustLevelRegistry,
        ctx: &dyn TrustContext,
    ) -> bool {
        match self.resolve_at(op.pos) {
            Some(found) => match found.child {
                Some(child) => {
                    child.is_operation_allowed(op.kind, op.actor, Some(found.top), registry, ctx)
                }
                None => found
                    .top
                    .is_operation_allowed(op.kind, op.actor, None, registry, ctx),
            },
            None => self.wilderness_flags.contains(&op.kind),
        }
    }

    /// Whether `user` may move to `pos`. Wilderness never restricts
    /// navigation.
    pub fn can_navigate(
        &self,
        user: Uuid,
        pos: BlockPos,
        registry: &TrustLevelRegistry,
        ctx: &dyn TrustContext,
    ) -> bool {
        match self.resolve_at(pos) {
            Some(found) => match found.child {
                Some(child) => child.can_navigate(user, Some(found.top), registry, ctx),
                None => found.top.can_navigate(user, None, registry, ctx),
            },
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::EmptyTrustContext;

    fn region(ax: i64, az: i64, bx: i64, bz: i64) -> Region {
        Region::from_corners(BlockPos::new(ax, az), BlockPos::new(bx, bz))
    }

    fn registry() -> TrustLevelRegistry {
        TrustLevelRegistry::standard()
    }

    #[test]
    fn wilderness_flags_govern_unclaimed_space() {
        let mut world = ClaimWorld::new("overworld");
        world.wilderness_flags.insert(OperationType::BlockBreak);
        let op = Operation {
            actor: Uuid::new_v4(),
            kind: OperationType::BlockBreak,
            world_id: "overworld".to_string(),
            pos: BlockPos::new(500, 500),
        };
        assert!(world.is_operation_allowed(&op, &registry(), &EmptyTrustContext));
        let denied = Operation {
            kind: OperationType::BlockPlace,
            ..op
        };
        assert!(!world.is_operation_allowed(&denied, &registry(), &EmptyTrustContext));
    }

    #[test]
    fn resolve_at_returns_innermost_child() {
        let owner = Uuid::new_v4();
        let mut claim = Claim::new(Some(owner), region(0, 0, 20, 20));
        claim
            .children
            .push(Claim::new(Some(owner), region(5, 5, 10, 10)));
        let mut world = ClaimWorld::new("overworld");
        world.claims.push(claim);

        let inside_child = world.resolve_at(BlockPos::new(7, 7)).expect("claim");
        assert!(inside_child.child.is_some());
        assert_eq!(inside_child.innermost().region, region(5, 5, 10, 10));

        let outside_child = world.resolve_at(BlockPos::new(15, 15)).expect("claim");
        assert!(outside_child.child.is_none());
    }

    #[test]
    fn intersecting_skips_the_excluded_index() {
        let mut world = ClaimWorld::new("overworld");
        world
            .claims
            .push(Claim::new(Some(Uuid::new_v4()), region(0, 0, 9, 9)));
        let grown = region(0, 0, 15, 15);
        assert!(world.intersecting(&grown, None).is_some());
        assert!(world.intersecting(&grown, Some(0)).is_none());
    }

    #[test]
    fn user_cache_prunes_unreferenced_users() {
        let owner = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let mut world = ClaimWorld::new("overworld");
        world.claims.push(Claim::new(Some(owner), region(0, 0, 9, 9)));
        world.cache_user(owner, "alex");
        world.cache_user(stale, "gone");
        world.prune_user_cache();
        assert_eq!(world.cached_name(owner), Some("alex"));
        assert_eq!(world.cached_name(stale), None);
    }

    #[test]
    fn remove_claims_of_refunds_owned_area_only() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut world = ClaimWorld::new("overworld");
        world.claims.push(Claim::new(Some(owner), region(0, 0, 9, 9)));
        world
            .claims
            .push(Claim::new(Some(other), region(20, 20, 29, 29)));

        let refunded = world.remove_claims_of(owner, false);
        assert_eq!(refunded, 100);
        assert_eq!(world.claims.len(), 1);
        assert_eq!(world.claims[0].owner, Some(other));
    }
}
