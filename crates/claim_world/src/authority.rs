//! Claim lifecycle operations: validate fully, mutate a copy, swap the
//! snapshot, persist the whole world, broadcast invalidation.
//!
//! Readers hold `Arc<ClaimWorld>` snapshots, so a resize is atomic from
//! their point of view: they see the pre- or post-resize world, never a
//! half-updated one. All mutations for one world funnel through a single
//! write path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use log::{info, warn};
use uuid::Uuid;

use crate::claim::Claim;
use crate::config::ClaimConfig;
use crate::error::AuthorityError;
use crate::geometry::{BlockPos, Region};
use crate::ledger::{AuditReason, Clock, SavedUser, UserLedger};
use crate::store::{ClaimStore, Invalidation, Persister};
use crate::trust::{
    EmptyTrustContext, OperationType, Privilege, TrustContext, TrustLevelRegistry, Trustable,
};
use crate::world::{ClaimWorld, Operation};

/// Who initiated a lifecycle operation. Admin actors bypass privilege
/// checks; they stand in for the console and administrative commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Player(Uuid),
    Admin,
}

impl Actor {
    fn player(&self) -> Option<Uuid> {
        match self {
            Actor::Player(uuid) => Some(*uuid),
            Actor::Admin => None,
        }
    }
}

/// Knows which users currently stand inside a region and can move them
/// out. Forced relocation after bans and privacy toggles goes through
/// here.
pub trait PresenceAdapter: Send + Sync {
    fn users_in(&self, world_id: &str, region: &Region) -> Vec<Uuid>;
    fn relocate_out(&self, user: Uuid, world_id: &str, region: &Region);
}

/// Adapter for deployments without presence tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPresence;

impl PresenceAdapter for NoPresence {
    fn users_in(&self, _world_id: &str, _region: &Region) -> Vec<Uuid> {
        Vec::new()
    }

    fn relocate_out(&self, _user: Uuid, _world_id: &str, _region: &Region) {}
}

/// Debits real currency for purchased claim blocks.
pub trait Economy: Send + Sync {
    fn debit(&self, user: Uuid, cost: f64) -> Result<(), String>;
}

/// Economy stub that rejects every purchase.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEconomy;

impl Economy for NoEconomy {
    fn debit(&self, _user: Uuid, _cost: f64) -> Result<(), String> {
        Err("no economy provider installed".to_string())
    }
}

/// Write-only visualization sink, told when an owner's claim set changed.
pub trait HighlightSink: Send + Sync {
    fn refresh_owner(&self, owner: Option<Uuid>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHighlights;

impl HighlightSink for NoHighlights {
    fn refresh_owner(&self, _owner: Option<Uuid>) {}
}

/// Outcome of a prune sweep.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PruneReport {
    pub removed_claims: usize,
    /// Blocks refunded per pruned owner, summed across worlds and applied
    /// once per user.
    pub refunded: BTreeMap<Uuid, u64>,
}

/// The claims authority: per-node claim state plus the lifecycle state
/// machine over it.
pub struct ClaimAuthority {
    config: ClaimConfig,
    node_id: String,
    registry: TrustLevelRegistry,
    store: Arc<dyn ClaimStore>,
    persister: Arc<dyn Persister>,
    ledger: Arc<UserLedger>,
    presence: Arc<dyn PresenceAdapter>,
    economy: Arc<dyn Economy>,
    highlights: Arc<dyn HighlightSink>,
    trust_ctx: Arc<dyn TrustContext>,
    worlds: RwLock<HashMap<String, Arc<ClaimWorld>>>,
    clock: Clock,
}

impl ClaimAuthority {
    pub fn new(
        config: ClaimConfig,
        node_id: impl Into<String>,
        store: Arc<dyn ClaimStore>,
        persister: Arc<dyn Persister>,
        ledger: Arc<UserLedger>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            registry: TrustLevelRegistry::standard(),
            store,
            persister,
            ledger,
            presence: Arc::new(NoPresence),
            economy: Arc::new(NoEconomy),
            highlights: Arc::new(NoHighlights),
            trust_ctx: Arc::new(EmptyTrustContext),
            worlds: RwLock::new(HashMap::new()),
            clock: crate::ledger::system_clock(),
        }
    }

    pub fn with_registry(mut self, registry: TrustLevelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_presence(mut self, presence: Arc<dyn PresenceAdapter>) -> Self {
        self.presence = presence;
        self
    }

    pub fn with_economy(mut self, economy: Arc<dyn Economy>) -> Self {
        self.economy = economy;
        self
    }

    pub fn with_highlights(mut self, highlights: Arc<dyn HighlightSink>) -> Self {
        self.highlights = highlights;
        self
    }

    pub fn with_trust_context(mut self, ctx: Arc<dyn TrustContext>) -> Self {
        self.trust_ctx = ctx;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ClaimConfig {
        &self.config
    }

    pub fn registry(&self) -> &TrustLevelRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<UserLedger> {
        &self.ledger
    }

    // ------------------------------------------------------------------
    // Node cache
    // ------------------------------------------------------------------

    /// Loads every world persisted for this node into the in-memory index.
    pub fn load_worlds(&self) -> Result<(), AuthorityError> {
        let loaded = self.store.get_claim_worlds(&self.node_id)?;
        let mut worlds = self.worlds.write().expect("lock worlds");
        for (world_id, world) in loaded {
            worlds.insert(world_id, Arc::new(world));
        }
        Ok(())
    }

    /// Current snapshot of one world, if any claim state exists for it.
    pub fn world(&self, world_id: &str) -> Option<Arc<ClaimWorld>> {
        let worlds = self.worlds.read().expect("lock worlds");
        worlds.get(world_id).cloned()
    }

    pub fn world_ids(&self) -> Vec<String> {
        let worlds = self.worlds.read().expect("lock worlds");
        worlds.keys().cloned().collect()
    }

    /// Drops the cached snapshot; the next use reloads from the store.
    /// Called when a remote node invalidates this world.
    pub fn evict_world(&self, world_id: &str) {
        let mut worlds = self.worlds.write().expect("lock worlds");
        worlds.remove(world_id);
    }

    /// Reloads an evicted world from the store before next use.
    pub fn reload_world(&self, world_id: &str) -> Result<Option<Arc<ClaimWorld>>, AuthorityError> {
        if let Some(world) = self.world(world_id) {
            return Ok(Some(world));
        }
        let stored = self.store.get_claim_worlds(&self.node_id)?;
        let mut worlds = self.worlds.write().expect("lock worlds");
        for (id, world) in stored {
            worlds.entry(id).or_insert_with(|| Arc::new(world));
        }
        Ok(worlds.get(world_id).cloned())
    }

    // ------------------------------------------------------------------
    // Evaluation path (read-only; serves the in-memory snapshot, with a
    // one-time store reload after an eviction)
    // ------------------------------------------------------------------

    pub fn is_operation_allowed(&self, op: &Operation) -> bool {
        match self.world_or_reload(&op.world_id) {
            Some(world) => world.is_operation_allowed(op, &self.registry, self.trust_ctx.as_ref()),
            None => self.config.default_wilderness_flags.contains(&op.kind),
        }
    }

    pub fn can_navigate(&self, user: Uuid, world_id: &str, pos: BlockPos) -> bool {
        match self.world_or_reload(world_id) {
            Some(world) => world.can_navigate(user, pos, &self.registry, self.trust_ctx.as_ref()),
            None => true,
        }
    }

    /// Cached snapshot, or a lazy reload from the store after an
    /// eviction. An evicted world must never be treated as wilderness
    /// while a persisted document for it exists.
    fn world_or_reload(&self, world_id: &str) -> Option<Arc<ClaimWorld>> {
        if let Some(world) = self.world(world_id) {
            return Some(world);
        }
        match self.reload_world(world_id) {
            Ok(world) => world,
            Err(err) => {
                warn!("failed to reload claim world {world_id}: {err:?}");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    pub fn handle_join(&self, uuid: Uuid, name: &str) -> Result<Arc<SavedUser>, AuthorityError> {
        self.ledger
            .handle_join(uuid, name, self.config.starting_claim_blocks)
    }

    /// Creates a player-owned claim in wilderness, debiting blocks 1:1
    /// against the claimed area.
    pub fn create_claim(
        &self,
        world_id: &str,
        owner: Uuid,
        corner_a: BlockPos,
        corner_b: BlockPos,
    ) -> Result<(), AuthorityError> {
        let region = Region::from_corners(corner_a, corner_b);
        self.validate_bounds(&region)?;
        let owner_name = self.ledger.require_user(owner)?.name.clone();
        let area = region.surface_area();

        self.with_world_mut(world_id, |world| {
            if let Some(other) = world.intersecting(&region, None) {
                return Err(AuthorityError::RegionOverlap {
                    other_owner: other.owner,
                });
            }
            self.ledger
                .edit_blocks(owner, AuditReason::ClaimCreated, |balance| {
                    if balance < area {
                        return Err(AuthorityError::InsufficientBlocks {
                            required: area,
                            available: balance,
                        });
                    }
                    Ok(balance - area)
                })?;
            world.claims.push(Claim::new(Some(owner), region));
            world.cache_user(owner, owner_name.clone());
            Ok(())
        })?;
        info!("claim created in {world_id} for {owner} ({area} blocks)");
        self.highlights.refresh_owner(Some(owner));
        Ok(())
    }

    /// Creates an admin claim: no owner, no block accounting.
    pub fn create_admin_claim(
        &self,
        world_id: &str,
        corner_a: BlockPos,
        corner_b: BlockPos,
    ) -> Result<(), AuthorityError> {
        let region = Region::from_corners(corner_a, corner_b);
        self.validate_bounds(&region)?;
        self.with_world_mut(world_id, |world| {
            if let Some(other) = world.intersecting(&region, None) {
                return Err(AuthorityError::RegionOverlap {
                    other_owner: other.owner,
                });
            }
            world.claims.push(Claim::new(None, region));
            Ok(())
        })?;
        self.highlights.refresh_owner(None);
        Ok(())
    }

    /// Carves a child claim out of the parent found at `parent_pos`.
    pub fn create_child_claim(
        &self,
        world_id: &str,
        actor: Actor,
        parent_pos: BlockPos,
        corner_a: BlockPos,
        corner_b: BlockPos,
    ) -> Result<(), AuthorityError> {
        let region = Region::from_corners(corner_a, corner_b);
        let charge_children = self.config.child_claims_cost_blocks;
        let owner = self.with_world_mut(world_id, |world| {
            let index = world
                .claim_index_at(parent_pos)
                .ok_or(AuthorityError::NoClaimAt {
                    x: parent_pos.x,
                    z: parent_pos.z,
                })?;
            if world.claims[index].child_at(parent_pos).is_some() {
                return Err(AuthorityError::NestedChildClaim);
            }
            self.check_privilege(
                &world.claims[index],
                None,
                actor,
                Privilege::ManageChildClaims,
            )?;
            let parent = &world.claims[index];
            if !parent.region.encloses(&region) {
                return Err(AuthorityError::ChildNotEnclosed);
            }
            if parent
                .children
                .iter()
                .any(|child| child.region.intersects(&region))
            {
                return Err(AuthorityError::ChildOverlapsSibling);
            }
            let owner = parent.owner;
            if charge_children {
                if let Some(owner) = owner {
                    let area = region.surface_area();
                    self.ledger
                        .edit_blocks(owner, AuditReason::ClaimCreated, |balance| {
                            if balance < area {
                                return Err(AuthorityError::InsufficientBlocks {
                                    required: area,
                                    available: balance,
                                });
                            }
                            Ok(balance - area)
                        })?;
                }
            }
            let mut child = Claim::new(owner, region);
            child.inherit_parent = true;
            world.claims[index].children.push(child);
            Ok(owner)
        })?;
        self.highlights.refresh_owner(owner);
        Ok(())
    }

    /// Moves one corner of the top-level claim at `at`. Rejected when the
    /// result would overlap another claim, leave the world limit, or stop
    /// enclosing existing children.
    pub fn resize_claim(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        corner_index: usize,
        new_corner: BlockPos,
    ) -> Result<(), AuthorityError> {
        let owner = self.with_world_mut(world_id, |world| {
            let index = world.claim_index_at(at).ok_or(AuthorityError::NoClaimAt {
                x: at.x,
                z: at.z,
            })?;
            let claim = &world.claims[index];
            self.check_owner(claim, actor)?;
            let resized = claim
                .region
                .resize(corner_index, new_corner)
                .ok_or(AuthorityError::InvalidCorner { corner_index })?;
            self.validate_bounds(&resized)?;
            if let Some(other) = world.intersecting(&resized, Some(index)) {
                return Err(AuthorityError::RegionOverlap {
                    other_owner: other.owner,
                });
            }
            let claim = &world.claims[index];
            if !claim
                .children
                .iter()
                .all(|child| resized.encloses(&child.region))
            {
                return Err(AuthorityError::ChildrenNotEnclosed);
            }
            if let Some(owner) = claim.owner {
                self.settle_area_change(
                    owner,
                    claim.region.surface_area(),
                    resized.surface_area(),
                )?;
            }
            world.claims[index].region = resized;
            Ok(world.claims[index].owner)
        })?;
        self.highlights.refresh_owner(owner);
        Ok(())
    }

    /// Moves one corner of the child claim at `child_pos`.
    pub fn resize_child_claim(
        &self,
        world_id: &str,
        actor: Actor,
        child_pos: BlockPos,
        corner_index: usize,
        new_corner: BlockPos,
    ) -> Result<(), AuthorityError> {
        let charge_children = self.config.child_claims_cost_blocks;
        let owner = self.with_world_mut(world_id, |world| {
            let index = world
                .claim_index_at(child_pos)
                .ok_or(AuthorityError::NoClaimAt {
                    x: child_pos.x,
                    z: child_pos.z,
                })?;
            self.check_privilege(
                &world.claims[index],
                None,
                actor,
                Privilege::ManageChildClaims,
            )?;
            let parent = &world.claims[index];
            let child_index = parent
                .children
                .iter()
                .position(|child| child.region.contains(child_pos))
                .ok_or(AuthorityError::NoChildClaimAt {
                    x: child_pos.x,
                    z: child_pos.z,
                })?;
            let child = &parent.children[child_index];
            let resized = child
                .region
                .resize(corner_index, new_corner)
                .ok_or(AuthorityError::InvalidCorner { corner_index })?;
            if !parent.region.encloses(&resized) {
                return Err(AuthorityError::ChildNotEnclosed);
            }
            if parent
                .children
                .iter()
                .enumerate()
                .any(|(i, sibling)| i != child_index && sibling.region.intersects(&resized))
            {
                return Err(AuthorityError::ChildOverlapsSibling);
            }
            if charge_children {
                if let Some(owner) = child.owner {
                    self.settle_area_change(
                        owner,
                        child.region.surface_area(),
                        resized.surface_area(),
                    )?;
                }
            }
            let owner = parent.owner;
            world.claims[index].children[child_index].region = resized;
            Ok(owner)
        })?;
        self.highlights.refresh_owner(owner);
        Ok(())
    }

    /// Transfers ownership. Trust entries and flags are untouched; child
    /// claims follow the new owner.
    pub fn transfer_claim(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        new_owner: Uuid,
    ) -> Result<(), AuthorityError> {
        let new_owner_name = self.ledger.require_user(new_owner)?.name.clone();
        let previous = self.with_world_mut(world_id, |world| {
            let index = world.claim_index_at(at).ok_or(AuthorityError::NoClaimAt {
                x: at.x,
                z: at.z,
            })?;
            let claim = &world.claims[index];
            if claim.is_admin() {
                return Err(AuthorityError::AdminClaimTransfer);
            }
            self.check_owner(claim, actor)?;
            let previous = claim.owner;
            let claim = &mut world.claims[index];
            claim.owner = Some(new_owner);
            for child in &mut claim.children {
                child.owner = Some(new_owner);
            }
            world.cache_user(new_owner, new_owner_name.clone());
            Ok(previous)
        })?;
        self.highlights.refresh_owner(previous);
        self.highlights.refresh_owner(Some(new_owner));
        Ok(())
    }

    /// Deletes the top-level claim at `at`, refunding its area to the
    /// owner. Children cascade by default; with cascade disabled they are
    /// promoted to top-level claims.
    pub fn delete_claim(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
    ) -> Result<(), AuthorityError> {
        let cascade = self.config.cascade_delete_children;
        let charge_children = self.config.child_claims_cost_blocks;
        let owner = self.with_world_mut(world_id, |world| {
            let index = world.claim_index_at(at).ok_or(AuthorityError::NoClaimAt {
                x: at.x,
                z: at.z,
            })?;
            self.check_owner(&world.claims[index], actor)?;
            let claim = world.claims.remove(index);
            let mut refund = claim.region.surface_area();
            if cascade && charge_children {
                refund += claim
                    .children
                    .iter()
                    .map(|child| child.region.surface_area())
                    .sum::<u64>();
            }
            if !cascade {
                world.claims.extend(claim.children);
            }
            if let Some(owner) = claim.owner {
                self.ledger
                    .edit_blocks(owner, AuditReason::ClaimDeleted, |balance| {
                        Ok(balance.saturating_add(refund))
                    })?;
            }
            world.prune_user_cache();
            Ok(claim.owner)
        })?;
        self.highlights.refresh_owner(owner);
        Ok(())
    }

    /// Deletes every claim `owner` holds on this node, refunding the
    /// summed area once.
    pub fn delete_all_claims(&self, actor: Actor, owner: Uuid) -> Result<u64, AuthorityError> {
        if actor != Actor::Admin && actor.player() != Some(owner) {
            return Err(AuthorityError::NotClaimOwner);
        }
        let count_children = self.config.child_claims_cost_blocks;
        let mut refund_total = 0u64;
        for world_id in self.world_ids() {
            refund_total += self.with_world_mut(&world_id, |world| {
                let refunded = world.remove_claims_of(owner, count_children);
                world.prune_user_cache();
                Ok(refunded)
            })?;
        }
        if refund_total > 0 {
            self.ledger
                .edit_blocks(owner, AuditReason::ClaimDeleted, |balance| {
                    Ok(balance.saturating_add(refund_total))
                })?;
        }
        self.highlights.refresh_owner(Some(owner));
        Ok(refund_total)
    }

    /// Bans a user from the claim at `at` and relocates them out if
    /// present. Independent of trust-level edits.
    pub fn ban_user(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        target: Uuid,
    ) -> Result<(), AuthorityError> {
        let target_name = self.ledger.user(target)?.map(|user| user.name.clone());
        let arbiter = actor.player().unwrap_or(Uuid::nil());
        let region = self.with_world_mut(world_id, |world| {
            {
                let (claim, parent) = innermost_claim_view(world, at)?;
                self.check_privilege(claim, parent, actor, Privilege::ManageBans)?;
            }
            let region = {
                let (claim, _) = innermost_claim_mut(world, at)?;
                if claim.owner == Some(target) {
                    return Err(AuthorityError::OwnerBan);
                }
                if claim.is_banned(target) {
                    return Err(AuthorityError::AlreadyBanned { uuid: target });
                }
                claim.bans.insert(target, arbiter);
                claim.region
            };
            if let Some(name) = target_name.clone() {
                world.cache_user(target, name);
            }
            Ok(region)
        })?;
        if self.presence.users_in(world_id, &region).contains(&target) {
            self.presence.relocate_out(target, world_id, &region);
        }
        Ok(())
    }

    pub fn unban_user(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        target: Uuid,
    ) -> Result<(), AuthorityError> {
        self.with_world_mut(world_id, |world| {
            {
                let (claim, parent) = innermost_claim_view(world, at)?;
                self.check_privilege(claim, parent, actor, Privilege::ManageBans)?;
            }
            let (claim, _) = innermost_claim_mut(world, at)?;
            if claim.bans.remove(&target).is_none() {
                return Err(AuthorityError::NotBanned { uuid: target });
            }
            Ok(())
        })
    }

    /// Toggles the private flag. Enabling relocates every present user who
    /// can no longer navigate the claim.
    pub fn set_private(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        private: bool,
    ) -> Result<(), AuthorityError> {
        let region = self.with_world_mut(world_id, |world| {
            {
                let (claim, parent) = innermost_claim_view(world, at)?;
                self.check_privilege(claim, parent, actor, Privilege::MakePrivate)?;
            }
            let (claim, _) = innermost_claim_mut(world, at)?;
            claim.private = private;
            Ok(claim.region)
        })?;
        if private {
            let world = match self.world(world_id) {
                Some(world) => world,
                None => return Ok(()),
            };
            for user in self.presence.users_in(world_id, &region) {
                if !world.can_navigate(user, region.near, &self.registry, self.trust_ctx.as_ref())
                {
                    self.presence.relocate_out(user, world_id, &region);
                }
            }
        }
        Ok(())
    }

    /// Grants `trustable` a trust level on the claim at `at`. A non-owner
    /// actor cannot hand out a level above their own weight.
    pub fn set_trust(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        trustable: Trustable,
        level_id: &str,
    ) -> Result<(), AuthorityError> {
        if !self.registry.contains(level_id) {
            return Err(AuthorityError::UnknownTrustLevel {
                id: level_id.to_string(),
            });
        }
        let granted_weight = self
            .registry
            .get(level_id)
            .map(|level| level.weight)
            .unwrap_or(i32::MAX);
        self.with_world_mut(world_id, |world| {
            let (claim, parent) = innermost_claim_view(world, at)?;
            self.check_privilege(claim, parent, actor, Privilege::ManageTrustees)?;
            if let Actor::Player(player) = actor {
                if !claim.is_owner(player) && !parent.is_some_and(|p| p.is_owner(player)) {
                    let own_weight = claim
                        .effective_trust(player, parent, &self.registry, self.trust_ctx.as_ref())
                        .map(|level| level.weight)
                        .unwrap_or(i32::MIN);
                    if own_weight < granted_weight {
                        return Err(AuthorityError::PermissionDenied {
                            privilege: Privilege::ManageTrustees,
                        });
                    }
                }
            }
            let cached = {
                let (claim, _) = innermost_claim_mut(world, at)?;
                match &trustable {
                    Trustable::User { uuid, name } => {
                        claim.trustees.insert(*uuid, level_id.to_string());
                        Some((*uuid, name.clone()))
                    }
                    Trustable::Group { .. } | Trustable::Tag { .. } => {
                        claim
                            .named_trust
                            .insert(trustable.identity(), level_id.to_string());
                        None
                    }
                }
            };
            if let Some((uuid, name)) = cached {
                world.cache_user(uuid, name);
            }
            Ok(())
        })
    }

    pub fn remove_trust(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        trustable: &Trustable,
    ) -> Result<(), AuthorityError> {
        self.with_world_mut(world_id, |world| {
            let (claim, parent) = innermost_claim_view(world, at)?;
            self.check_privilege(claim, parent, actor, Privilege::ManageTrustees)?;
            let (claim, _) = innermost_claim_mut(world, at)?;
            match trustable {
                Trustable::User { uuid, .. } => {
                    claim.trustees.remove(uuid);
                }
                Trustable::Group { .. } | Trustable::Tag { .. } => {
                    claim.named_trust.remove(&trustable.identity());
                }
            }
            world.prune_user_cache();
            Ok(())
        })
    }

    /// Adds or removes an operation from the claim's public flag set.
    pub fn set_claim_flag(
        &self,
        world_id: &str,
        actor: Actor,
        at: BlockPos,
        op: OperationType,
        allowed: bool,
    ) -> Result<(), AuthorityError> {
        self.with_world_mut(world_id, |world| {
            {
                let (claim, parent) = innermost_claim_view(world, at)?;
                self.check_privilege(claim, parent, actor, Privilege::ManageOperationGroups)?;
            }
            let (claim, _) = innermost_claim_mut(world, at)?;
            if allowed {
                claim.default_flags.insert(op);
            } else {
                claim.default_flags.remove(&op);
            }
            Ok(())
        })
    }

    /// Edits the world's wilderness defaults. Admin only.
    pub fn set_wilderness_flag(
        &self,
        world_id: &str,
        actor: Actor,
        op: OperationType,
        allowed: bool,
    ) -> Result<(), AuthorityError> {
        if actor != Actor::Admin {
            return Err(AuthorityError::PermissionDenied {
                privilege: Privilege::ManageOperationGroups,
            });
        }
        self.with_world_mut(world_id, |world| {
            if allowed {
                world.wilderness_flags.insert(op);
            } else {
                world.wilderness_flags.remove(&op);
            }
            Ok(())
        })
    }

    pub fn set_inherit_parent(
        &self,
        world_id: &str,
        actor: Actor,
        child_pos: BlockPos,
        inherit: bool,
    ) -> Result<(), AuthorityError> {
        self.with_world_mut(world_id, |world| {
            let index = world
                .claim_index_at(child_pos)
                .ok_or(AuthorityError::NoClaimAt {
                    x: child_pos.x,
                    z: child_pos.z,
                })?;
            self.check_privilege(
                &world.claims[index],
                None,
                actor,
                Privilege::ManageChildClaims,
            )?;
            let child = world.claims[index]
                .child_at_mut(child_pos)
                .ok_or(AuthorityError::NoChildClaimAt {
                    x: child_pos.x,
                    z: child_pos.z,
                })?;
            child.inherit_parent = inherit;
            Ok(())
        })
    }

    /// Removes every claim owned by users inactive past the configured
    /// threshold. Refunds are summed across worlds and applied once per
    /// user after all removals complete.
    pub fn prune_inactive(&self) -> Result<PruneReport, AuthorityError> {
        let now = (self.clock)();
        let cutoff = self.config.prune_cutoff_ms(now);
        let inactive = self.store.get_inactive_users(cutoff)?;
        if inactive.is_empty() {
            return Ok(PruneReport::default());
        }
        let count_children = self.config.child_claims_cost_blocks;
        let mut report = PruneReport::default();
        for world_id in self.world_ids() {
            for user in &inactive {
                let uuid = user.uuid;
                let (removed, refunded) = self.with_world_mut(&world_id, |world| {
                    let before = world.claims.len();
                    let refunded = world.remove_claims_of(uuid, count_children);
                    let removed = before - world.claims.len();
                    if removed > 0 {
                        world.prune_user_cache();
                    }
                    Ok((removed, refunded))
                })?;
                if removed > 0 {
                    report.removed_claims += removed;
                    *report.refunded.entry(uuid).or_insert(0) += refunded;
                }
            }
        }
        for (uuid, refund) in &report.refunded {
            let (uuid, refund) = (*uuid, *refund);
            self.ledger
                .edit_blocks(uuid, AuditReason::ClaimsPruned, |balance| {
                    Ok(balance.saturating_add(refund))
                })?;
            self.highlights.refresh_owner(Some(uuid));
        }
        if report.removed_claims > 0 {
            info!(
                "pruned {} claims from {} inactive users",
                report.removed_claims,
                report.refunded.len()
            );
        }
        Ok(report)
    }

    /// Buys claim blocks through the economy hook, then credits them via
    /// the audited ledger path.
    pub fn buy_claim_blocks(
        &self,
        user: Uuid,
        amount: u64,
        total_price: f64,
    ) -> Result<Arc<SavedUser>, AuthorityError> {
        self.ledger.require_user(user)?;
        self.economy
            .debit(user, total_price)
            .map_err(|reason| AuthorityError::EconomyRejected { reason })?;
        self.ledger
            .grant_blocks(user, amount, AuditReason::Purchase)
    }

    /// All claims `owner` holds on this node, grouped by world.
    pub fn claims_of(&self, owner: Uuid) -> BTreeMap<String, Vec<Claim>> {
        let worlds = self.worlds.read().expect("lock worlds");
        worlds
            .iter()
            .filter_map(|(world_id, world)| {
                let claims: Vec<Claim> = world
                    .claims_by(owner)
                    .into_iter()
                    .cloned()
                    .collect();
                (!claims.is_empty()).then(|| (world_id.clone(), claims))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Single mutation path per world: clone the snapshot, run the
    /// validated edit against the clone, swap the Arc, persist, broadcast.
    /// A cache miss consults the store before treating the world as
    /// empty, so a mutation right after an eviction cannot overwrite the
    /// persisted claims with a fresh world.
    fn with_world_mut<T>(
        &self,
        world_id: &str,
        edit: impl FnOnce(&mut ClaimWorld) -> Result<T, AuthorityError>,
    ) -> Result<T, AuthorityError> {
        let mut worlds = self.worlds.write().expect("lock worlds");
        let mut draft = match worlds.get(world_id) {
            Some(current) => (**current).clone(),
            None => {
                let mut stored = self.store.get_claim_worlds(&self.node_id)?;
                match stored.remove(world_id) {
                    Some(world) => world,
                    None => {
                        let mut world = ClaimWorld::new(world_id);
                        world.wilderness_flags = self.config.default_wilderness_flags.clone();
                        world
                    }
                }
            }
        };
        let value = edit(&mut draft)?;
        let updated = Arc::new(draft);
        worlds.insert(world_id.to_string(), Arc::clone(&updated));
        drop(worlds);

        if let Err(err) = self.persister.persist_world(&self.node_id, &updated) {
            warn!("failed to persist claim world {world_id}: {err:?}");
            return Err(err.into());
        }
        self.persister
            .invalidate(Invalidation::world(world_id, self.node_id.clone()));
        Ok(value)
    }

    fn validate_bounds(&self, region: &Region) -> Result<(), AuthorityError> {
        if !region.within_limit(self.config.world_limit) {
            return Err(AuthorityError::OutsideWorldLimit {
                limit: self.config.world_limit,
            });
        }
        let area = region.surface_area();
        if area < self.config.minimum_claim_area {
            return Err(AuthorityError::BelowMinimumArea {
                minimum: self.config.minimum_claim_area,
                area,
            });
        }
        Ok(())
    }

    /// Debits an area increase or refunds a shrink through the ledger.
    fn settle_area_change(
        &self,
        owner: Uuid,
        old_area: u64,
        new_area: u64,
    ) -> Result<(), AuthorityError> {
        if new_area == old_area {
            return Ok(());
        }
        self.ledger
            .edit_blocks(owner, AuditReason::ClaimResized, |balance| {
                if new_area > old_area {
                    let needed = new_area - old_area;
                    if balance < needed {
                        return Err(AuthorityError::InsufficientBlocks {
                            required: needed,
                            available: balance,
                        });
                    }
                    Ok(balance - needed)
                } else {
                    Ok(balance.saturating_add(old_area - new_area))
                }
            })?;
        Ok(())
    }

    fn check_owner(&self, claim: &Claim, actor: Actor) -> Result<(), AuthorityError> {
        match actor {
            Actor::Admin => Ok(()),
            Actor::Player(player) if claim.is_owner(player) => Ok(()),
            Actor::Player(_) => Err(AuthorityError::NotClaimOwner),
        }
    }

    fn check_privilege(
        &self,
        claim: &Claim,
        parent: Option<&Claim>,
        actor: Actor,
        privilege: Privilege,
    ) -> Result<(), AuthorityError> {
        match actor {
            Actor::Admin => Ok(()),
            Actor::Player(player) => {
                if claim.is_privilege_allowed(
                    privilege,
                    player,
                    parent,
                    &self.registry,
                    self.trust_ctx.as_ref(),
                ) {
                    Ok(())
                } else {
                    Err(AuthorityError::PermissionDenied { privilege })
                }
            }
        }
    }

}

/// Innermost claim at `pos` with its top-level claim region, mutable.
fn innermost_claim_mut(
    world: &mut ClaimWorld,
    pos: BlockPos,
) -> Result<(&mut Claim, Region), AuthorityError> {
    let index = world
        .claim_index_at(pos)
        .ok_or(AuthorityError::NoClaimAt { x: pos.x, z: pos.z })?;
    let top_region = world.claims[index].region;
    let top = &mut world.claims[index];
    if top.child_at(pos).is_some() {
        let child = top.child_at_mut(pos).expect("child present");
        Ok((child, top_region))
    } else {
        Ok((top, top_region))
    }
}

/// Innermost claim at `pos` with its parent, immutable.
fn innermost_claim_view(
    world: &ClaimWorld,
    pos: BlockPos,
) -> Result<(&Claim, Option<&Claim>), AuthorityError> {
    let found = world
        .resolve_at(pos)
        .ok_or(AuthorityError::NoClaimAt { x: pos.x, z: pos.z })?;
    match found.child {
        Some(child) => Ok((child, Some(found.top))),
        None => Ok((found.top, None)),
    }
}
