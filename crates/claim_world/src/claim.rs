//! A single owned or admin-owned claim: trustees, bans, flags, children,
//! and the trust-resolution rules evaluated against it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{BlockPos, Region};
use crate::trust::{OperationType, Privilege, TrustContext, TrustLevel, TrustLevelRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// `None` marks an admin claim: no owner, no block accounting.
    pub owner: Option<Uuid>,
    pub region: Region,
    /// Individually trusted users, uuid to trust-level id.
    #[serde(default)]
    pub trustees: BTreeMap<Uuid, String>,
    /// Group (`@name`) and tag (`#name`) trust, keyed by identity string.
    #[serde(default)]
    pub named_trust: BTreeMap<String, String>,
    /// Banned user to the arbiter who issued the ban.
    #[serde(default)]
    pub bans: BTreeMap<Uuid, Uuid>,
    /// Operations allowed to everyone regardless of trust.
    #[serde(default)]
    pub default_flags: BTreeSet<OperationType>,
    /// Child claims fall back to the parent's trust resolution when set.
    #[serde(default)]
    pub inherit_parent: bool,
    /// Private claims additionally block navigation by untrusted users.
    #[serde(default)]
    pub private: bool,
    /// Child claims; each child region is enclosed by `region` at all
    /// times, and children never have children of their own.
    #[serde(default)]
    pub children: Vec<Claim>,
}

impl Claim {
    pub fn new(owner: Option<Uuid>, region: Region) -> Self {
        Self {
            owner,
            region,
            trustees: BTreeMap::new(),
            named_trust: BTreeMap::new(),
            bans: BTreeMap::new(),
            default_flags: BTreeSet::new(),
            inherit_parent: true,
            private: false,
            children: Vec::new(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_owner(&self, user: Uuid) -> bool {
        self.owner == Some(user)
    }

    pub fn is_banned(&self, user: Uuid) -> bool {
        self.bans.contains_key(&user)
    }

    /// Innermost child whose region covers `pos`.
    pub fn child_at(&self, pos: BlockPos) -> Option<&Claim> {
        self.children.iter().find(|child| child.region.contains(pos))
    }

    pub fn child_at_mut(&mut self, pos: BlockPos) -> Option<&mut Claim> {
        self.children
            .iter_mut()
            .find(|child| child.region.contains(pos))
    }

    /// Every uuid referenced by this claim and its children, for the
    /// world-level identity cache.
    pub fn referenced_users(&self) -> BTreeSet<Uuid> {
        let mut users = BTreeSet::new();
        if let Some(owner) = self.owner {
            users.insert(owner);
        }
        users.extend(self.trustees.keys().copied());
        for (banned, arbiter) in &self.bans {
            users.insert(*banned);
            users.insert(*arbiter);
        }
        for child in &self.children {
            users.extend(child.referenced_users());
        }
        users
    }

    /// Resolves the effective trust level for `user` on this claim.
    ///
    /// An explicit ban is terminal. Otherwise direct trustee entries and
    /// matching group/tag entries are collected and the highest weight
    /// wins. A child claim with `inherit_parent` and no local match defers
    /// to the parent's resolution for the same user; the chain is at most
    /// two deep because children cannot nest.
    pub fn effective_trust<'a>(
        &self,
        user: Uuid,
        parent: Option<&Claim>,
        registry: &'a TrustLevelRegistry,
        ctx: &dyn TrustContext,
    ) -> Option<&'a TrustLevel> {
        if self.is_banned(user) {
            return None;
        }
        let local = self.local_trust(user, registry, ctx);
        if local.is_some() {
            return local;
        }
        if self.inherit_parent {
            if let Some(parent) = parent {
                return parent.effective_trust(user, None, registry, ctx);
            }
        }
        None
    }

    fn local_trust<'a>(
        &self,
        user: Uuid,
        registry: &'a TrustLevelRegistry,
        ctx: &dyn TrustContext,
    ) -> Option<&'a TrustLevel> {
        let direct = self.trustees.get(&user).map(String::as_str);
        let named = self.named_trust.iter().filter_map(|(key, level_id)| {
            let trustable = crate::trust::Trustable::from_named_key(key)?;
            trustable
                .matches(user, self.owner, ctx)
                .then_some(level_id.as_str())
        });
        registry.highest(direct.into_iter().chain(named))
    }

    /// Whether `user` may perform `op` here: the default flag set allows it
    /// publicly, the owner always may, or the effective trust level lists
    /// the operation.
    pub fn is_operation_allowed(
        &self,
        op: OperationType,
        user: Uuid,
        parent: Option<&Claim>,
        registry: &TrustLevelRegistry,
        ctx: &dyn TrustContext,
    ) -> bool {
        if self.default_flags.contains(&op) {
            return true;
        }
        if self.is_owner(user) || parent.is_some_and(|p| p.is_owner(user)) {
            return true;
        }
        self.effective_trust(user, parent, registry, ctx)
            .is_some_and(|level| level.allows_operation(op))
    }

    /// Whether `user` holds a management privilege here. Owners hold every
    /// privilege; admin claims grant none through ownership.
    pub fn is_privilege_allowed(
        &self,
        privilege: Privilege,
        user: Uuid,
        parent: Option<&Claim>,
        registry: &TrustLevelRegistry,
        ctx: &dyn TrustContext,
    ) -> bool {
        if self.is_owner(user) || parent.is_some_and(|p| p.is_owner(user)) {
            return true;
        }
        self.effective_trust(user, parent, registry, ctx)
            .is_some_and(|level| level.allows_privilege(privilege))
    }

    /// Whether `user` may move into this claim. Only private claims
    /// restrict navigation, and only for users with no effective trust.
    pub fn can_navigate(
        &self,
        user: Uuid,
        parent: Option<&Claim>,
        registry: &TrustLevelRegistry,
        ctx: &dyn TrustContext,
    ) -> bool {
        if !self.private {
            return true;
        }
        if self.is_owner(user) || parent.is_some_and(|p| p.is_owner(user)) {
            return true;
        }
        self.effective_trust(user, parent, registry, ctx).is_some()
    }
}
