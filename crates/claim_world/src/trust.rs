//! Trust levels, privileges, and the polymorphic trustable abstraction.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Management actions gated by a trust level, as opposed to in-world
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    ManageTrustees,
    ManageChildClaims,
    ManageBans,
    MakePrivate,
    ManageOperationGroups,
}

/// Abstract in-world operation kinds, produced by the platform event hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    BlockPlace,
    BlockBreak,
    BlockInteract,
    ContainerOpen,
    RedstoneInteract,
    EntityInteract,
    EntityDamage,
    ItemUse,
    FarmBlockInteract,
}

impl OperationType {
    pub const ALL: [OperationType; 9] = [
        OperationType::BlockPlace,
        OperationType::BlockBreak,
        OperationType::BlockInteract,
        OperationType::ContainerOpen,
        OperationType::RedstoneInteract,
        OperationType::EntityInteract,
        OperationType::EntityDamage,
        OperationType::ItemUse,
        OperationType::FarmBlockInteract,
    ];
}

/// A named, weight-ordered bundle of privileges and allowed operations.
/// Higher weight subsumes lower weight for ranking purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLevel {
    pub id: String,
    pub display_name: String,
    pub weight: i32,
    #[serde(default)]
    pub privileges: BTreeSet<Privilege>,
    #[serde(default)]
    pub allowed_operations: BTreeSet<OperationType>,
}

impl TrustLevel {
    pub fn allows_operation(&self, op: OperationType) -> bool {
        self.allowed_operations.contains(&op)
    }

    pub fn allows_privilege(&self, privilege: Privilege) -> bool {
        self.privileges.contains(&privilege)
    }
}

/// Registry of trust levels, keyed by id. Level ids stored on claims that
/// no longer resolve here are treated as no trust.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLevelRegistry {
    levels: BTreeMap<String, TrustLevel>,
}

impl TrustLevelRegistry {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Catalog shipped by default: access < container < build < manage.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let access_ops: BTreeSet<OperationType> = [
            OperationType::BlockInteract,
            OperationType::EntityInteract,
            OperationType::ItemUse,
        ]
        .into_iter()
        .collect();
        let mut container_ops = access_ops.clone();
        container_ops.insert(OperationType::ContainerOpen);
        container_ops.insert(OperationType::RedstoneInteract);
        let mut build_ops = container_ops.clone();
        build_ops.insert(OperationType::BlockPlace);
        build_ops.insert(OperationType::BlockBreak);
        build_ops.insert(OperationType::EntityDamage);
        build_ops.insert(OperationType::FarmBlockInteract);

        registry.register(TrustLevel {
            id: "access".to_string(),
            display_name: "Access".to_string(),
            weight: 100,
            privileges: BTreeSet::new(),
            allowed_operations: access_ops,
        });
        registry.register(TrustLevel {
            id: "container".to_string(),
            display_name: "Container".to_string(),
            weight: 200,
            privileges: BTreeSet::new(),
            allowed_operations: container_ops,
        });
        registry.register(TrustLevel {
            id: "build".to_string(),
            display_name: "Build".to_string(),
            weight: 300,
            privileges: BTreeSet::new(),
            allowed_operations: build_ops.clone(),
        });
        registry.register(TrustLevel {
            id: "manage".to_string(),
            display_name: "Manage".to_string(),
            weight: 400,
            privileges: [
                Privilege::ManageTrustees,
                Privilege::ManageChildClaims,
                Privilege::ManageBans,
                Privilege::MakePrivate,
                Privilege::ManageOperationGroups,
            ]
            .into_iter()
            .collect(),
            allowed_operations: build_ops,
        });
        registry
    }

    pub fn register(&mut self, level: TrustLevel) {
        self.levels.insert(level.id.clone(), level);
    }

    pub fn get(&self, id: &str) -> Option<&TrustLevel> {
        self.levels.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.levels.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustLevel> {
        self.levels.values()
    }

    /// Picks the highest-weight level among candidate ids, skipping ids
    /// that no longer resolve. The returned borrow is tied to the
    /// registry, not to the candidate strings.
    pub fn highest<'a, 'b, I>(&'a self, ids: I) -> Option<&'a TrustLevel>
    where
        I: IntoIterator<Item = &'b str>,
    {
        ids.into_iter()
            .filter_map(|id| self.levels.get(id))
            .max_by_key(|level| level.weight)
    }
}

impl Default for TrustLevelRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Anything that can hold a trust level on a claim. Groups are scoped to
/// the owner of the claim they are trusted on; tags carry no stored
/// membership list and are evaluated live through a [`TrustContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trustable {
    User { uuid: Uuid, name: String },
    Group { name: String },
    Tag { name: String },
}

impl Trustable {
    /// Stable identity string used as a trust-map key: the bare uuid for
    /// users, `@name` for groups, `#name` for tags.
    pub fn identity(&self) -> String {
        match self {
            Trustable::User { uuid, .. } => uuid.to_string(),
            Trustable::Group { name } => format!("@{name}"),
            Trustable::Tag { name } => format!("#{name}"),
        }
    }

    /// Whether this trustable applies to `user` on a claim owned by
    /// `claim_owner`, under the given context.
    pub fn matches(&self, user: Uuid, claim_owner: Option<Uuid>, ctx: &dyn TrustContext) -> bool {
        match self {
            Trustable::User { uuid, .. } => *uuid == user,
            Trustable::Group { name } => {
                claim_owner.is_some_and(|owner| ctx.is_group_member(owner, name, user))
            }
            Trustable::Tag { name } => ctx.tag_contains(name, user),
        }
    }

    /// Inverse of [`Trustable::identity`] for group/tag keys stored on a
    /// claim's named-trust map.
    pub fn from_named_key(key: &str) -> Option<Trustable> {
        if let Some(name) = key.strip_prefix('@') {
            Some(Trustable::Group {
                name: name.to_string(),
            })
        } else {
            key.strip_prefix('#').map(|name| Trustable::Tag {
                name: name.to_string(),
            })
        }
    }
}

/// Resolves dynamic trustable membership at check time. Group lists live in
/// the owning user's saved preferences; tags resolve against an external
/// permission-group provider.
pub trait TrustContext: Send + Sync {
    fn is_group_member(&self, owner: Uuid, group: &str, user: Uuid) -> bool;
    fn tag_contains(&self, tag: &str, user: Uuid) -> bool;
}

/// External permission-group provider behind trust tags. Membership is
/// queried at check time, never stored.
pub trait TagResolver: Send + Sync {
    fn tag_contains(&self, tag: &str, user: Uuid) -> bool;
}

/// Resolver for deployments without a permission-group provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTags;

impl TagResolver for NoTags {
    fn tag_contains(&self, _tag: &str, _user: Uuid) -> bool {
        false
    }
}

/// Context that resolves no groups and no tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyTrustContext;

impl TrustContext for EmptyTrustContext {
    fn is_group_member(&self, _owner: Uuid, _group: &str, _user: Uuid) -> bool {
        false
    }

    fn tag_contains(&self, _tag: &str, _user: Uuid) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_orders_levels_by_weight() {
        let registry = TrustLevelRegistry::standard();
        let weights: Vec<i32> = ["access", "container", "build", "manage"]
            .iter()
            .map(|id| registry.get(id).expect("level").weight)
            .collect();
        assert!(weights.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn higher_levels_subsume_lower_operations() {
        let registry = TrustLevelRegistry::standard();
        let access = registry.get("access").expect("access");
        let build = registry.get("build").expect("build");
        for op in &access.allowed_operations {
            assert!(build.allows_operation(*op));
        }
        assert!(build.allows_operation(OperationType::BlockPlace));
        assert!(!access.allows_operation(OperationType::BlockPlace));
    }

    #[test]
    fn highest_skips_dangling_ids() {
        let registry = TrustLevelRegistry::standard();
        let picked = registry
            .highest(["gone", "access", "container"])
            .expect("level");
        assert_eq!(picked.id, "container");
        assert!(registry.highest(["gone", "also-gone"]).is_none());
    }

    #[test]
    fn highest_result_outlives_the_candidate_ids() {
        let registry = TrustLevelRegistry::standard();
        let picked = {
            let ids = vec!["access".to_string(), "manage".to_string()];
            registry
                .highest(ids.iter().map(String::as_str))
                .expect("level")
        };
        assert_eq!(picked.id, "manage");
    }

    #[test]
    fn trustable_identities_are_stable_and_distinct() {
        let uuid = Uuid::new_v4();
        let user = Trustable::User {
            uuid,
            name: "alex".to_string(),
        };
        let group = Trustable::Group {
            name: "friends".to_string(),
        };
        let tag = Trustable::Tag {
            name: "staff".to_string(),
        };
        assert_eq!(user.identity(), uuid.to_string());
        assert_eq!(group.identity(), "@friends");
        assert_eq!(tag.identity(), "#staff");
        assert_eq!(Trustable::from_named_key("@friends"), Some(group));
        assert_eq!(Trustable::from_named_key("#staff"), Some(tag));
        assert_eq!(Trustable::from_named_key(&uuid.to_string()), None);
    }

    #[test]
    fn trustable_matching_uses_the_context() {
        struct StaffOnly;
        impl TrustContext for StaffOnly {
            fn is_group_member(&self, _owner: Uuid, group: &str, _user: Uuid) -> bool {
                group == "friends"
            }
            fn tag_contains(&self, tag: &str, _user: Uuid) -> bool {
                tag == "staff"
            }
        }

        let user = Uuid::new_v4();
        let owner = Some(Uuid::new_v4());
        assert!(Trustable::Group {
            name: "friends".to_string()
        }
        .matches(user, owner, &StaffOnly));
        assert!(!Trustable::Group {
            name: "friends".to_string()
        }
        .matches(user, None, &StaffOnly));
        assert!(!Trustable::Group {
            name: "others".to_string()
        }
        .matches(user, owner, &StaffOnly));
        assert!(Trustable::Tag {
            name: "staff".to_string()
        }
        .matches(user, owner, &StaffOnly));
        assert!(!Trustable::User {
            uuid: Uuid::new_v4(),
            name: "alex".to_string()
        }
        .matches(user, owner, &StaffOnly));
    }
}
