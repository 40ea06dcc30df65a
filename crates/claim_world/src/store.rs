//! Persistence contract and the in-memory store used by tests and
//! single-process embeddings. Claim worlds are always written as whole
//! snapshots, never per-claim.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::SavedUser;
use crate::world::ClaimWorld;

/// One logical world on one server node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerWorld {
    pub node_id: String,
    pub world_id: String,
}

/// Entity kinds addressed by cache-invalidation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    World,
}

/// Fire-and-forget cache-invalidation signal. `target` of `None` addresses
/// every node; delivery is best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub kind: EntityKind,
    pub id: String,
    pub target: Option<String>,
    pub origin: String,
}

impl Invalidation {
    pub fn user(uuid: Uuid, origin: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::User,
            id: uuid.to_string(),
            target: None,
            origin: origin.into(),
        }
    }

    pub fn world(world_id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::World,
            id: world_id.into(),
            target: None,
            origin: origin.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io(String),
    Serde(String),
    UnsupportedVersion { version: u32, expected: u32 },
}

impl From<io::Error> for StoreError {
    fn from(error: io::Error) -> Self {
        StoreError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serde(error.to_string())
    }
}

impl From<StoreError> for crate::error::AuthorityError {
    fn from(error: StoreError) -> Self {
        crate::error::AuthorityError::Store(format!("{error:?}"))
    }
}

/// Read/write contract the storage engine must satisfy.
pub trait ClaimStore: Send + Sync {
    fn get_user(&self, uuid: Uuid) -> Result<Option<SavedUser>, StoreError>;
    fn create_or_update_user(&self, user: &SavedUser) -> Result<(), StoreError>;
    /// Users whose last login is strictly before `cutoff_ms`.
    fn get_inactive_users(&self, cutoff_ms: i64) -> Result<Vec<SavedUser>, StoreError>;
    fn get_claim_worlds(&self, node_id: &str) -> Result<BTreeMap<String, ClaimWorld>, StoreError>;
    /// Whole-snapshot write of one world's claim state.
    fn update_claim_world(&self, node_id: &str, world: &ClaimWorld) -> Result<(), StoreError>;
    /// Cross-node enumeration for admin and migration tooling.
    fn get_all_claim_worlds(&self) -> Result<BTreeMap<ServerWorld, ClaimWorld>, StoreError>;
}

/// Dispatches persistence writes and invalidation fan-out after a
/// mutation. The queued implementation never blocks the caller; the
/// synchronous implementation surfaces save failures directly.
pub trait Persister: Send + Sync {
    fn persist_world(&self, node_id: &str, world: &ClaimWorld) -> Result<(), StoreError>;
    fn persist_user(&self, user: &SavedUser) -> Result<(), StoreError>;
    fn invalidate(&self, invalidation: Invalidation);
}

/// Persister that writes through to the store on the calling thread and
/// drops invalidations.
///
/// Test fixture only. World mutations run their edit closure, user
/// persists included, under the world write lock; a write-through
/// persister holds that lock across storage I/O, stalling the
/// evaluation path. Deployments, single-node included, use the queued
/// persister so the write path never does storage I/O.
pub struct DirectPersister {
    store: std::sync::Arc<dyn ClaimStore>,
}

impl DirectPersister {
    pub fn new(store: std::sync::Arc<dyn ClaimStore>) -> Self {
        Self { store }
    }
}

impl Persister for DirectPersister {
    fn persist_world(&self, node_id: &str, world: &ClaimWorld) -> Result<(), StoreError> {
        self.store.update_claim_world(node_id, world)
    }

    fn persist_user(&self, user: &SavedUser) -> Result<(), StoreError> {
        self.store.create_or_update_user(user)
    }

    fn invalidate(&self, _invalidation: Invalidation) {}
}

/// In-memory store keyed the same way the flat-file store lays out its
/// documents.
#[derive(Default)]
pub struct MemoryClaimStore {
    users: Mutex<HashMap<Uuid, SavedUser>>,
    worlds: Mutex<BTreeMap<ServerWorld, ClaimWorld>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClaimStore for MemoryClaimStore {
    fn get_user(&self, uuid: Uuid) -> Result<Option<SavedUser>, StoreError> {
        let users = self.users.lock().expect("lock users");
        Ok(users.get(&uuid).cloned())
    }

    fn create_or_update_user(&self, user: &SavedUser) -> Result<(), StoreError> {
        let mut users = self.users.lock().expect("lock users");
        users.insert(user.uuid, user.clone());
        Ok(())
    }

    fn get_inactive_users(&self, cutoff_ms: i64) -> Result<Vec<SavedUser>, StoreError> {
        let users = self.users.lock().expect("lock users");
        Ok(users
            .values()
            .filter(|user| user.last_login_ms < cutoff_ms)
            .cloned()
            .collect())
    }

    fn get_claim_worlds(&self, node_id: &str) -> Result<BTreeMap<String, ClaimWorld>, StoreError> {
        let worlds = self.worlds.lock().expect("lock worlds");
        Ok(worlds
            .iter()
            .filter(|(key, _)| key.node_id == node_id)
            .map(|(key, world)| (key.world_id.clone(), world.clone()))
            .collect())
    }

    fn update_claim_world(&self, node_id: &str, world: &ClaimWorld) -> Result<(), StoreError> {
        let mut worlds = self.worlds.lock().expect("lock worlds");
        worlds.insert(
            ServerWorld {
                node_id: node_id.to_string(),
                world_id: world.world_id.clone(),
            },
            world.clone(),
        );
        Ok(())
    }

    fn get_all_claim_worlds(&self) -> Result<BTreeMap<ServerWorld, ClaimWorld>, StoreError> {
        let worlds = self.worlds.lock().expect("lock worlds");
        Ok(worlds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SavedUser;

    #[test]
    fn memory_store_scopes_worlds_by_node() {
        let store = MemoryClaimStore::new();
        store
            .update_claim_world("node-a", &ClaimWorld::new("overworld"))
            .expect("save");
        store
            .update_claim_world("node-b", &ClaimWorld::new("overworld"))
            .expect("save");

        let node_a = store.get_claim_worlds("node-a").expect("worlds");
        assert_eq!(node_a.len(), 1);
        let all = store.get_all_claim_worlds().expect("all worlds");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn inactive_users_use_a_strict_cutoff() {
        let store = MemoryClaimStore::new();
        let mut stale = SavedUser::new(Uuid::new_v4(), "stale", 100, 1_000);
        stale.last_login_ms = 999;
        let fresh = SavedUser::new(Uuid::new_v4(), "fresh", 100, 1_000);
        store.create_or_update_user(&stale).expect("save");
        store.create_or_update_user(&fresh).expect("save");

        let inactive = store.get_inactive_users(1_000).expect("inactive");
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].uuid, stale.uuid);
    }
}
