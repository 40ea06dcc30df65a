//! Flat-file storage engine. One JSON document per user and per
//! node/world pair:
//!
//! ```text
//! <root>/users/<uuid>.json
//! <root>/worlds/<node_id>/<world_id>.json
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use uuid::Uuid;

use claim_world::{system_clock, ClaimStore, ClaimWorld, Clock, SavedUser, ServerWorld, StoreError};

use crate::snapshot::WorldDocument;

pub struct LocalClaimStore {
    root: PathBuf,
    clock: Clock,
}

impl LocalClaimStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn users_dir(&self) -> PathBuf {
        self.root.join("users")
    }

    fn worlds_dir(&self) -> PathBuf {
        self.root.join("worlds")
    }

    fn user_path(&self, uuid: Uuid) -> PathBuf {
        self.users_dir().join(format!("{uuid}.json"))
    }

    fn world_path(&self, node_id: &str, world_id: &str) -> PathBuf {
        self.worlds_dir().join(node_id).join(format!("{world_id}.json"))
    }

    fn read_world_document(path: &Path) -> Result<WorldDocument, StoreError> {
        let raw = fs::read_to_string(path)?;
        WorldDocument::from_json(&raw)
    }

    fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reads every world document under one node directory. Files that
    /// fail to parse are skipped with a warning so one corrupt snapshot
    /// cannot take the whole node down; an unsupported schema version is
    /// still fatal.
    fn load_node_worlds(&self, node_dir: &Path) -> Result<BTreeMap<String, ClaimWorld>, StoreError> {
        let mut worlds = BTreeMap::new();
        for entry in fs::read_dir(node_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_world_document(&path) {
                Ok(document) => {
                    worlds.insert(document.world.world_id.clone(), document.world);
                }
                Err(err @ StoreError::UnsupportedVersion { .. }) => return Err(err),
                Err(err) => {
                    warn!("skipping unreadable world snapshot {}: {err:?}", path.display());
                }
            }
        }
        Ok(worlds)
    }
}

fn missing_is_empty<T: Default>(result: io::Result<T>) -> io::Result<T> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        other => other,
    }
}

impl ClaimStore for LocalClaimStore {
    fn get_user(&self, uuid: Uuid) -> Result<Option<SavedUser>, StoreError> {
        match fs::read_to_string(self.user_path(uuid)) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn create_or_update_user(&self, user: &SavedUser) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(user)?;
        Self::write_atomic(&self.user_path(user.uuid), &json)
    }

    fn get_inactive_users(&self, cutoff_ms: i64) -> Result<Vec<SavedUser>, StoreError> {
        let entries = match fs::read_dir(self.users_dir()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut inactive = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            let user: SavedUser = match serde_json::from_str(&raw) {
                Ok(user) => user,
                Err(err) => {
                    warn!("skipping unreadable user record {}: {err}", path.display());
                    continue;
                }
            };
            if user.last_login_ms < cutoff_ms {
                inactive.push(user);
            }
        }
        inactive.sort_by_key(|user| user.uuid);
        Ok(inactive)
    }

    fn get_claim_worlds(&self, node_id: &str) -> Result<BTreeMap<String, ClaimWorld>, StoreError> {
        let node_dir = self.worlds_dir().join(node_id);
        if !node_dir.is_dir() {
            return Ok(BTreeMap::new());
        }
        self.load_node_worlds(&node_dir)
    }

    fn update_claim_world(&self, node_id: &str, world: &ClaimWorld) -> Result<(), StoreError> {
        let document = WorldDocument::new(world.clone(), (self.clock)());
        let json = document.to_json()?;
        Self::write_atomic(&self.world_path(node_id, &world.world_id), &json)
    }

    fn get_all_claim_worlds(&self) -> Result<BTreeMap<ServerWorld, ClaimWorld>, StoreError> {
        let mut all = BTreeMap::new();
        let entries = missing_is_empty(
            fs::read_dir(self.worlds_dir()).map(|entries| entries.collect::<Vec<_>>()),
        )?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let node_id = entry.file_name().to_string_lossy().into_owned();
            for (world_id, world) in self.load_node_worlds(&entry.path())? {
                all.insert(
                    ServerWorld {
                        node_id: node_id.clone(),
                        world_id,
                    },
                    world,
                );
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim_world::{BlockPos, Claim, Region};
    use std::sync::Arc;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "claim_world_store_{tag}_{}",
            Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&dir).expect("create temp root");
        dir
    }

    fn sample_world(world_id: &str) -> ClaimWorld {
        let mut world = ClaimWorld::new(world_id);
        world.claims.push(Claim::new(
            Some(Uuid::new_v4()),
            Region::from_corners(BlockPos::new(0, 0), BlockPos::new(9, 9)),
        ));
        world
    }

    #[test]
    fn users_round_trip_and_missing_users_are_none() {
        let root = temp_root("users");
        let store = LocalClaimStore::new(&root);
        let user = SavedUser::new(Uuid::new_v4(), "alex", 100, 1_000);

        assert_eq!(store.get_user(user.uuid).expect("read"), None);
        store.create_or_update_user(&user).expect("write");
        assert_eq!(store.get_user(user.uuid).expect("read"), Some(user));

        fs::remove_dir_all(root).expect("cleanup");
    }

    #[test]
    fn worlds_are_scoped_by_node_directory() {
        let root = temp_root("worlds");
        let store = LocalClaimStore::new(&root).with_clock(Arc::new(|| 42));

        store
            .update_claim_world("node-a", &sample_world("overworld"))
            .expect("write");
        store
            .update_claim_world("node-b", &sample_world("nether"))
            .expect("write");

        let node_a = store.get_claim_worlds("node-a").expect("read");
        assert_eq!(node_a.keys().collect::<Vec<_>>(), vec!["overworld"]);
        assert!(store.get_claim_worlds("node-c").expect("read").is_empty());

        let all = store.get_all_claim_worlds().expect("read all");
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(&ServerWorld {
            node_id: "node-b".to_string(),
            world_id: "nether".to_string(),
        }));

        fs::remove_dir_all(root).expect("cleanup");
    }

    #[test]
    fn inactive_scan_uses_strict_cutoff() {
        let root = temp_root("inactive");
        let store = LocalClaimStore::new(&root);
        let mut stale = SavedUser::new(Uuid::new_v4(), "stale", 100, 500);
        stale.last_login_ms = 500;
        let fresh = SavedUser::new(Uuid::new_v4(), "fresh", 100, 1_000);
        store.create_or_update_user(&stale).expect("write");
        store.create_or_update_user(&fresh).expect("write");

        let inactive = store.get_inactive_users(1_000).expect("scan");
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].uuid, stale.uuid);
        assert!(store.get_inactive_users(100).expect("scan").is_empty());

        fs::remove_dir_all(root).expect("cleanup");
    }

    #[test]
    fn corrupt_world_snapshots_are_skipped() {
        let root = temp_root("corrupt");
        let store = LocalClaimStore::new(&root);
        store
            .update_claim_world("node-a", &sample_world("overworld"))
            .expect("write");
        fs::write(root.join("worlds/node-a/broken.json"), "{not json")
            .expect("write corrupt file");

        let worlds = store.get_claim_worlds("node-a").expect("read");
        assert_eq!(worlds.len(), 1);

        fs::remove_dir_all(root).expect("cleanup");
    }
}
