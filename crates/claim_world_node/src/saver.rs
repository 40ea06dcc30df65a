//! Background persistence. Mutations hand their dirty snapshots to a
//! dispatcher thread so the world write path never waits on storage.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{error, warn};

use claim_world::{ClaimStore, ClaimWorld, Invalidation, Persister, SavedUser, StoreError};

use crate::bus::InvalidationBus;

enum SaveJob {
    World { node_id: String, world: ClaimWorld },
    User(SavedUser),
}

/// Owns the dispatcher thread. Jobs queued before drop are flushed; the
/// thread exits once the last sender is gone.
pub struct SaveDispatcher {
    sender: Mutex<Option<Sender<SaveJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SaveDispatcher {
    pub fn spawn(store: Arc<dyn ClaimStore>) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<SaveJob>();
        let worker = thread::Builder::new()
            .name("claim-save-dispatcher".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    run_job(store.as_ref(), job);
                }
            })
            .expect("spawn save dispatcher");
        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn enqueue(&self, job: SaveJob) -> Result<(), StoreError> {
        let sender = self.sender.lock().expect("lock sender");
        match sender.as_ref() {
            Some(sender) => sender
                .send(job)
                .map_err(|_| StoreError::Io("save dispatcher stopped".to_string())),
            None => Err(StoreError::Io("save dispatcher stopped".to_string())),
        }
    }

    /// Stops accepting jobs and blocks until queued saves are on disk.
    pub fn shutdown(&self) {
        {
            let mut sender = self.sender.lock().expect("lock sender");
            sender.take();
        }
        let worker = {
            let mut worker = self.worker.lock().expect("lock worker");
            worker.take()
        };
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("save dispatcher thread panicked");
            }
        }
    }
}

impl Drop for SaveDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A failed save is logged and dropped. The authoritative copy lives in
/// the node's memory and is re-persisted on the next mutation, so the
/// write path stays available through storage outages.
fn run_job(store: &dyn ClaimStore, job: SaveJob) {
    match job {
        SaveJob::World { node_id, world } => {
            if let Err(err) = store.update_claim_world(&node_id, &world) {
                error!("failed to persist world {}: {err:?}", world.world_id);
            }
        }
        SaveJob::User(user) => {
            if let Err(err) = store.create_or_update_user(&user) {
                error!("failed to persist user {}: {err:?}", user.uuid);
            }
        }
    }
}

/// Persister that queues saves on the dispatcher and publishes
/// invalidations on the bus. Both halves are fire-and-forget from the
/// mutation path's point of view.
pub struct QueuedPersister {
    dispatcher: Arc<SaveDispatcher>,
    bus: Arc<dyn InvalidationBus>,
}

impl QueuedPersister {
    pub fn new(dispatcher: Arc<SaveDispatcher>, bus: Arc<dyn InvalidationBus>) -> Self {
        Self { dispatcher, bus }
    }
}

impl Persister for QueuedPersister {
    fn persist_world(&self, node_id: &str, world: &ClaimWorld) -> Result<(), StoreError> {
        self.dispatcher.enqueue(SaveJob::World {
            node_id: node_id.to_string(),
            world: world.clone(),
        })
    }

    fn persist_user(&self, user: &SavedUser) -> Result<(), StoreError> {
        self.dispatcher.enqueue(SaveJob::User(user.clone()))
    }

    fn invalidate(&self, invalidation: Invalidation) {
        if let Err(err) = self.bus.publish(&invalidation) {
            warn!("failed to publish invalidation: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use claim_world::MemoryClaimStore;
    use uuid::Uuid;

    #[test]
    fn shutdown_flushes_queued_saves() {
        let store = Arc::new(MemoryClaimStore::new());
        let dispatcher = SaveDispatcher::spawn(Arc::clone(&store) as Arc<dyn ClaimStore>);
        let bus = Arc::new(InMemoryBus::new());
        let persister = QueuedPersister::new(Arc::clone(&dispatcher), bus);

        let user = SavedUser::new(Uuid::new_v4(), "alex", 100, 1_000);
        persister.persist_user(&user).expect("enqueue user");
        persister
            .persist_world("node-a", &ClaimWorld::new("overworld"))
            .expect("enqueue world");
        dispatcher.shutdown();

        assert_eq!(store.get_user(user.uuid).expect("read"), Some(user));
        assert_eq!(store.get_claim_worlds("node-a").expect("read").len(), 1);
    }

    #[test]
    fn enqueue_after_shutdown_reports_a_store_error() {
        let store = Arc::new(MemoryClaimStore::new());
        let dispatcher = SaveDispatcher::spawn(store as Arc<dyn ClaimStore>);
        dispatcher.shutdown();

        let bus = Arc::new(InMemoryBus::new());
        let persister = QueuedPersister::new(Arc::clone(&dispatcher), bus);
        let err = persister
            .persist_world("node-a", &ClaimWorld::new("overworld"))
            .expect_err("queue closed");
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn a_failing_save_does_not_stop_the_dispatcher() {
        use claim_world::{ClaimWorld as World, SavedUser as User, ServerWorld, StoreError};
        use std::collections::BTreeMap;

        /// Store that rejects writes for one poisoned user.
        struct FlakyStore {
            inner: MemoryClaimStore,
            poisoned: Uuid,
        }

        impl ClaimStore for FlakyStore {
            fn get_user(&self, uuid: Uuid) -> Result<Option<User>, StoreError> {
                self.inner.get_user(uuid)
            }
            fn create_or_update_user(&self, user: &User) -> Result<(), StoreError> {
                if user.uuid == self.poisoned {
                    return Err(StoreError::Io("disk full".to_string()));
                }
                self.inner.create_or_update_user(user)
            }
            fn get_inactive_users(&self, cutoff_ms: i64) -> Result<Vec<User>, StoreError> {
                self.inner.get_inactive_users(cutoff_ms)
            }
            fn get_claim_worlds(
                &self,
                node_id: &str,
            ) -> Result<BTreeMap<String, World>, StoreError> {
                self.inner.get_claim_worlds(node_id)
            }
            fn update_claim_world(&self, node_id: &str, world: &World) -> Result<(), StoreError> {
                self.inner.update_claim_world(node_id, world)
            }
            fn get_all_claim_worlds(&self) -> Result<BTreeMap<ServerWorld, World>, StoreError> {
                self.inner.get_all_claim_worlds()
            }
        }

        let poisoned = Uuid::new_v4();
        let store = Arc::new(FlakyStore {
            inner: MemoryClaimStore::new(),
            poisoned,
        });
        let dispatcher = SaveDispatcher::spawn(Arc::clone(&store) as Arc<dyn ClaimStore>);
        let bus = Arc::new(InMemoryBus::new());
        let persister = QueuedPersister::new(Arc::clone(&dispatcher), bus);

        let healthy = SavedUser::new(Uuid::new_v4(), "alex", 100, 1_000);
        persister
            .persist_user(&SavedUser::new(poisoned, "broken", 100, 1_000))
            .expect("enqueue poisoned");
        persister.persist_user(&healthy).expect("enqueue healthy");
        dispatcher.shutdown();

        // The failed save was logged and dropped; the one behind it landed.
        assert_eq!(store.get_user(poisoned).expect("read"), None);
        assert_eq!(store.get_user(healthy.uuid).expect("read"), Some(healthy));
    }

    #[test]
    fn invalidations_go_out_on_the_bus() {
        let store = Arc::new(MemoryClaimStore::new());
        let dispatcher = SaveDispatcher::spawn(store as Arc<dyn ClaimStore>);
        let bus = Arc::new(InMemoryBus::new());
        let subscription = bus.subscribe();
        let persister = QueuedPersister::new(dispatcher, Arc::clone(&bus) as Arc<dyn InvalidationBus>);

        let message = Invalidation::world("overworld", "node-a");
        persister.invalidate(message.clone());
        assert_eq!(subscription.drain(), vec![message]);
    }
}
