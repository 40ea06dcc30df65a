//! Invalidation transport between server nodes. Messages are CBOR-encoded
//! [`Invalidation`] records; delivery is best-effort and fire-and-forget.

use std::sync::{Arc, Mutex};

use log::warn;

use claim_world::Invalidation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    Encode(String),
    Transport(String),
}

impl From<serde_cbor::Error> for BusError {
    fn from(error: serde_cbor::Error) -> Self {
        BusError::Encode(error.to_string())
    }
}

/// Transport adapter. Real deployments back this with a message broker;
/// [`InMemoryBus`] serves tests and single-process clusters.
pub trait InvalidationBus: Send + Sync {
    fn publish(&self, invalidation: &Invalidation) -> Result<(), BusError>;
    fn subscribe(&self) -> BusSubscription;
}

/// One subscriber's inbox. Drained on the subscriber's own schedule.
#[derive(Clone)]
pub struct BusSubscription {
    inbox: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BusSubscription {
    pub fn new(inbox: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
        Self { inbox }
    }

    /// Takes and decodes every pending message. Payloads that fail to
    /// decode are dropped with a warning; a stale eviction is recoverable,
    /// a stuck inbox is not.
    pub fn drain(&self) -> Vec<Invalidation> {
        let pending = {
            let mut inbox = self.inbox.lock().expect("lock inbox");
            std::mem::take(&mut *inbox)
        };
        pending
            .into_iter()
            .filter_map(|payload| match serde_cbor::from_slice(&payload) {
                Ok(invalidation) => Some(invalidation),
                Err(err) => {
                    warn!("dropping undecodable invalidation payload: {err}");
                    None
                }
            })
            .collect()
    }
}

/// Process-local bus: every published message is appended to every
/// subscriber's inbox.
#[derive(Default)]
pub struct InMemoryBus {
    inboxes: Mutex<Vec<Arc<Mutex<Vec<Vec<u8>>>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvalidationBus for InMemoryBus {
    fn publish(&self, invalidation: &Invalidation) -> Result<(), BusError> {
        let payload = serde_cbor::to_vec(invalidation)?;
        let inboxes = self.inboxes.lock().expect("lock inboxes");
        for inbox in inboxes.iter() {
            inbox.lock().expect("lock inbox").push(payload.clone());
        }
        Ok(())
    }

    fn subscribe(&self) -> BusSubscription {
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let mut inboxes = self.inboxes.lock().expect("lock inboxes");
        inboxes.push(Arc::clone(&inbox));
        BusSubscription::new(inbox)
    }
}
