//! Node-side cache maintenance: applies invalidations published by other
//! nodes by evicting the affected entries. Evicted worlds and users reload
//! lazily on next access, so consistency is eventual and reads never
//! block on remote state.

use std::sync::Arc;

use log::{debug, warn};
use uuid::Uuid;

use claim_world::{ClaimAuthority, EntityKind, Invalidation};

use crate::bus::{BusSubscription, InvalidationBus};

pub struct NodeCache {
    authority: Arc<ClaimAuthority>,
    node_id: String,
    subscription: BusSubscription,
}

impl NodeCache {
    pub fn new(
        authority: Arc<ClaimAuthority>,
        node_id: impl Into<String>,
        bus: &dyn InvalidationBus,
    ) -> Self {
        Self {
            authority,
            node_id: node_id.into(),
            subscription: bus.subscribe(),
        }
    }

    /// Drains pending invalidations and applies them. Returns the number
    /// applied. Call this from the node's periodic tick.
    pub fn pump_invalidations(&self) -> usize {
        let mut applied = 0;
        for invalidation in self.subscription.drain() {
            if self.applies_to_us(&invalidation) {
                self.apply(&invalidation);
                applied += 1;
            }
        }
        applied
    }

    /// Our own messages and messages targeted at another node are skipped;
    /// the local cache already holds the state the origin just wrote.
    fn applies_to_us(&self, invalidation: &Invalidation) -> bool {
        if invalidation.origin == self.node_id {
            return false;
        }
        match &invalidation.target {
            Some(target) => *target == self.node_id,
            None => true,
        }
    }

    fn apply(&self, invalidation: &Invalidation) {
        debug!(
            "applying {:?} invalidation of {} from {}",
            invalidation.kind, invalidation.id, invalidation.origin
        );
        match invalidation.kind {
            EntityKind::User => match Uuid::parse_str(&invalidation.id) {
                Ok(uuid) => self.authority.ledger().evict(uuid),
                Err(err) => warn!("ignoring user invalidation with bad uuid: {err}"),
            },
            EntityKind::World => self.authority.evict_world(&invalidation.id),
        }
    }
}
