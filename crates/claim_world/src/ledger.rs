//! Per-player persisted state and the guarded claim-block edit path.
//!
//! Every balance change goes through [`UserLedger::edit_blocks`]: one
//! read-apply-write unit under a per-user guard, with audit logging and
//! invalidation fan-out attached. Two units for the same user never
//! interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthorityError;
use crate::store::{ClaimStore, Invalidation, Persister};
use crate::trust::{TagResolver, TrustContext};

/// Oldest audit entries are dropped past this length.
const AUDIT_LOG_CAP: usize = 100;

pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    ClaimCreated,
    ClaimResized,
    ClaimDeleted,
    ClaimsPruned,
    AdminEdit,
    PeriodicGrant,
    Purchase,
}

/// One balance-changing event in a user's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at_ms: i64,
    pub reason: AuditReason,
    pub delta: i64,
    pub resulting: u64,
}

/// Owner-scoped named list of users, matched by `Trustable::Group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroup {
    pub name: String,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub user_groups: Vec<UserGroup>,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
}

/// Per-player persisted state. Created on first join; never deleted, even
/// when pruning removes the user's claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedUser {
    pub uuid: Uuid,
    pub name: String,
    pub claim_blocks: u64,
    pub last_login_ms: i64,
    #[serde(default)]
    pub preferences: UserPreferences,
}

impl SavedUser {
    pub fn new(uuid: Uuid, name: impl Into<String>, claim_blocks: u64, now_ms: i64) -> Self {
        Self {
            uuid,
            name: name.into(),
            claim_blocks,
            last_login_ms: now_ms,
            preferences: UserPreferences::default(),
        }
    }

    pub fn group(&self, name: &str) -> Option<&UserGroup> {
        self.preferences
            .user_groups
            .iter()
            .find(|group| group.name == name)
    }
}

/// Node-local user state and the serialized balance edit queue.
pub struct UserLedger {
    store: Arc<dyn ClaimStore>,
    persister: Arc<dyn Persister>,
    node_id: String,
    clock: Clock,
    users: RwLock<HashMap<Uuid, Arc<SavedUser>>>,
    guards: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl UserLedger {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        persister: Arc<dyn Persister>,
        node_id: impl Into<String>,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            persister,
            node_id: node_id.into(),
            clock,
            users: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Cached entry only; never touches the store. This is the read used
    /// by the evaluation path.
    pub fn cached_user(&self, uuid: Uuid) -> Option<Arc<SavedUser>> {
        let users = self.users.read().expect("lock users");
        users.get(&uuid).cloned()
    }

    /// Cache hit or lazy store load.
    pub fn user(&self, uuid: Uuid) -> Result<Option<Arc<SavedUser>>, AuthorityError> {
        if let Some(user) = self.cached_user(uuid) {
            return Ok(Some(user));
        }
        match self.store.get_user(uuid)? {
            Some(user) => {
                let user = Arc::new(user);
                let mut users = self.users.write().expect("lock users");
                users.insert(uuid, Arc::clone(&user));
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    pub fn require_user(&self, uuid: Uuid) -> Result<Arc<SavedUser>, AuthorityError> {
        self.user(uuid)?
            .ok_or(AuthorityError::UnknownUser { uuid })
    }

    /// First-join bootstrap: creates the row with the starting balance, or
    /// refreshes the stored name and last-login time.
    pub fn handle_join(
        &self,
        uuid: Uuid,
        name: &str,
        starting_blocks: u64,
    ) -> Result<Arc<SavedUser>, AuthorityError> {
        let guard = self.guard(uuid);
        let _held = guard.lock().expect("lock user guard");
        let now = (self.clock)();
        let mut user = match self.user(uuid)? {
            Some(existing) => (*existing).clone(),
            None => {
                debug!("creating saved user {uuid} with {starting_blocks} starting blocks");
                SavedUser::new(uuid, name, starting_blocks, now)
            }
        };
        user.name = name.to_string();
        user.last_login_ms = now;
        self.commit(user)
    }

    /// Applies one serialized balance edit. The closure sees the current
    /// balance and returns the new one; any error leaves the user
    /// untouched.
    pub fn edit_blocks<F>(
        &self,
        uuid: Uuid,
        reason: AuditReason,
        edit: F,
    ) -> Result<Arc<SavedUser>, AuthorityError>
    where
        F: FnOnce(u64) -> Result<u64, AuthorityError>,
    {
        let guard = self.guard(uuid);
        let _held = guard.lock().expect("lock user guard");
        let mut user = (*self.require_user(uuid)?).clone();
        let before = user.claim_blocks;
        let after = edit(before)?;
        user.claim_blocks = after;
        user.preferences.audit_log.push(AuditEntry {
            at_ms: (self.clock)(),
            reason,
            delta: after as i64 - before as i64,
            resulting: after,
        });
        if user.preferences.audit_log.len() > AUDIT_LOG_CAP {
            let excess = user.preferences.audit_log.len() - AUDIT_LOG_CAP;
            user.preferences.audit_log.drain(..excess);
        }
        self.commit(user)
    }

    pub fn grant_blocks(
        &self,
        uuid: Uuid,
        amount: u64,
        reason: AuditReason,
    ) -> Result<Arc<SavedUser>, AuthorityError> {
        self.edit_blocks(uuid, reason, |balance| Ok(balance.saturating_add(amount)))
    }

    /// Edits the owner-scoped group lists through the same guarded path.
    pub fn edit_user_groups<F>(&self, uuid: Uuid, edit: F) -> Result<Arc<SavedUser>, AuthorityError>
    where
        F: FnOnce(&mut Vec<UserGroup>),
    {
        let guard = self.guard(uuid);
        let _held = guard.lock().expect("lock user guard");
        let mut user = (*self.require_user(uuid)?).clone();
        edit(&mut user.preferences.user_groups);
        self.commit(user)
    }

    /// Drops the cached entry; the next read reloads from the store. Used
    /// when a remote node invalidates this user.
    pub fn evict(&self, uuid: Uuid) {
        let mut users = self.users.write().expect("lock users");
        users.remove(&uuid);
    }

    fn commit(&self, user: SavedUser) -> Result<Arc<SavedUser>, AuthorityError> {
        let user = Arc::new(user);
        {
            let mut users = self.users.write().expect("lock users");
            users.insert(user.uuid, Arc::clone(&user));
        }
        if let Err(err) = self.persister.persist_user(&user) {
            error!("failed to persist user {}: {err:?}", user.uuid);
            return Err(err.into());
        }
        self.persister
            .invalidate(Invalidation::user(user.uuid, self.node_id.clone()));
        Ok(user)
    }

    fn guard(&self, uuid: Uuid) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().expect("lock guard map");
        Arc::clone(guards.entry(uuid).or_default())
    }
}

/// Trust context backed by cached saved users (groups) and an external
/// membership provider (tags). Group lookups read only node-local cache so
/// the evaluation path never blocks on I/O.
pub struct LedgerTrustContext {
    ledger: Arc<UserLedger>,
    tags: Arc<dyn TagResolver>,
}

impl LedgerTrustContext {
    pub fn new(ledger: Arc<UserLedger>, tags: Arc<dyn TagResolver>) -> Self {
        Self { ledger, tags }
    }
}

impl TrustContext for LedgerTrustContext {
    fn is_group_member(&self, owner: Uuid, group: &str, user: Uuid) -> bool {
        self.ledger
            .cached_user(owner)
            .and_then(|saved| saved.group(group).map(|g| g.members.contains(&user)))
            .unwrap_or(false)
    }

    fn tag_contains(&self, tag: &str, user: Uuid) -> bool {
        self.tags.tag_contains(tag, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DirectPersister, MemoryClaimStore};
    use std::thread;

    fn ledger() -> Arc<UserLedger> {
        let store: Arc<dyn ClaimStore> = Arc::new(MemoryClaimStore::new());
        let persister = Arc::new(DirectPersister::new(Arc::clone(&store)));
        Arc::new(UserLedger::new(
            store,
            persister,
            "node-test",
            Arc::new(|| 1_000),
        ))
    }

    #[test]
    fn first_join_creates_the_row_with_starting_balance() {
        let ledger = ledger();
        let uuid = Uuid::new_v4();
        let user = ledger.handle_join(uuid, "alex", 100).expect("join");
        assert_eq!(user.claim_blocks, 100);
        assert_eq!(user.last_login_ms, 1_000);

        // A later join keeps the balance and refreshes the name.
        let user = ledger.handle_join(uuid, "alexandra", 100).expect("join");
        assert_eq!(user.claim_blocks, 100);
        assert_eq!(user.name, "alexandra");
    }

    #[test]
    fn failed_edit_leaves_balance_and_audit_log_untouched() {
        let ledger = ledger();
        let uuid = Uuid::new_v4();
        ledger.handle_join(uuid, "alex", 50).expect("join");

        let err = ledger
            .edit_blocks(uuid, AuditReason::ClaimCreated, |balance| {
                Err(AuthorityError::InsufficientBlocks {
                    required: 100,
                    available: balance,
                })
            })
            .expect_err("edit should fail");
        assert!(matches!(err, AuthorityError::InsufficientBlocks { .. }));

        let user = ledger.require_user(uuid).expect("user");
        assert_eq!(user.claim_blocks, 50);
        assert!(user.preferences.audit_log.is_empty());
    }

    #[test]
    fn edits_append_audit_entries_with_signed_deltas() {
        let ledger = ledger();
        let uuid = Uuid::new_v4();
        ledger.handle_join(uuid, "alex", 100).expect("join");
        ledger
            .edit_blocks(uuid, AuditReason::ClaimCreated, |balance| Ok(balance - 40))
            .expect("debit");
        ledger
            .grant_blocks(uuid, 15, AuditReason::PeriodicGrant)
            .expect("grant");

        let user = ledger.require_user(uuid).expect("user");
        assert_eq!(user.claim_blocks, 75);
        let log = &user.preferences.audit_log;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].delta, -40);
        assert_eq!(log[0].resulting, 60);
        assert_eq!(log[1].delta, 15);
        assert_eq!(log[1].reason, AuditReason::PeriodicGrant);
    }

    #[test]
    fn concurrent_edits_to_one_user_never_drop_an_update() {
        let ledger = ledger();
        let uuid = Uuid::new_v4();
        ledger.handle_join(uuid, "alex", 0).expect("join");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..50 {
                        ledger
                            .grant_blocks(uuid, 1, AuditReason::PeriodicGrant)
                            .expect("grant");
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().expect("join thread");
        }

        let user = ledger.require_user(uuid).expect("user");
        assert_eq!(user.claim_blocks, 400);
    }

    #[test]
    fn ledger_context_resolves_groups_from_cached_users_only() {
        let ledger = ledger();
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        ledger.handle_join(owner, "owner", 0).expect("join");
        ledger
            .edit_user_groups(owner, |groups| {
                groups.push(UserGroup {
                    name: "friends".to_string(),
                    members: vec![member],
                });
            })
            .expect("groups");

        let ctx = LedgerTrustContext::new(Arc::clone(&ledger), Arc::new(crate::trust::NoTags));
        assert!(ctx.is_group_member(owner, "friends", member));
        assert!(!ctx.is_group_member(owner, "friends", Uuid::new_v4()));
        assert!(!ctx.is_group_member(Uuid::new_v4(), "friends", member));
    }
}
