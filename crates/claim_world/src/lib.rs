pub mod authority;
pub mod claim;
pub mod config;
pub mod error;
pub mod geometry;
pub mod ledger;
pub mod store;
pub mod trust;
pub mod world;

pub use authority::{
    Actor, ClaimAuthority, Economy, HighlightSink, NoEconomy, NoHighlights, NoPresence,
    PresenceAdapter, PruneReport,
};
pub use claim::Claim;
pub use config::ClaimConfig;
pub use error::{AuthorityError, ErrorKind};
pub use geometry::{BlockPos, Region};
pub use ledger::{
    system_clock, AuditEntry, AuditReason, Clock, LedgerTrustContext, SavedUser, UserGroup,
    UserLedger, UserPreferences,
};
pub use store::{
    ClaimStore, DirectPersister, EntityKind, Invalidation, MemoryClaimStore, Persister,
    ServerWorld, StoreError,
};
pub use trust::{
    EmptyTrustContext, NoTags, OperationType, Privilege, TagResolver, TrustContext, TrustLevel,
    TrustLevelRegistry, Trustable,
};
pub use world::{ClaimAt, ClaimWorld, Operation};
