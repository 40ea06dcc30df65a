//! Error types for the authority layer.

use uuid::Uuid;

use crate::trust::Privilege;

/// Reason-code classification surfaced to the command layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Permission,
    NotFound,
    Persistence,
}

/// Errors produced by claim lifecycle operations. Validation and
/// permission failures never leave partial state behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    RegionOverlap { other_owner: Option<Uuid> },
    InsufficientBlocks { required: u64, available: u64 },
    OutsideWorldLimit { limit: i64 },
    BelowMinimumArea { minimum: u64, area: u64 },
    InvalidCorner { corner_index: usize },
    ChildNotEnclosed,
    ChildOverlapsSibling,
    ChildrenNotEnclosed,
    NestedChildClaim,
    NoClaimAt { x: i64, z: i64 },
    NoChildClaimAt { x: i64, z: i64 },
    UnknownUser { uuid: Uuid },
    UnknownTrustLevel { id: String },
    AdminClaimTransfer,
    NotClaimOwner,
    OwnerBan,
    AlreadyBanned { uuid: Uuid },
    NotBanned { uuid: Uuid },
    PermissionDenied { privilege: Privilege },
    EconomyRejected { reason: String },
    Store(String),
}

impl AuthorityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthorityError::RegionOverlap { .. }
            | AuthorityError::InsufficientBlocks { .. }
            | AuthorityError::OutsideWorldLimit { .. }
            | AuthorityError::BelowMinimumArea { .. }
            | AuthorityError::InvalidCorner { .. }
            | AuthorityError::ChildNotEnclosed
            | AuthorityError::ChildOverlapsSibling
            | AuthorityError::ChildrenNotEnclosed
            | AuthorityError::NestedChildClaim
            | AuthorityError::AdminClaimTransfer
            | AuthorityError::OwnerBan
            | AuthorityError::AlreadyBanned { .. }
            | AuthorityError::NotBanned { .. }
            | AuthorityError::UnknownTrustLevel { .. }
            | AuthorityError::EconomyRejected { .. } => ErrorKind::Validation,
            AuthorityError::PermissionDenied { .. } | AuthorityError::NotClaimOwner => {
                ErrorKind::Permission
            }
            AuthorityError::NoClaimAt { .. }
            | AuthorityError::NoChildClaimAt { .. }
            | AuthorityError::UnknownUser { .. } => ErrorKind::NotFound,
            AuthorityError::Store(_) => ErrorKind::Persistence,
        }
    }
}

impl From<std::io::Error> for AuthorityError {
    fn from(error: std::io::Error) -> Self {
        AuthorityError::Store(error.to_string())
    }
}

impl From<serde_json::Error> for AuthorityError {
    fn from(error: serde_json::Error) -> Self {
        AuthorityError::Store(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_partition_the_taxonomy() {
        assert_eq!(
            AuthorityError::RegionOverlap { other_owner: None }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AuthorityError::PermissionDenied {
                privilege: Privilege::ManageBans
            }
            .kind(),
            ErrorKind::Permission
        );
        assert_eq!(
            AuthorityError::NoClaimAt { x: 0, z: 0 }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AuthorityError::Store("disk".to_string()).kind(),
            ErrorKind::Persistence
        );
    }
}
