pub mod local;
pub mod snapshot;

pub use local::LocalClaimStore;
pub use snapshot::{WorldDocument, SCHEMA_VERSION};
