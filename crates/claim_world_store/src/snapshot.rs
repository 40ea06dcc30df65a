//! Persisted claim-world documents: one serialized snapshot per world,
//! schema-version gated with a forward migration chain.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use claim_world::{ClaimWorld, StoreError};

pub const SCHEMA_VERSION: u32 = 2;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Whole-world snapshot as written to disk. Unknown or missing fields in
/// the embedded world default rather than fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDocument {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub saved_at_ms: i64,
    pub world: ClaimWorld,
}

impl WorldDocument {
    pub fn new(world: ClaimWorld, saved_at_ms: i64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            saved_at_ms,
            world,
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a document of any supported schema version, migrating older
    /// versions forward.
    pub fn from_json(input: &str) -> Result<Self, StoreError> {
        let value: JsonValue = serde_json::from_str(input)?;
        let migrated = migrate(value)?;
        Ok(serde_json::from_value(migrated)?)
    }
}

/// Runs the migration chain up to [`SCHEMA_VERSION`]. Documents without a
/// version field are treated as schema 1.
pub fn migrate(mut value: JsonValue) -> Result<JsonValue, StoreError> {
    let mut version = value
        .get("schema_version")
        .and_then(JsonValue::as_u64)
        .unwrap_or(1) as u32;
    if version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            version,
            expected: SCHEMA_VERSION,
        });
    }
    while version < SCHEMA_VERSION {
        value = match version {
            1 => migrate_v1_to_v2(value),
            _ => value,
        };
        version += 1;
    }
    if let Some(object) = value.as_object_mut() {
        object.insert("schema_version".to_string(), JsonValue::from(SCHEMA_VERSION));
    }
    Ok(value)
}

/// Schema 1 stored bans as a bare uuid list per claim (`banned`); schema 2
/// keys banned users by the arbiter who issued the ban. Migrated bans get
/// the nil arbiter. The `private` flag did not exist in schema 1 and
/// defaults to false.
fn migrate_v1_to_v2(mut value: JsonValue) -> JsonValue {
    if let Some(claims) = value
        .get_mut("world")
        .and_then(|world| world.get_mut("claims"))
        .and_then(JsonValue::as_array_mut)
    {
        for claim in claims {
            rewrite_banned_list(claim);
        }
    }
    value
}

fn rewrite_banned_list(claim: &mut JsonValue) {
    let banned = claim
        .get("banned")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(object) = claim.as_object_mut() {
        object.remove("banned");
        if !banned.is_empty() {
            let nil = uuid::Uuid::nil().to_string();
            let bans: serde_json::Map<String, JsonValue> = banned
                .into_iter()
                .filter_map(|entry| entry.as_str().map(String::from))
                .map(|uuid| (uuid, JsonValue::from(nil.clone())))
                .collect();
            object.insert("bans".to_string(), JsonValue::Object(bans));
        }
    }
    if let Some(children) = claim.get_mut("children").and_then(JsonValue::as_array_mut) {
        for child in children {
            rewrite_banned_list(child);
        }
    }
}
