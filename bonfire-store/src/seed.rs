//! JSON seed documents for [`crate::MemoryDatabase`].

use crate::error::StorageResult;
use bonfire_types::{Channel, ChannelName, User, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Initial contents of a memory store.
///
/// ```json
/// {
///   "users": [{ "id": "1", "name": "TestUser1" }],
///   "channels": [{ "name": "💣", "access": "public" }, { "name": "🙈", "access": "private" }],
///   "owners": { "🙈": ["1"] }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Owner IDs per channel name.
    #[serde(default)]
    pub owners: BTreeMap<ChannelName, Vec<UserId>>,
}

impl Seed {
    /// Parses a seed from a JSON string.
    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a seed file.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
