use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// vCenter credentials together with the operator's data-sharing consent.
///
/// At most one row exists; timestamps are maintained by the store on save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub password: String,
    pub is_data_sharing_allowed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credentials {
    /// Fresh credentials with consent withheld. The timestamps are
    /// placeholders; the store assigns the persisted values.
    pub fn new(url: String, username: String, password: String) -> Self {
        let now = Utc::now();
        Self {
            url,
            username,
            password,
            is_data_sharing_allowed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The most recently collected inventory, stored as an opaque JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    pub data: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}
