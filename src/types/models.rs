use serde::{Deserialize, Serialize};

/// Status written to users that disappeared from the snapshot.
pub const DISABLED_STATUS: &str = "disabled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub display_name: String,
    pub mail: String,
    pub status: String,
    pub screen_name: String,
    pub external_id: i64,
}

impl User {
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.status == DISABLED_STATUS
    }
}

/// A group keyed by external id.
///
/// Equality covers `name` and `external_id` only. The parent link is applied
/// on every insert or update but never makes two groups differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub external_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_external_id: Option<i64>,
}

impl Group {
    fn key(&self) -> (&str, i64) {
        (&self.name, self.external_id)
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Group {}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub login: String,
    pub user_external_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Membership {
    pub user_external_id: i64,
    pub group_external_id: i64,
}

/// A membership row as read from the database, carrying the internal ids
/// needed to delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMembership {
    #[serde(flatten)]
    pub membership: Membership,
    pub user_id: i64,
    pub group_id: i64,
}
