//! Snapshot loading.
//!
//! The upstream exporter writes two JSON arrays: users (each with nested
//! login strings) and groups (each with nested member references). Both are
//! flattened here into the four record shapes the reconciler compares.

mod external_id;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::{Group, Identity, Membership, User};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    #[serde(deserialize_with = "external_id::required")]
    id: i64,
    display_name: String,
    mail: String,
    status: String,
    liferay_screen_name: String,
    identities: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupRecord {
    #[serde(deserialize_with = "external_id::required")]
    id: i64,
    name: String,
    #[serde(default, deserialize_with = "external_id::optional")]
    parent_group_id: Option<i64>,
    members: Vec<MemberRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberRecord {
    #[serde(deserialize_with = "external_id::required")]
    user_id: i64,
}

/// SHA-256 digests of the raw snapshot inputs, hex encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SnapshotDigest {
    pub users: String,
    pub groups: String,
}

/// Normalized snapshot records, in source order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub identities: Vec<Identity>,
    pub groups: Vec<Group>,
    pub memberships: Vec<Membership>,
    pub digest: SnapshotDigest,
}

impl Snapshot {
    /// Reads and parses both snapshot files.
    pub fn load(users_path: &Path, groups_path: &Path) -> Result<Self> {
        let users = fs::read(users_path).map_err(|e| {
            Error::from(e).during(format!("reading users snapshot {}", users_path.display()))
        })?;
        let groups = fs::read(groups_path).map_err(|e| {
            Error::from(e).during(format!("reading groups snapshot {}", groups_path.display()))
        })?;
        Self::from_json(&users, &groups)
    }

    pub fn from_json(users: &[u8], groups: &[u8]) -> Result<Self> {
        let user_records: Vec<UserRecord> = serde_json::from_slice(users)
            .map_err(|e| Error::MalformedSnapshot(format!("users: {e}")))?;
        let group_records: Vec<GroupRecord> = serde_json::from_slice(groups)
            .map_err(|e| Error::MalformedSnapshot(format!("groups: {e}")))?;

        let mut snapshot = Self {
            digest: SnapshotDigest {
                users: hex::encode(Sha256::digest(users)),
                groups: hex::encode(Sha256::digest(groups)),
            },
            ..Self::default()
        };

        let mut seen = HashSet::new();
        for record in user_records {
            if !seen.insert(record.id) {
                return Err(Error::MalformedSnapshot(format!(
                    "users: duplicate id {}",
                    record.id
                )));
            }
            snapshot
                .identities
                .extend(record.identities.into_iter().map(|login| Identity {
                    login,
                    user_external_id: record.id,
                }));
            snapshot.users.push(User {
                display_name: record.display_name,
                mail: record.mail,
                status: record.status,
                screen_name: record.liferay_screen_name,
                external_id: record.id,
            });
        }

        seen.clear();
        for record in group_records {
            if !seen.insert(record.id) {
                return Err(Error::MalformedSnapshot(format!(
                    "groups: duplicate id {}",
                    record.id
                )));
            }
            snapshot
                .memberships
                .extend(record.members.iter().map(|member| Membership {
                    user_external_id: member.user_id,
                    group_external_id: record.id,
                }));
            let name = match record.parent_group_id {
                Some(_) => strip_namespace(&record.name).to_string(),
                None => record.name,
            };
            snapshot.groups.push(Group {
                name,
                external_id: record.id,
                parent_external_id: record.parent_group_id,
            });
        }

        Ok(snapshot)
    }
}

/// Keeps only the segment after the last `:`; the exporter prefixes
/// subgroup names with their ancestors' names.
#[must_use]
pub fn strip_namespace(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}
