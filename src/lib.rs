//! # idmsync
//!
//! Reconciles an identity-management database (users, groups, identities and
//! group memberships) against a periodically exported snapshot of the
//! authoritative source, usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use idmsync::apply::ApplyOptions;
//! use idmsync::snapshot::Snapshot;
//! use idmsync::store::{SqliteStore, Store};
//!
//! let store = SqliteStore::open("./idm.db")?;
//! let snapshot = Snapshot::load("users.scim".as_ref(), "groups.scim".as_ref())?;
//! let report = idmsync::sync::run(&store, &snapshot, ApplyOptions::default())?;
//! store.close()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `idmsync` binary.

pub mod apply;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod types;
