//! Storage contract for the two aggregates, plus its implementations.
//!
//! Every write goes through `put_if_version`: the caller reads a record
//! with its version counter, applies the full mutation in memory, and
//! commits only if the stored version is unchanged. Stores never merge
//! or patch; a failed compare-and-set means the caller re-reads and
//! re-applies.

pub mod groups;
pub mod members;
pub mod memory;
pub mod pool;

use std::future::Future;

use crate::model::{Group, Member};

pub use groups::SqliteGroupStore;
pub use members::SqliteMemberStore;
pub use memory::{MemoryGroupStore, MemoryMemberStore};

/// A record read from a store together with its version counter.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Errors surfaced by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The expected version did not match the stored one.
    #[error("version conflict")]
    Conflict,
    /// The backing store failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Versioned storage for group records.
///
/// `put_if_version` with `expected: None` creates the record and fails
/// with `Conflict` if it already exists; with `Some(v)` it commits only
/// when the stored version is exactly `v`. Returns the new version.
pub trait GroupStore: Send + Sync {
    fn get(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Versioned<Group>>, StoreError>> + Send;

    fn put_if_version(
        &self,
        id: &str,
        group: &Group,
        expected: Option<u64>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// The party (if any) that currently lists the member in its roster.
    fn find_party_of(
        &self,
        member_id: &str,
    ) -> impl Future<Output = Result<Option<Versioned<Group>>, StoreError>> + Send;
}

/// Versioned storage for member records, same contract as [`GroupStore`].
pub trait MemberStore: Send + Sync {
    fn get(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Versioned<Member>>, StoreError>> + Send;

    fn put_if_version(
        &self,
        id: &str,
        member: &Member,
        expected: Option<u64>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}
