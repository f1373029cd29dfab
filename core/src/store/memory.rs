use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::{Group, GroupKind, Member};

use super::{GroupStore, MemberStore, StoreError, Versioned};

/// In-memory group store backed by a DashMap. Used by unit tests and
/// embedded deployments that don't need persistence. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryGroupStore {
    inner: Arc<DashMap<String, (Group, u64)>>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GroupStore for MemoryGroupStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Group>>, StoreError> {
        Ok(self.inner.get(id).map(|entry| Versioned {
            value: entry.0.clone(),
            version: entry.1,
        }))
    }

    async fn put_if_version(
        &self,
        id: &str,
        group: &Group,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        match expected {
            None => match self.inner.entry(id.to_string()) {
                Entry::Occupied(_) => Err(StoreError::Conflict),
                Entry::Vacant(slot) => {
                    slot.insert((group.clone(), 1));
                    Ok(1)
                }
            },
            Some(version) => match self.inner.get_mut(id) {
                Some(mut entry) if entry.1 == version => {
                    *entry = (group.clone(), version + 1);
                    Ok(version + 1)
                }
                _ => Err(StoreError::Conflict),
            },
        }
    }

    async fn find_party_of(&self, member_id: &str) -> Result<Option<Versioned<Group>>, StoreError> {
        Ok(self
            .inner
            .iter()
            .find(|entry| {
                entry.0.kind == GroupKind::Party && entry.0.members.contains(member_id)
            })
            .map(|entry| Versioned {
                value: entry.0.clone(),
                version: entry.1,
            }))
    }
}

/// In-memory member store, same contract as [`MemoryGroupStore`].
#[derive(Clone, Default)]
pub struct MemoryMemberStore {
    inner: Arc<DashMap<String, (Member, u64)>>,
}

impl MemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemberStore for MemoryMemberStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Member>>, StoreError> {
        Ok(self.inner.get(id).map(|entry| Versioned {
            value: entry.0.clone(),
            version: entry.1,
        }))
    }

    async fn put_if_version(
        &self,
        id: &str,
        member: &Member,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        match expected {
            None => match self.inner.entry(id.to_string()) {
                Entry::Occupied(_) => Err(StoreError::Conflict),
                Entry::Vacant(slot) => {
                    slot.insert((member.clone(), 1));
                    Ok(1)
                }
            },
            Some(version) => match self.inner.get_mut(id) {
                Some(mut entry) if entry.1 == version => {
                    *entry = (member.clone(), version + 1);
                    Ok(version + 1)
                }
                _ => Err(StoreError::Conflict),
            },
        }
    }
}
