//! The coordination engine: membership management and the quest state
//! machine, running over versioned stores.
//!
//! Every operation follows the same shape: validate against a fresh read,
//! compute the complete post-transition group in memory, commit it with a
//! single compare-and-set write (retried on version conflicts), then fan
//! out per-member deltas through the consistency driver. The group record
//! is authoritative; member records are caches that may briefly lag.

pub mod error;
pub mod fanout;
pub mod membership;
pub mod quest;

use std::collections::BTreeMap;

use tracing::debug;

use crate::catalog::QuestCatalog;
use crate::config::CoordinationConfig;
use crate::model::Group;
use crate::store::{GroupStore, MemberStore, StoreError, Versioned};

pub use error::GroupError;
pub use fanout::{FailedDelivery, FanoutReport, MemberDelta};
pub use quest::{ProgressDelta, QuestCompletion, QuestUpdate};

/// Result of a membership operation: the committed group snapshot plus
/// the outcome of the member fan-out that followed the group write.
#[derive(Debug)]
pub struct GroupUpdate {
    pub group: Group,
    pub fanout: FanoutReport,
}

/// The coordination engine. Generic over the two store implementations so
/// the same logic runs against SQLite in production and the in-memory
/// stores in tests.
pub struct GroupEngine<G, M> {
    groups: G,
    members: M,
    catalog: QuestCatalog,
    config: CoordinationConfig,
}

impl<G: GroupStore, M: MemberStore> GroupEngine<G, M> {
    pub fn new(groups: G, members: M, catalog: QuestCatalog, config: CoordinationConfig) -> Self {
        Self {
            groups,
            members,
            catalog,
            config,
        }
    }

    pub fn catalog(&self) -> &QuestCatalog {
        &self.catalog
    }

    /// Load a group or fail with `NotFound`.
    pub(crate) async fn load_group(&self, group_id: &str) -> Result<Versioned<Group>, GroupError> {
        self.groups
            .get(group_id)
            .await?
            .ok_or(GroupError::NotFound)
    }

    /// Read-validate-mutate-commit loop with bounded optimistic retries.
    ///
    /// The mutator builds the complete post-transition group in memory and
    /// the commit is one compare-and-set write, so a group is never stored
    /// in a half-transitioned state. Validation errors from the mutator
    /// surface immediately, without retry; only version conflicts re-enter
    /// the loop.
    pub(crate) async fn update_group<T>(
        &self,
        group_id: &str,
        mut mutate: impl FnMut(&mut Group) -> Result<T, GroupError>,
    ) -> Result<(Group, T), GroupError> {
        for attempt in 0..self.config.max_cas_retries {
            let mut current = self.load_group(group_id).await?;
            let outcome = mutate(&mut current.value)?;
            current.value.touch();
            match self
                .groups
                .put_if_version(group_id, &current.value, Some(current.version))
                .await
            {
                Ok(_) => return Ok((current.value, outcome)),
                Err(StoreError::Conflict) => {
                    debug!(%group_id, attempt, "group version conflict, retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(GroupError::Conflict)
    }

    /// Deliver a single member delta through the consistency driver.
    pub(crate) async fn deliver_to(
        &self,
        group_id: &str,
        member_id: &str,
        delta: MemberDelta,
    ) -> FanoutReport {
        let deltas = BTreeMap::from([(member_id.to_string(), delta)]);
        fanout::propagate(
            &self.members,
            group_id,
            deltas,
            self.config.max_delivery_retries,
        )
        .await
    }
}
