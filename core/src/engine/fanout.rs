//! Consistency driver: applies group-level transitions to member records.
//!
//! A group write commits first; the per-member deltas here follow as a
//! best-effort, retryable fan-out. Every delta is an idempotent
//! set-to-value write (replaying a delivery converges on the same member
//! record) with one exception: the scroll debit, which carries the
//! quest's invite-event key and is skipped once that key is recorded on
//! the member.

use std::collections::BTreeMap;

use futures_util::future::join_all;
use tracing::warn;

use crate::model::{GroupInvite, Member, QuestMirror, QuestProgress};
use crate::store::{MemberStore, StoreError};

/// A single member-record mutation derived from a group-level transition.
#[derive(Debug, Clone)]
pub enum MemberDelta {
    /// Point the member's quest mirror at the running quest.
    SetQuestMirror { key: String, progress: QuestProgress },
    /// Clear the member's quest mirror.
    ClearQuestMirror,
    /// Consume one quest scroll. `event` deduplicates replays.
    DebitScroll { quest_key: String, event: String },
    /// Record a pending party invitation.
    SetPartyInvite { invite: GroupInvite },
    /// Record a pending guild invitation.
    AddGuildInvite { invite: GroupInvite },
    /// Drop any invitation that references the given group.
    ClearInvite { group_id: String },
    /// Several deltas applied in one member write, in order.
    Batch(Vec<MemberDelta>),
}

impl MemberDelta {
    /// Apply the delta to a member record in memory.
    pub fn apply(&self, member: &mut Member) {
        match self {
            MemberDelta::SetQuestMirror { key, progress } => {
                member.party_quest = Some(QuestMirror {
                    key: key.clone(),
                    progress: progress.clone(),
                });
            }
            MemberDelta::ClearQuestMirror => {
                member.party_quest = None;
            }
            MemberDelta::DebitScroll { quest_key, event } => {
                if member.items.consumed_scroll_events.insert(event.clone()) {
                    *member
                        .items
                        .quest_scrolls
                        .entry(quest_key.clone())
                        .or_insert(0) -= 1;
                }
            }
            MemberDelta::SetPartyInvite { invite } => {
                member.invitations.party = Some(invite.clone());
            }
            MemberDelta::AddGuildInvite { invite } => {
                let already = member
                    .invitations
                    .guilds
                    .iter()
                    .any(|existing| existing.group_id == invite.group_id);
                if !already {
                    member.invitations.guilds.push(invite.clone());
                }
            }
            MemberDelta::ClearInvite { group_id } => {
                if member
                    .invitations
                    .party
                    .as_ref()
                    .is_some_and(|invite| invite.group_id == *group_id)
                {
                    member.invitations.party = None;
                }
                member
                    .invitations
                    .guilds
                    .retain(|invite| invite.group_id != *group_id);
            }
            MemberDelta::Batch(deltas) => {
                for delta in deltas {
                    delta.apply(member);
                }
            }
        }
    }
}

/// One failed delivery out of a fan-out.
#[derive(Debug)]
pub struct FailedDelivery {
    pub member_id: String,
    pub error: StoreError,
}

/// Aggregate outcome of a fan-out. An operation whose group write
/// committed still returns Ok when deliveries failed; the failed ids are
/// reported here for the caller to replay.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub failed: Vec<FailedDelivery>,
}

impl FanoutReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_member_ids(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failure| failure.member_id.as_str())
            .collect()
    }
}

/// Apply one delta to one member record with bounded compare-and-set
/// retries.
pub async fn deliver<M: MemberStore>(
    store: &M,
    member_id: &str,
    delta: &MemberDelta,
    max_retries: u32,
) -> Result<(), StoreError> {
    for _ in 0..max_retries {
        let Some(mut current) = store.get(member_id).await? else {
            return Err(StoreError::Unavailable(format!(
                "member record {member_id} missing"
            )));
        };
        delta.apply(&mut current.value);
        current.value.touch();
        match store
            .put_if_version(member_id, &current.value, Some(current.version))
            .await
        {
            Ok(_) => return Ok(()),
            Err(StoreError::Conflict) => continue,
            Err(err) => return Err(err),
        }
    }
    Err(StoreError::Conflict)
}

/// Attempt every delta concurrently; never aborts early on a single
/// member's failure. Distinct member records have no ordering requirement
/// between them.
pub async fn propagate<M: MemberStore>(
    store: &M,
    group_id: &str,
    deltas: BTreeMap<String, MemberDelta>,
    max_retries: u32,
) -> FanoutReport {
    let attempts = deltas.iter().map(|(member_id, delta)| async move {
        deliver(store, member_id, delta, max_retries)
            .await
            .map_err(|error| FailedDelivery {
                member_id: member_id.clone(),
                error,
            })
    });

    let mut report = FanoutReport::default();
    for outcome in join_all(attempts).await {
        if let Err(failure) = outcome {
            warn!(
                %group_id,
                member_id = %failure.member_id,
                error = %failure.error,
                "member delta delivery failed"
            );
            report.failed.push(failure);
        }
    }
    report
}
