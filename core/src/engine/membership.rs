//! Membership manager: invite, join, leave, remove.
//!
//! The group record is written first on every path (it is authoritative);
//! member-side invitation pointers and quest mirrors follow through the
//! consistency driver, so a failed member write surfaces in the fan-out
//! report instead of leaving the group half-updated.

use tracing::info;

use crate::model::{GroupInvite, GroupKind};
use crate::store::{GroupStore, MemberStore};

use super::fanout::{FanoutReport, MemberDelta};
use super::{GroupEngine, GroupError, GroupUpdate};

impl<G: GroupStore, M: MemberStore> GroupEngine<G, M> {
    /// Invite a user to a group. For parties this enforces the
    /// one-party-per-member rule; for guilds only duplicate invitations
    /// are rejected. Authorization of the inviter is the caller's concern.
    pub async fn invite_member(
        &self,
        group_id: &str,
        target_id: &str,
    ) -> Result<GroupUpdate, GroupError> {
        let target = self
            .members
            .get(target_id)
            .await?
            .ok_or(GroupError::NotFound)?
            .value;
        let current = self.load_group(group_id).await?.value;

        // All validation happens before the first write.
        if current.members.contains(target_id) {
            return Err(GroupError::AlreadyMember);
        }
        match current.kind {
            GroupKind::Guild => {
                let invited = target
                    .invitations
                    .guilds
                    .iter()
                    .any(|invite| invite.group_id == current.id);
                if invited {
                    return Err(GroupError::AlreadyInvited);
                }
            }
            GroupKind::Party => {
                if target.invitations.party.is_some() {
                    return Err(GroupError::AlreadyInvited);
                }
                if self.groups.find_party_of(target_id).await?.is_some() {
                    return Err(GroupError::AlreadyInParty);
                }
            }
        }

        let invite = GroupInvite {
            group_id: current.id.clone(),
            group_name: current.name.clone(),
        };
        let delta = match current.kind {
            GroupKind::Party => MemberDelta::SetPartyInvite { invite },
            GroupKind::Guild => MemberDelta::AddGuildInvite { invite },
        };

        let (group, _) = self
            .update_group(group_id, |group| {
                if group.members.contains(target_id) {
                    return Err(GroupError::AlreadyMember);
                }
                group.invites.insert(target_id.to_string());
                Ok(())
            })
            .await?;

        let fanout = self.deliver_to(group_id, target_id, delta).await;
        info!(%group_id, %target_id, "member invited");
        Ok(GroupUpdate { group, fanout })
    }

    /// Join a group, consuming the matching invitation. Idempotent: a
    /// member already in the roster is a membership no-op, but any stray
    /// invitation is still cleared.
    pub async fn join_group(
        &self,
        group_id: &str,
        member_id: &str,
    ) -> Result<GroupUpdate, GroupError> {
        let current = self.load_group(group_id).await?.value;
        if current.kind == GroupKind::Party {
            let existing = self.groups.find_party_of(member_id).await?;
            if existing.is_some_and(|found| found.value.id != group_id) {
                return Err(GroupError::AlreadyInParty);
            }
        }

        let (group, _) = self
            .update_group(group_id, |group| {
                group.invites.remove(member_id);
                group.members.insert(member_id.to_string());
                Ok(())
            })
            .await?;

        let fanout = self
            .deliver_to(
                group_id,
                member_id,
                MemberDelta::ClearInvite {
                    group_id: group_id.to_string(),
                },
            )
            .await;
        info!(%group_id, %member_id, "member joined");
        Ok(GroupUpdate { group, fanout })
    }

    /// Leave a group. No validation that the member was present. A
    /// departing party member must not keep a mirror of the party's
    /// quest, so it is cleared on the way out.
    pub async fn leave_group(
        &self,
        group_id: &str,
        member_id: &str,
    ) -> Result<GroupUpdate, GroupError> {
        let (group, _) = self
            .update_group(group_id, |group| {
                group.members.remove(member_id);
                Ok(())
            })
            .await?;

        let fanout = if group.kind == GroupKind::Party {
            self.deliver_to(group_id, member_id, MemberDelta::ClearQuestMirror)
                .await
        } else {
            FanoutReport::default()
        };
        info!(%group_id, %member_id, "member left");
        Ok(GroupUpdate { group, fanout })
    }

    /// Remove a member (or rescind an invitation). Leader-only. The
    /// removed member's quest mirror is cleared; a rescinded invitation
    /// is removed from both the group record and the target's record.
    pub async fn remove_member(
        &self,
        group_id: &str,
        requester_id: &str,
        target_id: &str,
    ) -> Result<GroupUpdate, GroupError> {
        let current = self.load_group(group_id).await?.value;
        if current.leader_id != requester_id {
            return Err(GroupError::Unauthorized);
        }

        if current.members.contains(target_id) {
            let (group, _) = self
                .update_group(group_id, |group| {
                    if group.leader_id != requester_id {
                        return Err(GroupError::Unauthorized);
                    }
                    group.members.remove(target_id);
                    Ok(())
                })
                .await?;

            let fanout = if group.kind == GroupKind::Party {
                self.deliver_to(group_id, target_id, MemberDelta::ClearQuestMirror)
                    .await
            } else {
                FanoutReport::default()
            };
            info!(%group_id, %target_id, "member removed");
            Ok(GroupUpdate { group, fanout })
        } else if current.invites.contains(target_id) {
            let (group, _) = self
                .update_group(group_id, |group| {
                    if group.leader_id != requester_id {
                        return Err(GroupError::Unauthorized);
                    }
                    group.invites.remove(target_id);
                    Ok(())
                })
                .await?;

            let fanout = self
                .deliver_to(
                    group_id,
                    target_id,
                    MemberDelta::ClearInvite {
                        group_id: group_id.to_string(),
                    },
                )
                .await;
            info!(%group_id, %target_id, "invitation rescinded");
            Ok(GroupUpdate { group, fanout })
        } else {
            Err(GroupError::NotFound)
        }
    }
}
